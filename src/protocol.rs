// MIT License - Copyright (c) 2026 Peter Wright

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{AdbError, Result};

/// Requests understood by the host side of the daemon.
///
/// Anything not covered here can be sent verbatim through
/// [`HostRequest::Raw`]; the daemon rejects what it does not know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostRequest {
    /// `host:version` — internal protocol version of the daemon
    Version,
    /// `host:kill` — ask the daemon to exit
    Kill,
    /// `host:transport:<serial>` — bind this connection to a device
    Transport { serial: String },
    /// `host:transport-any` — bind to the single connected device
    TransportAny,
    /// `sync:` — enter the file-transfer subprotocol
    Sync,
    /// `shell:<cmd>` — run a command under a pty
    Shell { command: String },
    /// `shell,v2:<cmd>` — shell protocol 2 (separated stdout/stderr)
    ShellV2 { command: String },
    /// `exec:<cmd>` — run a command without a pty
    Exec { command: String },
    /// Any other request, passed through verbatim
    Raw(String),
}

impl HostRequest {
    /// Convert the request to its wire string representation.
    pub fn to_wire_string(&self) -> String {
        match self {
            HostRequest::Version => "host:version".to_string(),
            HostRequest::Kill => "host:kill".to_string(),
            HostRequest::Transport { serial } => format!("host:transport:{}", serial),
            HostRequest::TransportAny => "host:transport-any".to_string(),
            HostRequest::Sync => "sync:".to_string(),
            HostRequest::Shell { command } => format!("shell:{}", command),
            HostRequest::ShellV2 { command } => format!("shell,v2:{}", command),
            HostRequest::Exec { command } => format!("exec:{}", command),
            HostRequest::Raw(s) => s.clone(),
        }
    }
}

/// Frame a host request: four lowercase ASCII hex digits carrying the
/// command's byte length, then the command bytes.
pub fn encode_request(command: &str) -> Result<Vec<u8>> {
    let mut frame = Vec::with_capacity(4 + command.len());
    encode_request_into(&mut frame, command)?;
    Ok(frame)
}

/// Like [`encode_request`] but appends to a caller-owned buffer.
pub fn encode_request_into(buf: &mut Vec<u8>, command: &str) -> Result<()> {
    if command.len() > 0xFFFF {
        return Err(AdbError::protocol(format!(
            "request of {} bytes does not fit a 4-digit length prefix",
            command.len()
        )));
    }
    buf.extend_from_slice(format!("{:04x}", command.len()).as_bytes());
    buf.extend_from_slice(command.as_bytes());
    Ok(())
}

/// Parse a four-ASCII-hex-digit length prefix. Uppercase is tolerated.
pub fn parse_hex_length(digits: &[u8; 4]) -> Result<usize> {
    let text = std::str::from_utf8(digits)
        .map_err(|_| AdbError::protocol("length prefix is not ASCII"))?;
    usize::from_str_radix(text, 16)
        .map_err(|_| AdbError::protocol(format!("malformed hex length {:?}", text)))
}

/// Outcome of one host request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbResponse {
    /// False when the stream closed before a status token arrived.
    pub io_ok: bool,
    /// True iff the four status bytes were `OKAY`.
    pub okay: bool,
    /// Empty on success, diagnostic on failure.
    pub message: String,
}

impl AdbResponse {
    pub fn okay() -> Self {
        Self {
            io_ok: true,
            okay: true,
            message: String::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            io_ok: true,
            okay: false,
            message: message.into(),
        }
    }

    pub fn io_failure() -> Self {
        Self {
            io_ok: false,
            okay: false,
            message: String::new(),
        }
    }

    /// Fold the response into the error model: a dead channel becomes
    /// [`AdbError::ChannelEof`], a daemon `FAIL` becomes
    /// [`AdbError::AdbFail`].
    pub fn into_result(self) -> Result<()> {
        if !self.io_ok {
            Err(AdbError::ChannelEof)
        } else if !self.okay {
            Err(AdbError::AdbFail(self.message))
        } else {
            Ok(())
        }
    }
}

/// A `major.minor.micro` triple parsed from `adb version` output.
///
/// The derived ordering is component-wise lexicographic, which is what
/// the supervisor's minimum-version check relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AdbVersion {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
}

impl AdbVersion {
    pub const fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self {
            major,
            minor,
            micro,
        }
    }
}

impl fmt::Display for AdbVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)
    }
}

static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\.(\d+)\.(\d+)$").unwrap());

/// Find the version triple in `adb version` stdout.
///
/// The last line whose tail (after trailing whitespace, including a
/// stray `\r` from Windows builds) is a dotted triple wins.
pub fn parse_version_output(lines: &[String]) -> Result<AdbVersion> {
    for line in lines.iter().rev() {
        if let Some(caps) = VERSION_RE.captures(line.trim_end()) {
            let parse = |i: usize| caps[i].parse::<u32>().map_err(|_| AdbError::VersionUnknown);
            return Ok(AdbVersion::new(parse(1)?, parse(2)?, parse(3)?));
        }
    }
    Err(AdbError::VersionUnknown)
}
