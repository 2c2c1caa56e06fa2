// MIT License - Copyright (c) 2026 Peter Wright

use std::path::PathBuf;

use crate::protocol::AdbVersion;

/// All errors that can occur in the adb-host-bridge library.
#[derive(Debug, thiserror::Error)]
pub enum AdbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the channel in the middle of a message.
    #[error("channel EOF")]
    ChannelEof,

    /// The configured socket read timeout elapsed. The socket is left at
    /// an indeterminate position in the stream and has been disposed.
    #[error("socket read timed out")]
    Timeout,

    /// The daemon answered `FAIL` with the given diagnostic.
    #[error("adb server failure: {0}")]
    AdbFail(String),

    /// Transport binding was rejected because no device with this serial
    /// is connected.
    #[error("device not found: {serial}")]
    DeviceNotFound { serial: String },

    /// Unexpected tag, malformed length prefix, or otherwise corrupt
    /// framing on the wire.
    #[error("protocol error: {details}")]
    Protocol { details: String },

    /// The socket was disposed after a fatal error; further use fails fast.
    #[error("socket disposed")]
    SocketDisposed,

    #[error("cannot parse a version from adb output")]
    VersionUnknown,

    #[error("adb version {found} is older than required {required}")]
    VersionTooOld {
        found: AdbVersion,
        required: AdbVersion,
    },

    /// The adb binary exited with a non-zero code (after the one retry
    /// `start-server` is allowed).
    #[error("adb exited with code {code}: {command}")]
    ProcessFailed { code: i32, command: String },

    #[error("unsupported platform: {os}")]
    UnsupportedPlatform { os: String },

    #[error("invalid adb executable {path:?}: {details}")]
    InvalidAdbPath { path: PathBuf, details: String },
}

impl AdbError {
    pub(crate) fn protocol(details: impl Into<String>) -> Self {
        AdbError::Protocol {
            details: details.into(),
        }
    }

    /// Whether the framing socket must be torn down after this error.
    ///
    /// `AdbFail` and `DeviceNotFound` leave the socket usable; everything
    /// at the byte-stream level does not.
    pub fn closes_socket(&self) -> bool {
        matches!(
            self,
            AdbError::Io(_) | AdbError::ChannelEof | AdbError::Timeout | AdbError::Protocol { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, AdbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closes_socket() {
        assert!(AdbError::ChannelEof.closes_socket());
        assert!(AdbError::Timeout.closes_socket());
        assert!(AdbError::protocol("bad tag").closes_socket());
        assert!(!AdbError::AdbFail("device offline".into()).closes_socket());
        assert!(
            !AdbError::DeviceNotFound { serial: "X".into() }.closes_socket()
        );
    }
}
