// MIT License - Copyright (c) 2026 Peter Wright
// Framing socket for the ADB host/server protocol

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::config::ClientConfig;
use crate::constants::{DEVICE_NOT_FOUND, FAIL, OKAY};
use crate::error::{AdbError, Result};
use crate::protocol::{encode_request_into, parse_hex_length, AdbResponse, HostRequest};
use crate::shell::ShellStream;
use crate::sync::SyncSession;

/// Where the connection sits in the host protocol.
///
/// The mode only ever advances: `Command` until a transport is bound,
/// then `Transport`; the sync and shell handshakes consume the socket
/// (see [`AdbSocket::into_sync`] / [`AdbSocket::into_shell`]), so no new
/// framed request can follow them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketMode {
    Command,
    Transport,
    Sync,
    Shell,
}

/// One framed connection to the daemon.
///
/// Generic over the byte channel so tests can drive it with an in-memory
/// duplex stream; production sockets are `AdbSocket<TcpStream>`.
///
/// A socket is created connected. Any I/O or framing error disposes it
/// as part of raising the error; every later call then fails fast with
/// [`AdbError::SocketDisposed`]. A daemon-level `FAIL` does not dispose.
pub struct AdbSocket<S = TcpStream> {
    stream: Option<S>,
    mode: SocketMode,
    bound_serial: Option<String>,
    receive_buffer_size: usize,
    read_timeout: Option<Duration>,
    write_buf: Vec<u8>,
    endpoint: Option<(String, u16)>,
}

impl AdbSocket<TcpStream> {
    /// Dial the daemon endpoint named by the config.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let (host, port) = config.endpoint();
        debug!("connecting to adb server at {}:{}", host, port);
        let stream = TcpStream::connect((host.as_str(), port)).await?;
        stream.set_nodelay(true).ok();
        let mut socket = Self::from_stream(stream, config);
        socket.endpoint = Some((host, port));
        Ok(socket)
    }

    /// Drop the current stream and dial the same endpoint again.
    pub async fn reconnect(&mut self) -> Result<()> {
        let (host, port) = self
            .endpoint
            .clone()
            .ok_or_else(|| AdbError::protocol("socket has no endpoint to reconnect to"))?;
        self.stream = None;
        debug!("reconnecting to adb server at {}:{}", host, port);
        let stream = TcpStream::connect((host.as_str(), port)).await?;
        stream.set_nodelay(true).ok();
        self.stream = Some(stream);
        self.mode = SocketMode::Command;
        self.bound_serial = None;
        Ok(())
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AdbSocket<S> {
    /// Wrap an already-connected byte channel.
    pub fn from_stream(stream: S, config: &ClientConfig) -> Self {
        let read_timeout = match config.read_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        Self {
            stream: Some(stream),
            mode: SocketMode::Command,
            bound_serial: None,
            receive_buffer_size: config.receive_buffer_size.max(1),
            read_timeout,
            write_buf: Vec::with_capacity(config.write_buffer_size),
            endpoint: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn mode(&self) -> SocketMode {
        self.mode
    }

    /// Serial of the device this socket is bound to, if any.
    pub fn bound_serial(&self) -> Option<&str> {
        self.bound_serial.as_deref()
    }

    /// Drop the underlying stream. Idempotent.
    pub fn close(&mut self) {
        self.stream = None;
    }

    /// Take the raw byte stream out of the socket. `None` if the socket
    /// was already disposed.
    pub fn into_inner(self) -> Option<S> {
        self.stream
    }

    fn dispose_with(&mut self, err: AdbError) -> AdbError {
        debug!("disposing adb socket: {}", err);
        self.stream = None;
        err
    }

    /// Write a buffer in full. A zero-byte write means the channel is
    /// gone and surfaces as [`AdbError::ChannelEof`].
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        let result = {
            let stream = self.stream.as_mut().ok_or(AdbError::SocketDisposed)?;
            stream.write_all(data).await
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WriteZero => {
                Err(self.dispose_with(AdbError::ChannelEof))
            }
            Err(e) => Err(self.dispose_with(AdbError::Io(e))),
        }
    }

    /// Read until `buf` is full or the peer performs an orderly close,
    /// whichever comes first; returns the byte count. At most
    /// `receive_buffer_size` bytes are requested per iteration.
    pub async fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        let chunk = self.receive_buffer_size;
        let read_timeout = self.read_timeout;
        let mut filled = 0;
        while filled < buf.len() {
            let end = buf.len().min(filled + chunk);
            let result = {
                let stream = self.stream.as_mut().ok_or(AdbError::SocketDisposed)?;
                let read = stream.read(&mut buf[filled..end]);
                match read_timeout {
                    Some(limit) => match timeout(limit, read).await {
                        Ok(r) => r,
                        Err(_) => Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "socket read timed out",
                        )),
                    },
                    None => read.await,
                }
            };
            match result {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    return Err(self.dispose_with(AdbError::Timeout));
                }
                Err(e) => return Err(self.dispose_with(AdbError::Io(e))),
            }
        }
        Ok(filled)
    }

    /// Read exactly `buf.len()` bytes; a short read is channel EOF.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let n = self.receive(buf).await?;
        if n < buf.len() {
            return Err(self.dispose_with(AdbError::ChannelEof));
        }
        Ok(())
    }

    /// One raw read of at most `buf.len()` bytes; 0 is orderly EOF.
    /// Used by the shell stream, where message boundaries do not exist.
    pub(crate) async fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        let read_timeout = self.read_timeout;
        let cap = buf.len().min(self.receive_buffer_size);
        let result = {
            let stream = self.stream.as_mut().ok_or(AdbError::SocketDisposed)?;
            let read = stream.read(&mut buf[..cap]);
            match read_timeout {
                Some(limit) => match timeout(limit, read).await {
                    Ok(r) => r,
                    Err(_) => Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "socket read timed out",
                    )),
                },
                None => read.await,
            }
        };
        match result {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                Err(self.dispose_with(AdbError::Timeout))
            }
            Err(e) => Err(self.dispose_with(AdbError::Io(e))),
        }
    }

    /// Frame and send one host request.
    pub async fn send_request(&mut self, request: &HostRequest) -> Result<()> {
        self.send_raw_request(&request.to_wire_string()).await
    }

    /// Frame and send a verbatim command string.
    pub async fn send_raw_request(&mut self, command: &str) -> Result<()> {
        let mut frame = std::mem::take(&mut self.write_buf);
        frame.clear();
        if let Err(e) = encode_request_into(&mut frame, command) {
            self.write_buf = frame;
            return Err(e);
        }
        trace!(">> {}", command);
        let result = self.send(&frame).await;
        self.write_buf = frame;
        result
    }

    /// Read the four status bytes and, on `FAIL`, the diagnostic string.
    ///
    /// An orderly close before any status byte yields a response with
    /// `io_ok == false` rather than an error, so callers can tell "the
    /// daemon went away" apart from a broken exchange.
    pub async fn read_adb_response(&mut self) -> Result<AdbResponse> {
        let mut status = [0u8; 4];
        let n = self.receive(&mut status).await?;
        if n == 0 {
            return Ok(AdbResponse::io_failure());
        }
        if n < 4 {
            return Err(self.dispose_with(AdbError::ChannelEof));
        }
        if &status == OKAY {
            trace!("<< OKAY");
            return Ok(AdbResponse::okay());
        }
        if &status == FAIL {
            let message = self.read_string().await?.unwrap_or_default();
            debug!("<< FAIL {:?}", message);
            return Ok(AdbResponse::failure(message));
        }
        // The daemon leaves other tokens undefined; report them verbatim.
        let token = String::from_utf8_lossy(&status).into_owned();
        warn!("unexpected status token {:?}", token);
        Ok(AdbResponse::failure(token))
    }

    /// Hex-length-prefixed UTF-8 string. `None` on an immediate EOF,
    /// which is how the daemon signals "nothing more" on some commands.
    pub async fn read_string(&mut self) -> Result<Option<String>> {
        let mut digits = [0u8; 4];
        let n = self.receive(&mut digits).await?;
        if n == 0 {
            return Ok(None);
        }
        if n < 4 {
            return Err(self.dispose_with(AdbError::ChannelEof));
        }
        let len = match parse_hex_length(&digits) {
            Ok(len) => len,
            Err(e) => return Err(self.dispose_with(e)),
        };
        let mut payload = vec![0u8; len];
        self.read_exact(&mut payload).await?;
        match String::from_utf8(payload) {
            Ok(s) => Ok(Some(s)),
            Err(_) => Err(self.dispose_with(AdbError::protocol("payload is not valid UTF-8"))),
        }
    }

    /// Little-endian-length-prefixed UTF-8 string (sync subprotocol
    /// framing, used for FAIL diagnostics inside sync mode).
    pub async fn read_sync_string(&mut self) -> Result<String> {
        let mut len_buf = [0u8; 4];
        self.read_exact(&mut len_buf).await?;
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        self.read_exact(&mut payload).await?;
        String::from_utf8(payload)
            .map_err(|_| self.dispose_with(AdbError::protocol("payload is not valid UTF-8")))
    }

    /// One request/response exchange.
    pub async fn request(&mut self, request: &HostRequest) -> Result<AdbResponse> {
        self.send_request(request).await?;
        self.read_adb_response().await
    }

    /// Bind this connection to the device with the given serial.
    ///
    /// With no serial this is a no-op, matching the daemon's behaviour of
    /// routing host-prefixed requests without a transport.
    pub async fn set_device(&mut self, serial: Option<&str>) -> Result<()> {
        let Some(serial) = serial else {
            return Ok(());
        };
        let response = self
            .request(&HostRequest::Transport {
                serial: serial.to_string(),
            })
            .await?;
        if response.io_ok
            && !response.okay
            && response.message.eq_ignore_ascii_case(DEVICE_NOT_FOUND)
        {
            return Err(AdbError::DeviceNotFound {
                serial: serial.to_string(),
            });
        }
        response.into_result()?;
        self.mode = SocketMode::Transport;
        self.bound_serial = Some(serial.to_string());
        debug!("transport bound to {}", serial);
        Ok(())
    }

    /// Bind to the single connected device (`host:transport-any`).
    pub async fn set_any_device(&mut self) -> Result<()> {
        self.request(&HostRequest::TransportAny)
            .await?
            .into_result()?;
        self.mode = SocketMode::Transport;
        Ok(())
    }

    /// Issue `shell:<command>` and hand the post-handshake byte stream to
    /// a [`ShellStream`]. Consuming the socket is what enforces the
    /// protocol rule that no framed request may follow the switch.
    pub async fn into_shell(mut self, command: &str) -> Result<ShellStream<S>> {
        self.request(&HostRequest::Shell {
            command: command.to_string(),
        })
        .await?
        .into_result()?;
        self.mode = SocketMode::Shell;
        Ok(ShellStream::new(self))
    }

    /// Issue `exec:<command>` (no pty) and switch to shell mode.
    pub async fn into_exec(mut self, command: &str) -> Result<ShellStream<S>> {
        self.request(&HostRequest::Exec {
            command: command.to_string(),
        })
        .await?
        .into_result()?;
        self.mode = SocketMode::Shell;
        Ok(ShellStream::new(self))
    }

    /// Issue `sync:` and switch to the file-transfer subprotocol.
    pub async fn into_sync(mut self) -> Result<SyncSession<S>> {
        self.request(&HostRequest::Sync).await?.into_result()?;
        self.mode = SocketMode::Sync;
        Ok(SyncSession::new(self))
    }
}
