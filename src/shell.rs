// MIT License - Copyright (c) 2026 Peter Wright

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::Result;
use crate::socket::AdbSocket;

const RAW_CHUNK: usize = 4096;

/// The post-handshake byte stream of a `shell:` / `exec:` request.
///
/// Devices emit `CR LF` line endings; reads collapse every `CR LF` pair
/// to `LF` so callers see Unix newlines regardless of the device. A `CR`
/// not followed by `LF` passes through untouched. Writes are verbatim.
pub struct ShellStream<S = TcpStream> {
    socket: AdbSocket<S>,
    buffered: Vec<u8>,
    pos: usize,
    carry_cr: bool,
    eof: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ShellStream<S> {
    pub(crate) fn new(socket: AdbSocket<S>) -> Self {
        Self {
            socket,
            buffered: Vec::new(),
            pos: 0,
            carry_cr: false,
            eof: false,
        }
    }

    /// Read some normalized bytes. Returns 0 only at end of stream.
    pub async fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        while self.pos >= self.buffered.len() && !self.eof {
            self.fill().await?;
        }
        let available = self.buffered.len() - self.pos;
        if available == 0 {
            return Ok(0);
        }
        let n = out.len().min(available);
        out[..n].copy_from_slice(&self.buffered[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    /// Read the rest of the stream into a byte vector.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut collected = Vec::new();
        let mut chunk = [0u8; RAW_CHUNK];
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            collected.extend_from_slice(&chunk[..n]);
        }
        Ok(collected)
    }

    /// Read the rest of the stream as text. Invalid UTF-8 sequences are
    /// replaced, since shell output carries no encoding guarantee.
    pub async fn read_to_string(&mut self) -> Result<String> {
        let bytes = self.read_to_end().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Write bytes to the remote command's stdin, unmodified.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.socket.send(data).await
    }

    /// Close the underlying socket.
    pub fn close(&mut self) {
        self.socket.close();
    }

    /// Give back the framing socket (already in shell mode; only useful
    /// for inspecting state or tearing down).
    pub fn into_socket(self) -> AdbSocket<S> {
        self.socket
    }

    async fn fill(&mut self) -> Result<()> {
        self.buffered.clear();
        self.pos = 0;

        let mut raw = [0u8; RAW_CHUNK];
        let n = self.socket.read_some(&mut raw).await?;
        if n == 0 {
            self.eof = true;
            // A CR held back at a chunk boundary turned out to be final.
            if self.carry_cr {
                self.carry_cr = false;
                self.buffered.push(b'\r');
            }
            return Ok(());
        }

        let mut i = 0;
        if self.carry_cr {
            self.carry_cr = false;
            if raw[0] == b'\n' {
                self.buffered.push(b'\n');
                i = 1;
            } else {
                self.buffered.push(b'\r');
            }
        }
        while i < n {
            let b = raw[i];
            if b == b'\r' {
                if i + 1 == n {
                    // Cannot tell yet whether an LF follows.
                    self.carry_cr = true;
                    i += 1;
                } else if raw[i + 1] == b'\n' {
                    self.buffered.push(b'\n');
                    i += 2;
                } else {
                    self.buffered.push(b'\r');
                    i += 1;
                }
            } else {
                self.buffered.push(b);
                i += 1;
            }
        }
        Ok(())
    }
}
