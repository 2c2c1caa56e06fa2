// MIT License - Copyright (c) 2026 Peter Wright
// File-transfer subprotocol (entered via `sync:`)

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::constants::MAX_SYNC_DATA;
use crate::error::{AdbError, Result};
use crate::socket::AdbSocket;

/// Four-byte command tags of the sync subprotocol.
///
/// Only the v1 subset is ever written by this crate; the v2 tags are
/// recognized on the read path so a newer daemon cannot desynchronize
/// us silently. Anything else surfaces as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    Send,
    SendV2,
    Recv,
    RecvV2,
    Stat,
    StatV2,
    List,
    ListV2,
    Dent,
    DentV2,
    Data,
    Done,
    Okay,
    Fail,
    Quit,
    Unknown([u8; 4]),
}

impl SyncCommand {
    pub fn tag(&self) -> [u8; 4] {
        match self {
            SyncCommand::Send => *b"SEND",
            SyncCommand::SendV2 => *b"SND2",
            SyncCommand::Recv => *b"RECV",
            SyncCommand::RecvV2 => *b"RCV2",
            SyncCommand::Stat => *b"STAT",
            SyncCommand::StatV2 => *b"STA2",
            SyncCommand::List => *b"LIST",
            SyncCommand::ListV2 => *b"LIS2",
            SyncCommand::Dent => *b"DENT",
            SyncCommand::DentV2 => *b"DNT2",
            SyncCommand::Data => *b"DATA",
            SyncCommand::Done => *b"DONE",
            SyncCommand::Okay => *b"OKAY",
            SyncCommand::Fail => *b"FAIL",
            SyncCommand::Quit => *b"QUIT",
            SyncCommand::Unknown(tag) => *tag,
        }
    }

    pub fn from_tag(tag: [u8; 4]) -> Self {
        match &tag {
            b"SEND" => SyncCommand::Send,
            b"SND2" => SyncCommand::SendV2,
            b"RECV" => SyncCommand::Recv,
            b"RCV2" => SyncCommand::RecvV2,
            b"STAT" => SyncCommand::Stat,
            b"STA2" => SyncCommand::StatV2,
            b"LIST" => SyncCommand::List,
            b"LIS2" => SyncCommand::ListV2,
            b"DENT" => SyncCommand::Dent,
            b"DNT2" => SyncCommand::DentV2,
            b"DATA" => SyncCommand::Data,
            b"DONE" => SyncCommand::Done,
            b"OKAY" => SyncCommand::Okay,
            b"FAIL" => SyncCommand::Fail,
            b"QUIT" => SyncCommand::Quit,
            _ => SyncCommand::Unknown(tag),
        }
    }
}

bitflags! {
    /// Unix mode word carried by STAT and DENT frames: a file-type
    /// nibble plus the permission/suid bits, exactly as the device's
    /// `stat(2)` reports them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileMode: u32 {
        const FIFO         = 0o010000;
        const CHAR_DEVICE  = 0o020000;
        const DIRECTORY    = 0o040000;
        const BLOCK_DEVICE = 0o060000;
        const REGULAR      = 0o100000;
        const SYMLINK      = 0o120000;
        const SOCKET       = 0o140000;
        // Permission, setuid/setgid and sticky bits pass through.
        const _ = !0;
    }
}

impl FileMode {
    const TYPE_MASK: u32 = 0o170000;

    pub fn file_type(&self) -> u32 {
        self.bits() & Self::TYPE_MASK
    }

    pub fn is_regular_file(&self) -> bool {
        self.file_type() == FileMode::REGULAR.bits()
    }

    pub fn is_directory(&self) -> bool {
        self.file_type() == FileMode::DIRECTORY.bits()
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == FileMode::SYMLINK.bits()
    }

    /// The permission bits (including setuid/setgid/sticky).
    pub fn permissions(&self) -> u32 {
        self.bits() & 0o7777
    }
}

/// STAT reply: mode word, byte size, mtime in seconds since the epoch.
/// A path that does not exist on the device stats as all zeroes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub mode: FileMode,
    pub size: u32,
    pub mtime: u32,
}

impl FileStat {
    /// Whether the path exists on the device.
    pub fn exists(&self) -> bool {
        self.mode.bits() != 0 || self.size != 0 || self.mtime != 0
    }

    /// Last-modified time, when the device reported one.
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        if self.mtime == 0 {
            return None;
        }
        DateTime::from_timestamp(i64::from(self.mtime), 0)
    }
}

/// One LIST entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub mode: FileMode,
    pub size: u32,
    pub mtime: u32,
}

/// Transfer progress published after each successful chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub received: u64,
    /// 0 when the total is unknown (a pull without a prior STAT).
    pub total: u64,
}

impl TransferProgress {
    pub fn percent(&self) -> u8 {
        if self.total > 0 {
            ((self.received * 100) / self.total).min(100) as u8
        } else {
            0
        }
    }
}

/// A connection that has switched into the sync subprotocol.
///
/// Several requests may run back to back on one session; [`quit`]
/// (or any fatal error) ends it. The daemon never returns to command
/// mode on the same connection, so `quit` closes the socket.
///
/// [`quit`]: SyncSession::quit
pub struct SyncSession<S = TcpStream> {
    socket: AdbSocket<S>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> SyncSession<S> {
    pub(crate) fn new(socket: AdbSocket<S>) -> Self {
        Self { socket }
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_connected()
    }

    /// Ask for mode/size/mtime of a remote path.
    pub async fn stat(&mut self, path: &str) -> Result<FileStat> {
        self.send_frame(SyncCommand::Stat, path.as_bytes()).await?;
        match self.read_tag().await? {
            SyncCommand::Stat => {
                let mode = self.read_u32().await?;
                let size = self.read_u32().await?;
                let mtime = self.read_u32().await?;
                Ok(FileStat {
                    mode: FileMode::from_bits_retain(mode),
                    size,
                    mtime,
                })
            }
            SyncCommand::Fail => Err(self.failed().await?),
            other => Err(self.unexpected(other, "STAT")),
        }
    }

    /// List a remote directory.
    pub async fn list(&mut self, path: &str) -> Result<Vec<DirEntry>> {
        self.send_frame(SyncCommand::List, path.as_bytes()).await?;
        let mut entries = Vec::new();
        loop {
            match self.read_tag().await? {
                SyncCommand::Dent => {
                    let mode = self.read_u32().await?;
                    let size = self.read_u32().await?;
                    let mtime = self.read_u32().await?;
                    let name_len = self.read_u32().await? as usize;
                    let mut name = vec![0u8; name_len];
                    self.socket.read_exact(&mut name).await?;
                    let name = String::from_utf8_lossy(&name).into_owned();
                    if name == "." || name == ".." {
                        continue;
                    }
                    entries.push(DirEntry {
                        name,
                        mode: FileMode::from_bits_retain(mode),
                        size,
                        mtime,
                    });
                }
                SyncCommand::Done => break,
                SyncCommand::Fail => return Err(self.failed().await?),
                other => return Err(self.unexpected(other, "DENT")),
            }
        }
        debug!("listed {} entries", entries.len());
        Ok(entries)
    }

    /// Upload a stream of bytes to `remote` with the given POSIX mode
    /// and mtime (seconds since the epoch).
    pub async fn push<R>(&mut self, source: R, remote: &str, mode: u32, mtime: u32) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        self.push_with_progress(source, remote, mode, mtime, None, |_| {})
            .await
    }

    /// [`push`](SyncSession::push) with a progress observer. `total`
    /// should be the source length when the caller knows it; progress
    /// then carries a real percentage.
    pub async fn push_with_progress<R, F>(
        &mut self,
        mut source: R,
        remote: &str,
        mode: u32,
        mtime: u32,
        total: Option<u64>,
        mut progress: F,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin,
        F: FnMut(TransferProgress),
    {
        // The wire wants "<path>,<mode>" with the mode in plain ASCII
        // decimal; Rust's integer Display is locale-independent.
        let spec = format!("{},{}", remote, mode);
        self.send_frame(SyncCommand::Send, spec.as_bytes()).await?;

        let total = total.unwrap_or(0);
        let mut sent: u64 = 0;
        let mut buf = vec![0u8; MAX_SYNC_DATA];
        loop {
            let n = match source.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    // The frame sequence is broken; this connection is done.
                    self.socket.close();
                    return Err(AdbError::Io(e));
                }
            };
            if n == 0 {
                break;
            }
            self.send_frame(SyncCommand::Data, &buf[..n]).await?;
            sent += n as u64;
            progress(TransferProgress {
                received: sent,
                total,
            });
        }

        // DONE carries the file mtime where other frames carry a length.
        self.send_header(SyncCommand::Done, mtime).await?;

        match self.read_tag().await? {
            SyncCommand::Okay => {
                // Trailing length word, always zero; read and discard.
                self.read_u32().await?;
                debug!("pushed {} bytes to {}", sent, remote);
                Ok(sent)
            }
            SyncCommand::Fail => Err(self.failed().await?),
            other => Err(self.unexpected(other, "OKAY")),
        }
    }

    /// Download `remote` into the given writer. Returns the byte count.
    pub async fn pull<W>(&mut self, remote: &str, dest: W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        self.pull_with_progress(remote, dest, None, |_| {}).await
    }

    /// [`pull`](SyncSession::pull) with a progress observer. The codec
    /// does not STAT on its own: pass `total` from a prior
    /// [`stat`](SyncSession::stat) to get real percentages, otherwise
    /// progress reports a total of 0.
    pub async fn pull_with_progress<W, F>(
        &mut self,
        remote: &str,
        mut dest: W,
        total: Option<u64>,
        mut progress: F,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
        F: FnMut(TransferProgress),
    {
        self.send_frame(SyncCommand::Recv, remote.as_bytes()).await?;

        let total = total.unwrap_or(0);
        let mut received: u64 = 0;
        let mut buf = vec![0u8; MAX_SYNC_DATA];
        loop {
            match self.read_tag().await? {
                SyncCommand::Data => {
                    let len = self.read_u32().await? as usize;
                    if len > MAX_SYNC_DATA {
                        self.socket.close();
                        return Err(AdbError::protocol(format!(
                            "DATA frame of {} bytes exceeds the {} byte limit",
                            len, MAX_SYNC_DATA
                        )));
                    }
                    self.socket.read_exact(&mut buf[..len]).await?;
                    if let Err(e) = dest.write_all(&buf[..len]).await {
                        self.socket.close();
                        return Err(AdbError::Io(e));
                    }
                    received += len as u64;
                    progress(TransferProgress {
                        received,
                        total,
                    });
                }
                SyncCommand::Done => {
                    // Length word accompanying DONE is meaningless here.
                    self.read_u32().await?;
                    break;
                }
                SyncCommand::Fail => return Err(self.failed().await?),
                other => return Err(self.unexpected(other, "DATA")),
            }
        }
        debug!("pulled {} bytes from {}", received, remote);
        Ok(received)
    }

    /// Leave sync mode. The daemon does not resume command mode on this
    /// connection, so the socket is closed; open a new connection for
    /// further host requests.
    pub async fn quit(mut self) -> Result<()> {
        self.send_header(SyncCommand::Quit, 0).await?;
        self.socket.close();
        Ok(())
    }

    /// Tear the session down without the QUIT courtesy.
    pub fn abort(mut self) {
        self.socket.close();
    }

    async fn send_frame(&mut self, command: SyncCommand, payload: &[u8]) -> Result<()> {
        if payload.len() > u32::MAX as usize {
            return Err(AdbError::protocol("sync payload exceeds u32 range"));
        }
        let mut frame = Vec::with_capacity(8 + payload.len());
        frame.extend_from_slice(&command.tag());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(payload);
        trace!(">> {:?} {} bytes", command, payload.len());
        self.socket.send(&frame).await
    }

    /// A bare tag + u32 frame; the u32 is a length for most commands but
    /// an mtime for DONE.
    async fn send_header(&mut self, command: SyncCommand, value: u32) -> Result<()> {
        let mut frame = [0u8; 8];
        frame[..4].copy_from_slice(&command.tag());
        frame[4..].copy_from_slice(&value.to_le_bytes());
        trace!(">> {:?} {}", command, value);
        self.socket.send(&frame).await
    }

    async fn read_tag(&mut self) -> Result<SyncCommand> {
        let mut tag = [0u8; 4];
        self.socket.read_exact(&mut tag).await?;
        Ok(SyncCommand::from_tag(tag))
    }

    async fn read_u32(&mut self) -> Result<u32> {
        let mut word = [0u8; 4];
        self.socket.read_exact(&mut word).await?;
        Ok(u32::from_le_bytes(word))
    }

    /// Consume a FAIL frame. The daemon tears the sync service down
    /// after any failure, so the socket closes with it.
    async fn failed(&mut self) -> Result<AdbError> {
        let message = self.socket.read_sync_string().await?;
        self.socket.close();
        Ok(AdbError::AdbFail(message))
    }

    fn unexpected(&mut self, got: SyncCommand, wanted: &str) -> AdbError {
        self.socket.close();
        AdbError::protocol(format!(
            "expected {} in sync stream, got tag {:?}",
            wanted,
            String::from_utf8_lossy(&got.tag())
        ))
    }
}
