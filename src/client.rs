// MIT License - Copyright (c) 2026 Peter Wright

use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::{AdbError, Result};
use crate::protocol::{AdbResponse, HostRequest};
use crate::server::ServerSupervisor;
use crate::shell::ShellStream;
use crate::socket::AdbSocket;
use crate::sync::SyncSession;

/// Entry point for talking to the daemon.
///
/// The daemon consumes one connection per request (mode switches never
/// come back), so this type holds no socket of its own: every operation
/// dials a fresh [`AdbSocket`], which is also why a single
/// `HostConnection` can be shared freely across tasks.
pub struct HostConnection {
    config: ClientConfig,
}

impl HostConnection {
    /// Set up against the configured endpoint. With
    /// `auto_start_server`, the supervisor first version-checks the adb
    /// binary and makes sure a daemon is listening.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        if config.auto_start_server {
            let supervisor = ServerSupervisor::locate(&config)?;
            supervisor.get_version().await?;
            supervisor.start_server().await?;
            info!("adb server ready");
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn open_socket(&self) -> Result<AdbSocket> {
        AdbSocket::connect(&self.config).await
    }

    /// `host:version`: the daemon's internal protocol version, parsed
    /// from its four-hex-digit payload.
    pub async fn host_version(&self) -> Result<u32> {
        let mut socket = self.open_socket().await?;
        socket.request(&HostRequest::Version).await?.into_result()?;
        let payload = socket
            .read_string()
            .await?
            .ok_or(AdbError::ChannelEof)?;
        u32::from_str_radix(payload.trim(), 16).map_err(|_| {
            AdbError::protocol(format!("malformed version payload {:?}", payload))
        })
    }

    /// `host:kill`: ask the daemon to exit. The daemon frequently
    /// closes the connection without answering; that counts as success.
    pub async fn kill_server(&self) -> Result<()> {
        let mut socket = self.open_socket().await?;
        socket.send_request(&HostRequest::Kill).await?;
        match socket.read_adb_response().await {
            Ok(response) if !response.io_ok => Ok(()),
            Ok(response) => response.into_result(),
            Err(AdbError::ChannelEof) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Send a verbatim host command and return the raw response.
    pub async fn raw_request(&self, command: &str) -> Result<AdbResponse> {
        let mut socket = self.open_socket().await?;
        socket.send_raw_request(command).await?;
        socket.read_adb_response().await
    }

    /// Send a verbatim host command expecting a hex-length-prefixed
    /// payload after `OKAY` (the `host:devices`-style shape).
    pub async fn raw_query(&self, command: &str) -> Result<Option<String>> {
        let mut socket = self.open_socket().await?;
        socket.send_raw_request(command).await?;
        socket.read_adb_response().await?.into_result()?;
        socket.read_string().await
    }

    /// Run a command on a device under `shell:`, returning the
    /// normalized byte stream.
    pub async fn open_shell(
        &self,
        serial: Option<&str>,
        command: &str,
    ) -> Result<ShellStream<TcpStream>> {
        let mut socket = self.open_socket().await?;
        socket.set_device(serial).await?;
        socket.into_shell(command).await
    }

    /// Run a command under `exec:` (no pty).
    pub async fn open_exec(
        &self,
        serial: Option<&str>,
        command: &str,
    ) -> Result<ShellStream<TcpStream>> {
        let mut socket = self.open_socket().await?;
        socket.set_device(serial).await?;
        socket.into_exec(command).await
    }

    /// Run a shell command to completion and collect its output.
    pub async fn shell_output(&self, serial: Option<&str>, command: &str) -> Result<String> {
        let mut shell = self.open_shell(serial, command).await?;
        let output = shell.read_to_string().await?;
        debug!("shell {:?} produced {} bytes", command, output.len());
        Ok(output)
    }

    /// Enter the sync subprotocol on a device.
    pub async fn open_sync(&self, serial: Option<&str>) -> Result<SyncSession<TcpStream>> {
        let mut socket = self.open_socket().await?;
        socket.set_device(serial).await?;
        socket.into_sync().await
    }
}
