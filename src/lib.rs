// MIT License - Copyright (c) 2026 Peter Wright
//
//! # adb-host-bridge
//!
//! Direct TCP communication with a local (or remote) ADB host server:
//! the framed host protocol, the sync file-transfer subprotocol, shell
//! streams, and a supervisor for the local `adb` binary. This crate
//! talks to the daemon, never to devices directly.
//!
//! ## Quick Start
//!
//! ```no_run
//! use adb_host_bridge::{ClientConfig, HostConnection};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::builder()
//!         .host("127.0.0.1")
//!         .port(5037)
//!         .auto_start_server(true)
//!         .build();
//!
//!     let bridge = HostConnection::connect(config).await?;
//!
//!     println!("daemon protocol version {:#06x}", bridge.host_version().await?);
//!
//!     let listing = bridge.shell_output(Some("emulator-5554"), "ls /sdcard").await?;
//!     println!("{listing}");
//!
//!     let mut sync = bridge.open_sync(Some("emulator-5554")).await?;
//!     let stat = sync.stat("/sdcard/Download/report.pdf").await?;
//!     let mut local = tokio::fs::File::create("report.pdf").await?;
//!     sync.pull_with_progress(
//!         "/sdcard/Download/report.pdf",
//!         &mut local,
//!         Some(stat.size as u64),
//!         |p| println!("{}%", p.percent()),
//!     )
//!     .await?;
//!     sync.quit().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod server;
pub mod shell;
pub mod socket;
pub mod sync;

// Re-exports for convenience
pub use client::HostConnection;
pub use config::{parse_host_port, ClientConfig, ClientConfigBuilder};
pub use error::{AdbError, Result};
pub use protocol::{AdbResponse, AdbVersion, HostRequest};
pub use server::ServerSupervisor;
pub use shell::ShellStream;
pub use socket::{AdbSocket, SocketMode};
pub use sync::{DirEntry, FileMode, FileStat, SyncCommand, SyncSession, TransferProgress};
