// MIT License - Copyright (c) 2026 Peter Wright
// adbh: command-line front end for adb-host-bridge

use std::path::PathBuf;
use std::time::SystemTime;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use adb_host_bridge::{ClientConfig, HostConnection, ServerSupervisor, TransferProgress};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "adbh")]
#[command(about = "Talk to a local ADB host server over TCP")]
struct Cli {
    /// Path to an optional TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Daemon host, optionally as host:port
    #[arg(long)]
    host: Option<String>,

    /// Daemon TCP port
    #[arg(long)]
    port: Option<u16>,

    /// Device serial to bind device-directed commands to
    #[arg(short = 's', long)]
    serial: Option<String>,

    /// Explicit path to the adb binary
    #[arg(long)]
    adb: Option<PathBuf>,

    /// Do not start the local daemon before connecting
    #[arg(long)]
    no_server_start: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the adb binary version and the daemon protocol version
    Version,
    /// Start the local adb server (with wedged-daemon recovery)
    StartServer,
    /// Force-restart the local adb server
    RestartServer,
    /// Ask the daemon to exit
    KillServer,
    /// Run a shell command on the device and print its output
    Shell {
        /// The command line to run remotely
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// Copy a local file to the device
    Push {
        local: PathBuf,
        remote: String,
        /// POSIX mode for the created file, octal
        #[arg(long, default_value = "644")]
        mode: String,
    },
    /// Copy a file from the device
    Pull { remote: String, local: PathBuf },
    /// Stat a remote path
    Stat { path: String },
    /// List a remote directory
    Ls { path: String },
}

// ---------------------------------------------------------------------------
// Config file
// ---------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
struct FileConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    adb_path: Option<PathBuf>,
    #[serde(default)]
    read_timeout_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    5037
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let file: FileConfig = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read config file {}", path.display()))?;
            toml::from_str(&text)
                .with_context(|| format!("cannot parse config file {}", path.display()))?
        }
        None => FileConfig {
            host: default_host(),
            port: default_port(),
            ..FileConfig::default()
        },
    };

    let mut builder = ClientConfig::builder()
        .host(cli.host.clone().unwrap_or(file.host))
        .port(cli.port.unwrap_or(file.port))
        .read_timeout_ms(file.read_timeout_ms)
        .auto_start_server(!cli.no_server_start);
    if let Some(path) = cli.adb.clone().or(file.adb_path) {
        builder = builder.adb_path(path);
    }
    Ok(builder.build())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let serial = cli.serial.clone();

    match cli.command {
        Commands::Version => {
            let supervisor = ServerSupervisor::locate(&config)?;
            let version = supervisor.get_version().await?;
            println!("adb binary {}", version);

            if config.auto_start_server {
                supervisor.start_server().await?;
            }
            let bridge = connect_without_autostart(config).await?;
            let protocol = bridge.host_version().await?;
            println!("daemon protocol {:#06x}", protocol);
        }
        Commands::StartServer => {
            let supervisor = ServerSupervisor::locate(&config)?;
            supervisor.get_version().await?;
            supervisor.start_server().await?;
            info!("server started");
        }
        Commands::RestartServer => {
            let supervisor = ServerSupervisor::locate(&config)?;
            supervisor.restart_server().await?;
            info!("server restarted");
        }
        Commands::KillServer => {
            let bridge = connect_without_autostart(config).await?;
            bridge.kill_server().await?;
            info!("kill request sent");
        }
        Commands::Shell { command } => {
            let bridge = HostConnection::connect(config).await?;
            let output = bridge
                .shell_output(serial.as_deref(), &command.join(" "))
                .await?;
            print!("{}", output);
        }
        Commands::Push {
            local,
            remote,
            mode,
        } => {
            let mode = u32::from_str_radix(&mode, 8)
                .with_context(|| format!("invalid octal mode {:?}", mode))?;
            let bridge = HostConnection::connect(config).await?;

            let metadata = tokio::fs::metadata(&local)
                .await
                .with_context(|| format!("cannot stat {}", local.display()))?;
            let mtime = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as u32)
                .unwrap_or(0);
            let source = tokio::fs::File::open(&local)
                .await
                .with_context(|| format!("cannot open {}", local.display()))?;

            let mut sync = bridge.open_sync(serial.as_deref()).await?;
            let sent = sync
                .push_with_progress(
                    source,
                    &remote,
                    mode,
                    mtime,
                    Some(metadata.len()),
                    print_progress(),
                )
                .await?;
            sync.quit().await?;
            eprintln!();
            println!("pushed {} bytes to {}", sent, remote);
        }
        Commands::Pull { remote, local } => {
            let bridge = HostConnection::connect(config).await?;

            let mut sync = bridge.open_sync(serial.as_deref()).await?;
            let stat = sync.stat(&remote).await?;
            anyhow::ensure!(stat.exists(), "{}: no such file on device", remote);

            let mut dest = tokio::fs::File::create(&local)
                .await
                .with_context(|| format!("cannot create {}", local.display()))?;
            let received = sync
                .pull_with_progress(
                    &remote,
                    &mut dest,
                    Some(stat.size as u64),
                    print_progress(),
                )
                .await?;
            dest.flush().await?;
            sync.quit().await?;
            eprintln!();
            println!("pulled {} bytes to {}", received, local.display());
        }
        Commands::Stat { path } => {
            let bridge = HostConnection::connect(config).await?;
            let mut sync = bridge.open_sync(serial.as_deref()).await?;
            let stat = sync.stat(&path).await?;
            sync.quit().await?;

            if !stat.exists() {
                anyhow::bail!("{}: no such file on device", path);
            }
            println!("mode:  {:o}", stat.mode.bits());
            println!("size:  {}", stat.size);
            match stat.modified() {
                Some(when) => println!("mtime: {}", when),
                None => println!("mtime: unknown"),
            }
        }
        Commands::Ls { path } => {
            let bridge = HostConnection::connect(config).await?;
            let mut sync = bridge.open_sync(serial.as_deref()).await?;
            let entries = sync.list(&path).await?;
            sync.quit().await?;

            for entry in entries {
                let kind = if entry.mode.is_directory() {
                    'd'
                } else if entry.mode.is_symlink() {
                    'l'
                } else {
                    '-'
                };
                println!(
                    "{}{:04o} {:>10} {}",
                    kind,
                    entry.mode.permissions(),
                    entry.size,
                    entry.name
                );
            }
        }
    }

    Ok(())
}

async fn connect_without_autostart(mut config: ClientConfig) -> Result<HostConnection> {
    // Killing the server must not race a fresh auto-start.
    config.auto_start_server = false;
    Ok(HostConnection::connect(config).await?)
}

/// Progress callback that redraws a percentage on stderr.
fn print_progress() -> impl FnMut(TransferProgress) {
    let mut last = u8::MAX;
    move |p: TransferProgress| {
        let percent = p.percent();
        if percent != last {
            last = percent;
            eprint!("\r{:>3}%", percent);
        }
    }
}
