// MIT License - Copyright (c) 2026 Peter Wright
// Supervisor for the local adb daemon

use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::constants::{adb_executable_for, SERVER_PROCESS_TIMEOUT};
use crate::error::{AdbError, Result};
use crate::protocol::{parse_version_output, AdbVersion};

/// Captured output of one adb invocation.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

/// Locates, validates and runs the local `adb` binary: version checks,
/// `start-server`, and recovery when the daemon is wedged.
#[derive(Debug)]
pub struct ServerSupervisor {
    adb_path: PathBuf,
    required_version: AdbVersion,
}

impl ServerSupervisor {
    /// Validate `adb_path` for the current platform and build a
    /// supervisor with the default minimum version.
    pub fn new(adb_path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_options(
            adb_path,
            false,
            crate::constants::REQUIRED_ADB_VERSION,
        )
    }

    /// Like [`new`](Self::new), but `allow_any_name` skips the
    /// file-name check (not the existence check) for renamed binaries.
    pub fn with_options(
        adb_path: impl Into<PathBuf>,
        allow_any_name: bool,
        required_version: AdbVersion,
    ) -> Result<Self> {
        let adb_path = adb_path.into();
        let (expected, fold_case) = expected_executable()?;

        if !allow_any_name {
            let name = adb_path
                .file_name()
                .and_then(OsStr::to_str)
                .unwrap_or_default();
            let name_matches = if fold_case {
                name.eq_ignore_ascii_case(expected)
            } else {
                name == expected
            };
            if !name_matches {
                return Err(AdbError::InvalidAdbPath {
                    path: adb_path,
                    details: format!("file name must be {:?} on this platform", expected),
                });
            }
        }

        check_executable(&adb_path)?;

        Ok(Self {
            adb_path,
            required_version,
        })
    }

    /// Build a supervisor from a client config: the explicit
    /// `adb_path` when set, otherwise the first matching name on `PATH`.
    pub fn locate(config: &ClientConfig) -> Result<Self> {
        let path = match &config.adb_path {
            Some(path) => path.clone(),
            None => find_in_path()?,
        };
        Self::with_options(path, false, config.required_version)
    }

    pub fn adb_path(&self) -> &Path {
        &self.adb_path
    }

    pub fn required_version(&self) -> AdbVersion {
        self.required_version
    }

    /// Run `adb version` and parse the triple; rejects daemons older
    /// than the configured minimum.
    pub async fn get_version(&self) -> Result<AdbVersion> {
        let output = self.run_adb(&["version"]).await?;
        let found = parse_version_output(&output.stdout)?;
        if found < self.required_version {
            return Err(AdbError::VersionTooOld {
                found,
                required: self.required_version,
            });
        }
        info!("adb {} at {}", found, self.adb_path.display());
        Ok(found)
    }

    /// Run `adb start-server`. If it fails, terminate every stray adb
    /// process and try once more; the second failure propagates.
    pub async fn start_server(&self) -> Result<()> {
        match self.run_adb(&["start-server"]).await {
            Ok(_) => {
                debug!("adb server running");
                Ok(())
            }
            Err(AdbError::ProcessFailed { code, .. }) => {
                warn!(
                    "start-server exited with code {}, killing stray adb processes",
                    code
                );
                kill_stray_daemons().await;
                self.run_adb(&["start-server"]).await.map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    /// Force-restart the daemon: best-effort `kill-server`, then the
    /// [`start_server`](Self::start_server) recovery path.
    pub async fn restart_server(&self) -> Result<()> {
        if let Err(e) = self.run_adb(&["kill-server"]).await {
            debug!("kill-server failed (continuing): {}", e);
        }
        self.start_server().await
    }

    /// Run the adb binary with a hard five-second ceiling, capturing
    /// stdout and stderr line by line. Non-zero exit raises
    /// [`AdbError::ProcessFailed`].
    async fn run_adb(&self, args: &[&str]) -> Result<ProcessOutput> {
        let command_line = format!("{} {}", self.adb_path.display(), args.join(" "));
        debug!("running {}", command_line);

        let output = timeout(
            SERVER_PROCESS_TIMEOUT,
            Command::new(&self.adb_path)
                .args(args)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| AdbError::Timeout)?
        .map_err(AdbError::Io)?;

        let captured = ProcessOutput {
            stdout: to_lines(&output.stdout),
            stderr: to_lines(&output.stderr),
        };

        match output.status.code() {
            Some(0) => Ok(captured),
            code => {
                let code = code.unwrap_or(-1);
                warn!(
                    "{} exited with code {}: {:?}",
                    command_line, code, captured.stderr
                );
                Err(AdbError::ProcessFailed {
                    code,
                    command: command_line,
                })
            }
        }
    }
}

fn to_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(|line| line.to_string())
        .collect()
}

fn expected_executable() -> Result<(&'static str, bool)> {
    adb_executable_for(env::consts::OS).ok_or_else(|| AdbError::UnsupportedPlatform {
        os: env::consts::OS.to_string(),
    })
}

fn check_executable(path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(path).map_err(|_| AdbError::InvalidAdbPath {
        path: path.to_path_buf(),
        details: "file does not exist".to_string(),
    })?;
    if !metadata.is_file() {
        return Err(AdbError::InvalidAdbPath {
            path: path.to_path_buf(),
            details: "not a regular file".to_string(),
        });
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(AdbError::InvalidAdbPath {
                path: path.to_path_buf(),
                details: "not executable".to_string(),
            });
        }
    }
    Ok(())
}

/// Search `PATH` for the platform's adb executable name.
fn find_in_path() -> Result<PathBuf> {
    let (expected, _) = expected_executable()?;
    let path_var = env::var_os("PATH").unwrap_or_default();
    for dir in env::split_paths(&path_var) {
        let candidate = dir.join(expected);
        if check_executable(&candidate).is_ok() {
            return Ok(candidate);
        }
    }
    Err(AdbError::InvalidAdbPath {
        path: PathBuf::from(expected),
        details: "not found in PATH".to_string(),
    })
}

/// Terminate every local process named adb. Outcomes are ignored:
/// "already exited" and "cannot terminate" are both acceptable here,
/// the subsequent `start-server` retry is what decides success.
async fn kill_stray_daemons() {
    #[cfg(windows)]
    let result = Command::new("taskkill")
        .args(["/F", "/IM", "adb.exe", "/T"])
        .output()
        .await;
    #[cfg(not(windows))]
    let result = Command::new("pkill").args(["-x", "adb"]).output().await;

    match result {
        Ok(output) => debug!("stray-daemon cleanup exited with {}", output.status),
        Err(e) => debug!("stray-daemon cleanup unavailable: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_wrong_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("definitely-not-adb");
        std::fs::write(&path, b"").unwrap();

        let err = ServerSupervisor::new(&path).unwrap_err();
        assert!(matches!(err, AdbError::InvalidAdbPath { .. }));
    }

    #[test]
    fn test_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let (expected, _) = expected_executable().unwrap();
        let path = dir.path().join(expected);

        let err = ServerSupervisor::new(&path).unwrap_err();
        assert!(matches!(err, AdbError::InvalidAdbPath { .. }));
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        /// Stage an executable shell script named `adb` in a temp dir.
        fn fake_adb(dir: &tempfile::TempDir, script: &str) -> PathBuf {
            let path = dir.path().join("adb");
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
            path
        }

        #[test]
        fn test_rejects_non_executable_file() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("adb");
            std::fs::write(&path, b"#!/bin/sh\n").unwrap();
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o644);
            std::fs::set_permissions(&path, perms).unwrap();

            let err = ServerSupervisor::new(&path).unwrap_err();
            assert!(matches!(err, AdbError::InvalidAdbPath { .. }));
        }

        #[tokio::test]
        async fn test_get_version_parses_triple() {
            let dir = tempfile::tempdir().unwrap();
            let path = fake_adb(
                &dir,
                "echo 'Android Debug Bridge version 1.0.41'; echo 'Version 34.0.5-debian'",
            );
            let supervisor = ServerSupervisor::new(&path).unwrap();

            let version = supervisor.get_version().await.unwrap();
            assert_eq!(version, AdbVersion::new(1, 0, 41));
        }

        #[tokio::test]
        async fn test_get_version_too_old() {
            let dir = tempfile::tempdir().unwrap();
            let path = fake_adb(&dir, "echo 'Android Debug Bridge version 1.0.9'");
            let supervisor = ServerSupervisor::new(&path).unwrap();

            let err = supervisor.get_version().await.unwrap_err();
            assert!(matches!(
                err,
                AdbError::VersionTooOld { found, required }
                    if found == AdbVersion::new(1, 0, 9)
                        && required == AdbVersion::new(1, 0, 20)
            ));
        }

        #[tokio::test]
        async fn test_get_version_unparseable() {
            let dir = tempfile::tempdir().unwrap();
            let path = fake_adb(&dir, "echo 'no version here'");
            let supervisor = ServerSupervisor::new(&path).unwrap();

            let err = supervisor.get_version().await.unwrap_err();
            assert!(matches!(err, AdbError::VersionUnknown));
        }

        #[tokio::test]
        async fn test_nonzero_exit_raises_process_failed() {
            let dir = tempfile::tempdir().unwrap();
            let path = fake_adb(&dir, "echo 'cannot bind' >&2; exit 3");
            let supervisor = ServerSupervisor::new(&path).unwrap();

            let err = supervisor.run_adb(&["version"]).await.unwrap_err();
            assert!(matches!(err, AdbError::ProcessFailed { code: 3, .. }));
        }

        #[tokio::test]
        async fn test_start_server_retries_after_cleanup() {
            // The script fails the first time and succeeds the second,
            // mimicking a wedged daemon cleared by the stray-kill pass.
            let dir = tempfile::tempdir().unwrap();
            let marker = dir.path().join("second-run");
            let path = fake_adb(
                &dir,
                &format!(
                    "if [ -e {m} ]; then exit 0; else touch {m}; exit 1; fi",
                    m = marker.display()
                ),
            );
            let supervisor = ServerSupervisor::new(&path).unwrap();

            supervisor.start_server().await.unwrap();
            assert!(marker.exists());
        }

        #[tokio::test]
        async fn test_start_server_second_failure_propagates() {
            let dir = tempfile::tempdir().unwrap();
            let path = fake_adb(&dir, "exit 1");
            let supervisor = ServerSupervisor::new(&path).unwrap();

            let err = supervisor.start_server().await.unwrap_err();
            assert!(matches!(err, AdbError::ProcessFailed { code: 1, .. }));
        }

        #[tokio::test]
        async fn test_allow_any_name_still_checks_existence() {
            let dir = tempfile::tempdir().unwrap();
            let missing = dir.path().join("renamed-adb");
            let err = ServerSupervisor::with_options(
                &missing,
                true,
                AdbVersion::new(1, 0, 20),
            )
            .unwrap_err();
            assert!(matches!(err, AdbError::InvalidAdbPath { .. }));
        }
    }
}
