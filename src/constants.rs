// MIT License - Copyright (c) 2026 Peter Wright

use std::time::Duration;

use crate::protocol::AdbVersion;

/// Four-byte status tokens of the host protocol.
pub const OKAY: &[u8; 4] = b"OKAY";
pub const FAIL: &[u8; 4] = b"FAIL";

/// Where the daemon listens unless told otherwise.
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5037;

pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 40960;
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 1024;

/// Largest payload the daemon accepts in a single sync DATA frame.
pub const MAX_SYNC_DATA: usize = 64 * 1024;

/// Hard ceiling on any supervisor invocation of the adb binary.
pub const SERVER_PROCESS_TIMEOUT: Duration = Duration::from_secs(5);

/// Oldest daemon the supervisor will talk to.
pub const REQUIRED_ADB_VERSION: AdbVersion = AdbVersion::new(1, 0, 20);

/// Diagnostic the daemon returns for an unknown transport serial.
/// Compared case-insensitively.
pub const DEVICE_NOT_FOUND: &str = "device not found";

/// Allowed adb executable name per OS family:
/// `(os, file name, compare case-insensitively)`.
///
/// Adding a platform is a row here, not a code change.
pub const ADB_EXECUTABLES: &[(&str, &str, bool)] = &[
    ("windows", "adb.exe", true),
    ("linux", "adb", false),
    ("macos", "adb", false),
    ("freebsd", "adb", false),
    ("android", "adb", false),
];

/// Look up the expected adb executable name for an OS family.
pub fn adb_executable_for(os: &str) -> Option<(&'static str, bool)> {
    ADB_EXECUTABLES
        .iter()
        .find(|(family, _, _)| *family == os)
        .map(|(_, name, fold_case)| (*name, *fold_case))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executable_table() {
        assert_eq!(adb_executable_for("windows"), Some(("adb.exe", true)));
        assert_eq!(adb_executable_for("linux"), Some(("adb", false)));
        assert_eq!(adb_executable_for("macos"), Some(("adb", false)));
        assert_eq!(adb_executable_for("redox"), None);
    }

    #[test]
    fn test_current_platform_is_supported() {
        // The table must cover every platform this crate is built for.
        assert!(adb_executable_for(std::env::consts::OS).is_some());
    }
}
