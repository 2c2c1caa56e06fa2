// MIT License - Copyright (c) 2026 Peter Wright

use std::path::PathBuf;

use crate::constants::{
    DEFAULT_HOST, DEFAULT_PORT, DEFAULT_RECEIVE_BUFFER_SIZE, DEFAULT_WRITE_BUFFER_SIZE,
    REQUIRED_ADB_VERSION,
};
use crate::protocol::AdbVersion;

/// Configuration for talking to an adb host server.
///
/// Buffer sizes and timeouts are captured by each socket at construction
/// time; changing a config afterwards never affects a live socket.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Daemon host. May itself carry a `host:port` suffix, which takes
    /// precedence over [`ClientConfig::port`] when the suffix parses as
    /// a port number.
    pub host: String,
    /// Daemon TCP port (default: 5037).
    pub port: u16,
    /// Per-iteration read buffer for the framing socket.
    pub receive_buffer_size: usize,
    /// Initial capacity of the request-encoding buffer.
    pub write_buffer_size: usize,
    /// Socket read timeout in milliseconds; 0 disables the timeout.
    pub read_timeout_ms: u64,
    /// Explicit path to the adb binary. When absent the supervisor
    /// searches `PATH`.
    pub adb_path: Option<PathBuf>,
    /// Whether connecting should first version-check and start the
    /// local daemon through the supervisor.
    pub auto_start_server: bool,
    /// Minimum acceptable `adb version` triple.
    pub required_version: AdbVersion,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            read_timeout_ms: 0,
            adb_path: None,
            auto_start_server: false,
            required_version: REQUIRED_ADB_VERSION,
        }
    }
}

impl ClientConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// The effective `(host, port)` pair after splitting any `host:port`
    /// form carried in [`ClientConfig::host`].
    pub fn endpoint(&self) -> (String, u16) {
        parse_host_port(&self.host, self.port)
    }
}

/// Split a `"host:port"` string on the first colon. If there is no colon,
/// or the suffix is not a valid port number, the default port applies.
pub fn parse_host_port(host: &str, default_port: u16) -> (String, u16) {
    match host.split_once(':') {
        Some((name, suffix)) => match suffix.parse::<u16>() {
            Ok(port) => (name.to_string(), port),
            Err(_) => (name.to_string(), default_port),
        },
        None => (host.to_string(), default_port),
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn receive_buffer_size(mut self, size: usize) -> Self {
        self.config.receive_buffer_size = size;
        self
    }

    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.config.write_buffer_size = size;
        self
    }

    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    pub fn adb_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.adb_path = Some(path.into());
        self
    }

    pub fn auto_start_server(mut self, auto_start: bool) -> Self {
        self.config.auto_start_server = auto_start;
        self
    }

    pub fn required_version(mut self, version: AdbVersion) -> Self {
        self.config.required_version = version;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_port() {
        assert_eq!(
            parse_host_port("example.com", 5037),
            ("example.com".to_string(), 5037)
        );
        assert_eq!(
            parse_host_port("example.com:1234", 5037),
            ("example.com".to_string(), 1234)
        );
        assert_eq!(
            parse_host_port("example.com:notaport", 5037),
            ("example.com".to_string(), 5037)
        );
        // Out-of-range ports fall back too.
        assert_eq!(
            parse_host_port("example.com:65536", 5037),
            ("example.com".to_string(), 5037)
        );
    }

    #[test]
    fn test_endpoint_prefers_embedded_port() {
        let config = ClientConfig::builder().host("10.0.0.1:5038").build();
        assert_eq!(config.endpoint(), ("10.0.0.1".to_string(), 5038));

        let config = ClientConfig::builder().host("10.0.0.1").port(5555).build();
        assert_eq!(config.endpoint(), ("10.0.0.1".to_string(), 5555));
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 5037);
        assert_eq!(config.receive_buffer_size, 40960);
        assert_eq!(config.write_buffer_size, 1024);
        assert!(!config.auto_start_server);
    }

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::builder()
            .host("192.168.1.20")
            .port(5038)
            .read_timeout_ms(30000)
            .auto_start_server(true)
            .build();

        assert_eq!(config.host, "192.168.1.20");
        assert_eq!(config.port, 5038);
        assert_eq!(config.read_timeout_ms, 30000);
        assert!(config.auto_start_server);
    }
}
