//! Bridge configuration.
//!
//! Values come from an optional TOML file, then CLI flags override them.
//! Every field has a default, so an empty file (or no file) is valid.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use clap::Args;
use serde::{Deserialize, Serialize};
use wsbridge_core::defaults;

use crate::error::BridgeError;

/// Top-level bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Interface the TCP listener binds to.
    #[serde(default = "default_listen")]
    pub listen: IpAddr,

    /// TCP port accepting stream clients.
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,

    /// WebSocket URL each session connects to.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// WebSocket handshake timeout (seconds, 0 = no timeout).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Read buffer size of the stream leg (bytes).
    #[serde(default = "default_relay_buffer_size")]
    pub relay_buffer_size: usize,

    /// Max WebSocket frame/message size (bytes, 0 = library default).
    #[serde(default)]
    pub ws_max_frame_bytes: usize,

    /// TCP listener backlog.
    #[serde(default = "default_backlog")]
    pub backlog: u32,

    /// Set TCP_NODELAY on accepted and outbound sockets.
    #[serde(default = "default_tcp_no_delay")]
    pub tcp_no_delay: bool,

    /// How long shutdown waits for sessions to drain (seconds).
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BridgeConfig {
    /// Full listen socket address.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen, self.tcp_port)
    }

    /// Connect timeout, `None` when disabled.
    pub fn connect_timeout(&self) -> Option<Duration> {
        match self.connect_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            tcp_port: default_tcp_port(),
            ws_url: default_ws_url(),
            connect_timeout_secs: default_connect_timeout(),
            relay_buffer_size: default_relay_buffer_size(),
            ws_max_frame_bytes: defaults::DEFAULT_WS_MAX_FRAME_BYTES,
            backlog: default_backlog(),
            tcp_no_delay: default_tcp_no_delay(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base level or full filter directive (e.g. "info", "wsbridge_server=debug").
    #[serde(default)]
    pub level: Option<String>,
    /// Output format: "pretty", "compact" or "json".
    #[serde(default)]
    pub format: Option<String>,
}

/// CLI flags that override file configuration.
#[derive(Args, Debug, Clone, Default)]
pub struct CliOverrides {
    /// Port for stream (TCP) clients [default: 25565]
    #[arg(long, value_name = "PORT")]
    pub tcp_port: Option<u16>,

    /// WebSocket URL every session connects to [default: ws://localhost:8080]
    #[arg(long, value_name = "URL")]
    pub ws_url: Option<String>,

    /// Interface to listen on [default: 0.0.0.0]
    #[arg(long, value_name = "IP")]
    pub listen: Option<IpAddr>,

    /// WebSocket connect timeout in seconds, 0 disables it [default: 10]
    #[arg(long, value_name = "SECS")]
    pub connect_timeout_secs: Option<u64>,

    /// Log level override (e.g. "info", "debug", "trace")
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format override ("pretty", "compact", "json")
    #[arg(long)]
    pub log_format: Option<String>,
}

/// Load configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<BridgeConfig, BridgeError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| BridgeError::Config(format!("failed to read {}: {e}", path.display())))?;
    toml::from_str(&raw)
        .map_err(|e| BridgeError::Config(format!("failed to parse {}: {e}", path.display())))
}

/// Apply CLI overrides on top of loaded configuration.
pub fn apply_overrides(config: &mut BridgeConfig, overrides: &CliOverrides) {
    if let Some(port) = overrides.tcp_port {
        config.tcp_port = port;
    }
    if let Some(url) = &overrides.ws_url {
        config.ws_url = url.clone();
    }
    if let Some(listen) = overrides.listen {
        config.listen = listen;
    }
    if let Some(secs) = overrides.connect_timeout_secs {
        config.connect_timeout_secs = secs;
    }
    if let Some(level) = &overrides.log_level {
        config.logging.level = Some(level.clone());
    }
    if let Some(format) = &overrides.log_format {
        config.logging.format = Some(format.clone());
    }
}

/// Reject configurations the bridge cannot start with.
///
/// The WebSocket URL is only checked for presence here; a malformed URL is a
/// per-session connect failure.
pub fn validate_config(config: &BridgeConfig) -> Result<(), BridgeError> {
    if config.ws_url.trim().is_empty() {
        return Err(BridgeError::Config("ws_url must not be empty".into()));
    }
    if config.relay_buffer_size == 0 {
        return Err(BridgeError::Config("relay_buffer_size must be non-zero".into()));
    }
    if config.backlog == 0 {
        return Err(BridgeError::Config("backlog must be non-zero".into()));
    }
    if let Some(format) = config.logging.format.as_deref() {
        if !matches!(format, "pretty" | "compact" | "json") {
            return Err(BridgeError::Config(format!("unknown log format: {format}")));
        }
    }
    Ok(())
}

fn default_listen() -> IpAddr {
    defaults::DEFAULT_LISTEN_ADDR
        .parse()
        .unwrap_or(IpAddr::from([0, 0, 0, 0]))
}
fn default_tcp_port() -> u16 {
    defaults::DEFAULT_TCP_PORT
}
fn default_ws_url() -> String {
    defaults::DEFAULT_WS_URL.to_string()
}
fn default_connect_timeout() -> u64 {
    defaults::DEFAULT_CONNECT_TIMEOUT_SECS
}
fn default_relay_buffer_size() -> usize {
    defaults::DEFAULT_RELAY_BUFFER_SIZE
}
fn default_backlog() -> u32 {
    defaults::DEFAULT_CONNECTION_BACKLOG
}
fn default_tcp_no_delay() -> bool {
    defaults::DEFAULT_TCP_NO_DELAY
}
fn default_shutdown_timeout() -> u64 {
    defaults::DEFAULT_SHUTDOWN_TIMEOUT_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: BridgeConfig = toml::from_str("").unwrap();
        assert_eq!(config.tcp_port, 25565);
        assert_eq!(config.ws_url, "ws://localhost:8080");
        assert_eq!(config.listen_addr(), "0.0.0.0:25565".parse().unwrap());
        assert_eq!(config.connect_timeout(), Some(Duration::from_secs(10)));
        assert!(config.tcp_no_delay);
    }

    #[test]
    fn parse_bridge_config() {
        let toml_str = r#"
listen = "127.0.0.1"
tcp_port = 25566
ws_url = "ws://127.0.0.1:9000/game"
connect_timeout_secs = 0

[logging]
level = "debug"
format = "json"
"#;
        let config: BridgeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:25566".parse().unwrap());
        assert_eq!(config.ws_url, "ws://127.0.0.1:9000/game");
        assert_eq!(config.connect_timeout(), None);
        assert_eq!(config.logging.format.as_deref(), Some("json"));
        assert_eq!(config.shutdown_timeout_secs, 30); // default
        validate_config(&config).unwrap();
    }

    #[test]
    fn overrides_win_over_file() {
        let mut config = BridgeConfig::default();
        let overrides = CliOverrides {
            tcp_port: Some(4000),
            ws_url: Some("ws://example.test:1234".into()),
            log_level: Some("trace".into()),
            ..CliOverrides::default()
        };
        apply_overrides(&mut config, &overrides);
        assert_eq!(config.tcp_port, 4000);
        assert_eq!(config.ws_url, "ws://example.test:1234");
        assert_eq!(config.logging.level.as_deref(), Some("trace"));
        // untouched
        assert_eq!(config.connect_timeout_secs, 10);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = BridgeConfig::default();
        config.ws_url = "  ".into();
        assert!(matches!(validate_config(&config), Err(BridgeError::Config(_))));

        let mut config = BridgeConfig::default();
        config.relay_buffer_size = 0;
        assert!(validate_config(&config).is_err());

        let mut config = BridgeConfig::default();
        config.logging.format = Some("xml".into());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        std::fs::write(&path, "tcp_port = 7000\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.tcp_port, 7000);

        let missing = dir.path().join("missing.toml");
        assert!(matches!(load_config(&missing), Err(BridgeError::Config(_))));
    }

    #[test]
    fn unknown_field_type_is_error() {
        let result: Result<BridgeConfig, _> = toml::from_str("tcp_port = \"abc\"");
        assert!(result.is_err());
    }
}
