//! Client configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (PREAMP_HOST, PREAMP_PORT)
//! - TOML configuration file
//! - Command line arguments (override both)

use crate::session::SessionOptions;
use anyhow::{Context, Result};
use preamp_protocol::{FrameCodec, GainEncoding};
use preamp_transport::tcp::{TcpConfig, DEFAULT_HOST, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host name or address of the unit.
    #[serde(default = "default_host")]
    pub host: String,

    /// Control port of the unit.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Protocol configuration.
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Send keep-alive frames while a session is open.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,
}

/// Protocol configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Gain layout of command frames.
    #[serde(default)]
    pub gain_encoding: GainEncoding,

    /// How long to wait for the unit's answer, in milliseconds.
    #[serde(default = "default_response_timeout")]
    pub response_timeout_ms: u64,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Disable Nagle's algorithm.
    #[serde(default = "default_true")]
    pub nodelay: bool,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("PREAMP_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string())
}

fn default_port() -> u16 {
    std::env::var("PREAMP_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

fn default_true() -> bool {
    true
}

fn default_heartbeat_interval() -> u64 {
    4_000
}

fn default_response_timeout() -> u64 {
    3_000
}

fn default_connect_timeout() -> u64 {
    5_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            heartbeat: HeartbeatConfig::default(),
            protocol: ProtocolConfig::default(),
            transport: TransportConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_heartbeat_interval(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            gain_encoding: GainEncoding::default(),
            response_timeout_ms: default_response_timeout(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            nodelay: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the first default location
    /// that exists, or fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or if
    /// an explicit path cannot be read.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        let config_paths = [
            "preamp.toml",
            "/etc/preamp/preamp.toml",
            "~/.config/preamp/preamp.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// The unit's endpoint as `host:port`.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Settings for the TCP transport.
    #[must_use]
    pub fn tcp_config(&self) -> TcpConfig {
        TcpConfig {
            host: self.host.clone(),
            port: self.port,
            connect_timeout: Duration::from_millis(self.transport.connect_timeout_ms),
            nodelay: self.transport.nodelay,
            gain_encoding: self.protocol.gain_encoding,
        }
    }

    /// Settings for a session. Polling callers turn the heartbeat off themselves.
    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            codec: FrameCodec::new(self.protocol.gain_encoding),
            heartbeat_interval: self
                .heartbeat
                .enabled
                .then(|| self.heartbeat_interval()),
            response_timeout: Duration::from_millis(self.protocol.response_timeout_ms),
            ..SessionOptions::default()
        }
    }

    /// Heartbeat and poll period.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat.interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.heartbeat.enabled);
        assert_eq!(config.heartbeat.interval_ms, 4000);
        assert_eq!(config.protocol.gain_encoding, GainEncoding::FixedTripleByte);
        assert_eq!(config.protocol.response_timeout_ms, 3000);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "10.0.0.5"
            port = 52000

            [heartbeat]
            interval_ms = 5000

            [protocol]
            gain_encoding = "per-input-variable-width"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.endpoint(), "10.0.0.5:52000");
        assert_eq!(config.heartbeat.interval_ms, 5000);
        assert_eq!(
            config.protocol.gain_encoding,
            GainEncoding::PerInputVariableWidth
        );
        assert_eq!(config.protocol.response_timeout_ms, 3000);
        assert!(config.transport.nodelay);
    }

    #[test]
    fn test_session_options_from_config() {
        let mut config = Config::default();
        config.protocol.gain_encoding = GainEncoding::PerInputVariableWidth;
        config.protocol.response_timeout_ms = 1500;

        let options = config.session_options();
        assert_eq!(
            options.codec.gain_encoding(),
            GainEncoding::PerInputVariableWidth
        );
        assert_eq!(options.response_timeout, Duration::from_millis(1500));
        assert_eq!(options.heartbeat_interval, Some(Duration::from_millis(4000)));

        config.heartbeat.enabled = false;
        assert_eq!(config.session_options().heartbeat_interval, None);
    }

    #[test]
    fn test_tcp_config_from_config() {
        let config: Config = toml::from_str(
            r#"
            host = "preamp.local"
            [protocol]
            gain_encoding = "per-input"
            [transport]
            connect_timeout_ms = 250
            nodelay = false
        "#,
        )
        .unwrap();

        let tcp = config.tcp_config();
        assert_eq!(tcp.host, "preamp.local");
        assert_eq!(tcp.connect_timeout, Duration::from_millis(250));
        assert!(!tcp.nodelay);
        assert_eq!(tcp.gain_encoding, GainEncoding::PerInputVariableWidth);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(Config::load(Some(Path::new("/nonexistent/preamp.toml"))).is_err());
    }
}
