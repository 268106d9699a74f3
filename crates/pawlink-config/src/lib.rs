#![deny(unsafe_code)]

//! Configuration loading and validation for PawLink.
//!
//! Loads TOML configuration files and validates them. [`AppConfig`] is the
//! central configuration structure shared by the bridge daemon, the CLI and
//! the remote-side heartbeat service.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Controller link configuration.
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Status fan-out configuration.
    #[serde(default)]
    pub fanout: FanoutConfig,

    /// Command dispatcher configuration.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Remote-side heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Daemon (local IPC) configuration.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection settings for the link to the robot controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Controller endpoint as `host:port`, or a full `ws://` / `wss://` URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Fixed delay before every reconnect attempt, in milliseconds.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Upper bound on a single connection attempt, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl ControllerConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

fn default_endpoint() -> String {
    "localhost:8765".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

/// Status fan-out configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutConfig {
    /// Per-front-end buffer capacity. A front-end whose buffer fills up is
    /// detached.
    #[serde(default = "default_fanout_buffer")]
    pub buffer: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            buffer: default_fanout_buffer(),
        }
    }
}

fn default_fanout_buffer() -> usize {
    64
}

/// Command dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Check parameters of the well-known commands (`move`, `autonomous`,
    /// `heartbeat`) before they are written to the link.
    #[serde(default = "default_true")]
    pub validate_known_commands: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            validate_known_commands: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Heartbeat configuration for the remote-hardware side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Identifier announced in every heartbeat.
    #[serde(default = "default_remote_id")]
    pub remote_id: String,

    /// Interval between heartbeats, in milliseconds.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub interval_ms: u64,

    /// Signal strength reported until the hardware supplies a measurement
    /// (dBm).
    #[serde(default = "default_signal_strength")]
    pub signal_strength: f64,
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            remote_id: default_remote_id(),
            interval_ms: default_heartbeat_interval_ms(),
            signal_strength: default_signal_strength(),
        }
    }
}

fn default_remote_id() -> String {
    "remote-01".to_string()
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_signal_strength() -> f64 {
    -50.0
}

/// Configuration for the bridge daemon's local control socket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Path of the Unix socket serving the local IPC API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Number of log entries kept in memory for the `/logs` endpoint.
    #[serde(default = "default_capture_capacity")]
    pub capture_capacity: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            capture_capacity: default_capture_capacity(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_capture_capacity() -> usize {
    500
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "Loading configuration");
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_endpoint(&self.controller.endpoint)?;
        if self.controller.reconnect_delay_ms == 0 {
            return Err(ConfigError::Validation(
                "controller.reconnect_delay_ms must be non-zero".to_string(),
            ));
        }
        if self.controller.connect_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "controller.connect_timeout_ms must be non-zero".to_string(),
            ));
        }

        if self.fanout.buffer == 0 {
            return Err(ConfigError::Validation(
                "fanout.buffer must be at least 1".to_string(),
            ));
        }

        if self.heartbeat.remote_id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "heartbeat.remote_id must not be empty".to_string(),
            ));
        }
        if self.heartbeat.interval_ms == 0 {
            return Err(ConfigError::Validation(
                "heartbeat.interval_ms must be non-zero".to_string(),
            ));
        }
        if !self.heartbeat.signal_strength.is_finite() {
            return Err(ConfigError::Validation(
                "heartbeat.signal_strength must be a finite number".to_string(),
            ));
        }

        if let Some(path) = &self.daemon.socket_path
            && path.is_empty()
        {
            return Err(ConfigError::Validation(
                "daemon.socket_path must not be empty when set".to_string(),
            ));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                valid_levels, self.logging.level
            )));
        }
        if self.logging.capture_capacity == 0 {
            return Err(ConfigError::Validation(
                "logging.capture_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Accepts `host:port` or a `ws://` / `wss://` URL.
fn validate_endpoint(endpoint: &str) -> Result<(), ConfigError> {
    if endpoint.is_empty() {
        return Err(ConfigError::Validation(
            "controller.endpoint must not be empty".to_string(),
        ));
    }
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        return Ok(());
    }
    let Some((host, port)) = endpoint.rsplit_once(':') else {
        return Err(ConfigError::Validation(format!(
            "controller.endpoint must be host:port, got {endpoint:?}"
        )));
    };
    if host.is_empty() {
        return Err(ConfigError::Validation(format!(
            "controller.endpoint has an empty host: {endpoint:?}"
        )));
    }
    match port.parse::<u16>() {
        Ok(p) if p != 0 => Ok(()),
        _ => Err(ConfigError::Validation(format!(
            "controller.endpoint has an invalid port: {endpoint:?}"
        ))),
    }
}
