//! Shared request/response types for daemon IPC.
//!
//! Serialized as JSON over the Unix domain socket. Status events on
//! `/events` use [`StatusEvent`](crate::codec::StatusEvent) directly.

use serde::{Deserialize, Serialize};

use crate::codec::Params;

/// Daemon health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub git_hash: String,
    pub build_profile: String,
}

/// Daemon runtime status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub running: bool,
    pub version: String,
    pub git_hash: String,
    pub uptime_secs: u64,
    pub endpoint: String,
    pub link_state: String,
    pub link_id: Option<u64>,
    pub connect_attempts: u64,
    /// Seconds since the last inbound frame, if any arrived on this link.
    pub last_activity_secs: Option<u64>,
    pub front_ends: usize,
    pub log_level: String,
    pub pid: u32,
}

/// Whether the controller link is up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionResponse {
    pub connected: bool,
    pub state: String,
    pub endpoint: String,
}

/// A command to forward to the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub params: Params,
}

/// Outcome of a forwarded command.
///
/// A rejection is a normal outcome and is returned with `accepted: false`
/// rather than an HTTP error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub retryable: bool,
}

/// Daemon shutdown response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResponse {
    pub acknowledged: bool,
    pub message: String,
}

/// Log entry from the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
}

/// Log listing response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsResponse {
    pub entries: Vec<LogEntry>,
    pub total: usize,
}

/// Configuration response (serialized TOML).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigResponse {
    pub toml: String,
}

/// Generic error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
