//! Wire codec for controller commands and status messages.
//!
//! Every frame on the link is a single JSON object. Outbound frames have
//! the shape `{"command": <name>, "params": {...}}`; inbound frames are
//! arbitrary objects that are forwarded verbatim as [`StatusPayload`]s.
//! The codec never validates command-specific parameter schemas.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Errors produced while encoding or decoding frames.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("failed to encode command: {0}")]
    Encode(String),
}

/// A scalar command parameter.
///
/// Numbers keep their JSON representation, so an integer parameter is
/// written back as an integer and a float as a float.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(Number),
    String(String),
}

impl ParamValue {
    /// Build a numeric value. Non-finite input is encoded as `0`.
    pub fn number(value: f64) -> Self {
        Self::Number(Number::from_f64(value).unwrap_or_else(|| Number::from(0)))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Name of the scalar kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// Loose parsing used for `key=value` parameters typed by an operator:
/// `true`/`false` become booleans, anything that parses as a JSON number
/// becomes a number, everything else is a string.
impl FromStr for ParamValue {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "true" => return Ok(Self::Bool(true)),
            "false" => return Ok(Self::Bool(false)),
            _ => {}
        }
        if let Ok(Value::Number(n)) = serde_json::from_str::<Value>(s) {
            return Ok(Self::Number(n));
        }
        Ok(Self::String(s.to_string()))
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::number(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Number(Number::from(value))
    }
}

impl From<u64> for ParamValue {
    fn from(value: u64) -> Self {
        Self::Number(Number::from(value))
    }
}

/// Command parameters keyed by name.
pub type Params = BTreeMap<String, ParamValue>;

/// Movement directions understood by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
}

impl Direction {
    pub const ALL: [Direction; 5] = [
        Direction::Forward,
        Direction::Backward,
        Direction::Left,
        Direction::Right,
        Direction::Stop,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Stop => "stop",
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Direction::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| format!("unknown direction {s:?}"))
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Camera actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraAction {
    Photo,
    StartStream,
    StopStream,
}

impl CameraAction {
    pub fn as_str(self) -> &'static str {
        match self {
            CameraAction::Photo => "photo",
            CameraAction::StartStream => "start_stream",
            CameraAction::StopStream => "stop_stream",
        }
    }
}

/// A request to the controller: an operation name plus scalar parameters.
///
/// Commands are immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    command: String,
    #[serde(default)]
    params: Params,
}

impl Command {
    /// A command with no parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            command: name.into(),
            params: Params::new(),
        }
    }

    pub fn from_parts(name: impl Into<String>, params: Params) -> Self {
        Self {
            command: name.into(),
            params,
        }
    }

    /// Return a copy of this command with one more parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.command
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn param(&self, key: &str) -> Option<&ParamValue> {
        self.params.get(key)
    }

    pub fn into_parts(self) -> (String, Params) {
        (self.command, self.params)
    }

    // ── Commands observed on the wire ─────────────────────────────────

    /// `move` with a direction and a speed in `[0.0, 1.0]` (clamped).
    pub fn movement(direction: Direction, speed: f64) -> Self {
        let speed = if speed.is_finite() {
            speed.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self::new("move")
            .with_param("direction", direction.as_str())
            .with_param("speed", speed)
    }

    pub fn stop() -> Self {
        Self::new("move").with_param("direction", Direction::Stop.as_str())
    }

    pub fn camera(action: CameraAction) -> Self {
        Self::new("camera").with_param("action", action.as_str())
    }

    pub fn autonomous(enabled: bool) -> Self {
        Self::new("autonomous").with_param("enabled", enabled)
    }

    pub fn analyze_scene() -> Self {
        Self::new("ai").with_param("action", "analyze_scene")
    }

    pub fn voice_command(text: impl Into<String>) -> Self {
        Self::new("ai")
            .with_param("action", "voice_command")
            .with_param("text", text.into())
    }

    pub fn location() -> Self {
        Self::new("gps").with_param("action", "get_location")
    }

    pub fn navigate(latitude: f64, longitude: f64) -> Self {
        Self::new("gps")
            .with_param("action", "navigate")
            .with_param("latitude", latitude)
            .with_param("longitude", longitude)
    }

    pub fn status() -> Self {
        Self::new("status")
    }

    /// Liveness beacon sent by the remote hardware.
    pub fn heartbeat(remote_id: impl Into<String>, signal_strength: f64) -> Self {
        Self::new("heartbeat")
            .with_param("remote_id", remote_id.into())
            .with_param("signal_strength", signal_strength)
    }
}

/// Encode a command as a single text frame.
pub fn encode(command: &Command) -> Result<String, CodecError> {
    serde_json::to_string(command).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode an inbound frame. Anything that is not a JSON object is
/// malformed; unknown keys are kept as-is.
pub fn decode(frame: &str) -> Result<StatusPayload, CodecError> {
    let value: Value =
        serde_json::from_str(frame).map_err(|e| CodecError::Malformed(e.to_string()))?;
    match value {
        Value::Object(fields) => Ok(StatusPayload { fields }),
        other => Err(CodecError::Malformed(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

/// Decode a frame in outbound shape back into a [`Command`].
pub fn decode_command(frame: &str) -> Result<Command, CodecError> {
    serde_json::from_str(frame).map_err(|e| CodecError::Malformed(e.to_string()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A decoded inbound message, forwarded verbatim from the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusPayload {
    fields: Map<String, Value>,
}

/// Shapes of inbound payloads the controller is known to send.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PayloadKind<'a> {
    /// `{"robot_status": {...}}`, possibly alongside `"status"`.
    RobotStatus(&'a Map<String, Value>),
    /// `{"type": "status_update", "data": {...}}`.
    StatusUpdate(&'a Map<String, Value>),
    /// `{"type": "camera_frame", "data": ...}`.
    CameraFrame(&'a Value),
    /// `{"status": "success" | "error", ...}`.
    Reply { success: bool },
    Other,
}

impl StatusPayload {
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn kind(&self) -> PayloadKind<'_> {
        if let Some(Value::Object(status)) = self.fields.get("robot_status") {
            return PayloadKind::RobotStatus(status);
        }
        match self.fields.get("type").and_then(Value::as_str) {
            Some("status_update") => {
                if let Some(Value::Object(data)) = self.fields.get("data") {
                    return PayloadKind::StatusUpdate(data);
                }
            }
            Some("camera_frame") => {
                if let Some(data) = self.fields.get("data") {
                    return PayloadKind::CameraFrame(data);
                }
            }
            _ => {}
        }
        match self.fields.get("status").and_then(Value::as_str) {
            Some("success") => PayloadKind::Reply { success: true },
            Some("error") => PayloadKind::Reply { success: false },
            _ => PayloadKind::Other,
        }
    }

    /// Robot telemetry carried by this payload, if any.
    pub fn robot_status(&self) -> Option<&Map<String, Value>> {
        match self.kind() {
            PayloadKind::RobotStatus(status) | PayloadKind::StatusUpdate(status) => Some(status),
            _ => None,
        }
    }

    pub fn battery(&self) -> Option<f64> {
        self.robot_status()?.get("battery")?.as_f64()
    }

    /// Autonomous-mode flag from telemetry, or from the controller's reply
    /// to an `autonomous` command.
    pub fn autonomous_mode(&self) -> Option<bool> {
        self.robot_status()
            .and_then(|s| s.get("autonomous_mode"))
            .or_else(|| self.fields.get("autonomous_mode"))
            .and_then(Value::as_bool)
    }

    /// The controller's error message for an error reply.
    pub fn error_message(&self) -> Option<&str> {
        match self.kind() {
            PayloadKind::Reply { success: false } => {
                self.fields.get("message").and_then(Value::as_str)
            }
            _ => None,
        }
    }
}

/// A unit of information pushed to every attached front-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    /// The link to the controller came up.
    Connected { endpoint: String, link_id: u64 },
    /// An established link was lost.
    Disconnected { reason: String },
    /// A connection attempt failed.
    Error { reason: String },
    /// A message from the controller.
    Payload { payload: StatusPayload },
}

impl StatusEvent {
    pub fn is_connectivity(&self) -> bool {
        !matches!(self, StatusEvent::Payload { .. })
    }

    pub fn payload(&self) -> Option<&StatusPayload> {
        match self {
            StatusEvent::Payload { payload } => Some(payload),
            _ => None,
        }
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusEvent::Connected { endpoint, .. } => write!(f, "connected to {endpoint}"),
            StatusEvent::Disconnected { reason } => write!(f, "disconnected: {reason}"),
            StatusEvent::Error { reason } => write!(f, "error: {reason}"),
            StatusEvent::Payload { payload } => {
                write!(f, "{}", Value::Object(payload.fields.clone()))
            }
        }
    }
}
