//! Command dispatcher: validates outbound commands and writes them to the
//! active link.
//!
//! Dispatch fails fast when the link is not connected. Nothing is buffered
//! across an outage; callers decide whether to re-issue.

use tracing::debug;

use pawlink_config::DispatchConfig;

use crate::codec::{self, Command, Direction, ParamValue};
use crate::error::BridgeError;
use crate::link::LinkHandle;

/// A command that was written to the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    /// Link the frame was written to.
    pub link_id: u64,
    /// Size of the encoded frame.
    pub bytes: usize,
}

/// Forwards commands from any number of front-ends to the controller.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    link: LinkHandle,
    validate_known: bool,
}

impl Dispatcher {
    pub fn new(link: LinkHandle, config: &DispatchConfig) -> Self {
        Self {
            link,
            validate_known: config.validate_known_commands,
        }
    }

    pub fn link(&self) -> &LinkHandle {
        &self.link
    }

    /// Validate, encode, and write `command` to the active link.
    ///
    /// Resolves once the frame has been handed to the socket. A write failure
    /// is reported as [`BridgeError::Transport`] and takes the link down.
    pub async fn dispatch(&self, command: &Command) -> Result<Accepted, BridgeError> {
        self.validate(command)?;

        let Some(writer) = self.link.writer() else {
            debug!(command = command.name(), "Rejected command: not connected");
            return Err(BridgeError::LinkUnavailable);
        };

        let frame = codec::encode(command)?;
        let link_id = writer.link_id();
        let bytes = writer.write(frame).await?;
        debug!(link_id, command = command.name(), bytes, "Command dispatched");
        Ok(Accepted { link_id, bytes })
    }

    /// Check a command without sending it.
    pub fn validate(&self, command: &Command) -> Result<(), BridgeError> {
        validate_name(command.name())?;
        if self.validate_known {
            validate_known(command)?;
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<(), BridgeError> {
    if name.is_empty() {
        return Err(BridgeError::InvalidCommand(
            "command name must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Parameter checks for the commands whose shape is known. Unknown commands
/// and extra parameters are not checked.
pub fn validate_known(command: &Command) -> Result<(), BridgeError> {
    match command.name() {
        "move" => {
            // The controller ignores a move without a direction.
            if let Some(direction) = command.param("direction") {
                let direction = direction.as_str().ok_or_else(|| {
                    invalid(format!(
                        "move.direction must be a string, got {}",
                        direction.kind()
                    ))
                })?;
                direction
                    .parse::<Direction>()
                    .map_err(|e| invalid(format!("move.direction: {e}")))?;
            }

            if let Some(speed) = command.param("speed") {
                let value = expect_number(speed, "move.speed")?;
                if !(0.0..=1.0).contains(&value) {
                    return Err(invalid(format!(
                        "move.speed must be within [0.0, 1.0], got {value}"
                    )));
                }
            }
        }
        "autonomous" => {
            if let Some(enabled) = command.param("enabled")
                && enabled.as_bool().is_none()
            {
                return Err(invalid(format!(
                    "autonomous.enabled must be a bool, got {}",
                    enabled.kind()
                )));
            }
        }
        "heartbeat" => {
            if let Some(remote_id) = command.param("remote_id") {
                match remote_id.as_str() {
                    Some(id) if !id.is_empty() => {}
                    _ => return Err(invalid("heartbeat.remote_id must be a non-empty string")),
                }
            }
            if let Some(signal) = command.param("signal_strength") {
                expect_number(signal, "heartbeat.signal_strength")?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn expect_number(value: &ParamValue, field: &str) -> Result<f64, BridgeError> {
    value
        .as_f64()
        .ok_or_else(|| invalid(format!("{field} must be a number, got {}", value.kind())))
}

fn invalid(message: impl Into<String>) -> BridgeError {
    BridgeError::InvalidCommand(message.into())
}
