//! Error taxonomy for the bridge's public operations.

use crate::codec::CodecError;

/// Errors reported by bridge operations.
///
/// None of these are fatal to the process: transport and codec failures are
/// contained inside the connection manager and surface to front-ends only as
/// connectivity events or as a rejected dispatch.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    /// A command was dispatched while no link to the controller is up.
    #[error("not connected")]
    LinkUnavailable,

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    MalformedMessage(#[from] CodecError),

    /// Socket-level connect, read, or write failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// A front-end referred to something that does not exist.
    #[error("no such target: {0}")]
    AppTargetMissing(String),

    /// The command failed dispatcher validation.
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

impl BridgeError {
    /// Whether the caller may reasonably re-issue the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::LinkUnavailable | BridgeError::Transport(_))
    }
}
