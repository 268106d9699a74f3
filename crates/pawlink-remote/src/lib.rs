#![deny(unsafe_code)]

//! Remote-hardware side of PawLink.
//!
//! A physical remote keeps its own link to the controller and, besides the
//! user's commands, announces that it is alive: every interval it sends a
//! `heartbeat` carrying its identifier and the current radio signal
//! strength. This lets the controller tell an idle remote from one that has
//! gone silent.

pub mod heartbeat;
pub mod probe;

pub use heartbeat::{HeartbeatCounts, HeartbeatHandle, HeartbeatService, ServiceCommand};
pub use probe::{FixedSignal, SharedSignal, SignalProbe};

/// Errors from the remote-side services.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("heartbeat service is not running")]
    ServiceStopped,

    #[error("invalid signal strength: {0}")]
    InvalidSignal(f64),
}
