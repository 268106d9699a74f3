#![deny(unsafe_code)]

//! PawLink bridge core.
//!
//! Keeps one JSON-over-WebSocket link to a robot controller alive, forwards
//! commands from local front-ends, and fans controller status out to every
//! attached front-end. The [`Daemon`] hosts a [`Bridge`] behind a local IPC
//! socket.

/// Front-end facing facade over link, dispatcher, and fan-out.
pub mod bridge;
/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Wire messages: commands, status payloads, and status events.
pub mod codec;
/// Daemon runtime hosting a bridge and the IPC server.
pub mod daemon;
/// Command validation and forwarding.
pub mod dispatch;
pub mod error;
/// One-to-many delivery of status events.
pub mod fanout;
/// Unix-socket HTTP API for local front-ends.
pub mod ipc;
/// Connection manager for the controller link.
pub mod link;
/// In-memory log capture served on `/logs`.
pub mod logging;

pub use bridge::Bridge;
pub use codec::{Command, Direction, ParamValue, Params, StatusEvent, StatusPayload};
pub use daemon::Daemon;
pub use dispatch::{Accepted, Dispatcher};
pub use error::BridgeError;
pub use fanout::{FanOut, RegistrationHandle, Subscription};
pub use link::{ConnectionManager, LinkHandle, LinkInfo, LinkSettings, LinkState};
pub use logging::{LogCollector, LogReader};
