//! Daemon IPC: Unix domain socket transport for local front-ends.
//!
//! The daemon exposes an HTTP/JSON API over a Unix socket. The CLI connects
//! as a client to send commands, follow status events, and inspect the
//! daemon.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐      Unix socket      ┌──────────────┐      WebSocket     ┌────────────┐
//! │   CLI    │──────────────────────▶│  IPC Server  │───────────────────▶│ Controller │
//! │          │  HTTP/1.1 + JSON/SSE  │  (axum)      │   JSON commands    │            │
//! └──────────┘                       └──────┬───────┘◀───────────────────└────────────┘
//!                                           │            status frames
//!                                    ┌──────▼───────┐
//!                                    │    Bridge    │
//!                                    └──────────────┘
//! ```

pub mod client;
pub mod server;
pub mod types;

pub use client::{EventStream, IpcClient, IpcClientError};
pub use server::{DEFAULT_SOCKET_PATH, IpcState};
pub use types::*;
