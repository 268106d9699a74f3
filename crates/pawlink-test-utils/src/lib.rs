#![deny(unsafe_code)]

//! Shared test utilities for the PawLink workspace.
//!
//! Provides a config builder and an in-process mock
//! controller so that individual crate tests stay concise and consistent.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! pawlink-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod controller;

pub use config::TestConfigBuilder;
pub use controller::{MockController, StallingListener};
