//! Build metadata embedded by `build.rs`, reported by `/health` and
//! `pawlink --version`-style status output.

/// Short git commit hash at build time, or `unknown`.
pub const GIT_HASH: &str = env!("PAWLINK_GIT_HASH");

/// Build timestamp as Unix epoch seconds.
pub const BUILD_TIMESTAMP: &str = env!("PAWLINK_BUILD_TIMESTAMP");

/// Cargo profile (`debug` or `release`).
pub const BUILD_PROFILE: &str = env!("PAWLINK_BUILD_PROFILE");

/// Crate version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version string such as `"0.1.0 (abc1234, debug)"`.
pub fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH}, {BUILD_PROFILE})")
}

/// Build identifier logged at daemon startup.
pub fn agent() -> String {
    format!("pawlink/{VERSION}+{GIT_HASH}")
}
