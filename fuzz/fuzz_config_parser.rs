//! Fuzz target for the TOML configuration parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser
//!
//! Feeds arbitrary text to `AppConfig::parse()`, covering TOML parsing,
//! endpoint validation, and the numeric range checks.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = pawlink_config::AppConfig::parse(s) {
            // Anything that parses must also survive the duration accessors.
            let _ = config.controller.reconnect_delay();
            let _ = config.heartbeat.interval();
        }
    }
});
