//! Configuration builders for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`AppConfig`] values without
//! repeating boilerplate across crate boundaries.

use pawlink_config::AppConfig;

/// Fluent builder for [`AppConfig`] in tests.
///
/// Delays default to tens of milliseconds so reconnect behaviour can be
/// observed without slowing the suite down.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .endpoint(&controller.endpoint())
///     .reconnect_delay_ms(100)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.controller.reconnect_delay_ms = 50;
        config.controller.connect_timeout_ms = 1_000;
        config.heartbeat.interval_ms = 50;
        Self { config }
    }

    pub fn endpoint(mut self, endpoint: &str) -> Self {
        self.config.controller.endpoint = endpoint.to_string();
        self
    }

    pub fn reconnect_delay_ms(mut self, ms: u64) -> Self {
        self.config.controller.reconnect_delay_ms = ms;
        self
    }

    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.controller.connect_timeout_ms = ms;
        self
    }

    pub fn remote_id(mut self, id: &str) -> Self {
        self.config.heartbeat.remote_id = id.to_string();
        self
    }

    pub fn heartbeat_interval_ms(mut self, ms: u64) -> Self {
        self.config.heartbeat.interval_ms = ms;
        self
    }

    pub fn signal_strength(mut self, dbm: f64) -> Self {
        self.config.heartbeat.signal_strength = dbm;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
