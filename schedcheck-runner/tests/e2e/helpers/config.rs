//! Run configuration for scenarios.

use schedcheck_core::config::RunConfig;

/// Builder over [`RunConfig`] defaults (300s budget, 15s interval).
pub struct TestConfigBuilder {
    config: RunConfig,
}

#[allow(dead_code)]
impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RunConfig::default(),
        }
    }

    pub fn region(mut self, region: &str) -> Self {
        self.config.fixture.region = region.to_owned();
        self
    }

    pub fn poll(mut self, max_wait_secs: u64, interval_secs: u64) -> Self {
        self.config.poll.max_wait_secs = max_wait_secs;
        self.config.poll.interval_secs = interval_secs;
        self
    }

    pub fn build(self) -> RunConfig {
        self.config
    }
}
