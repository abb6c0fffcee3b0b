//! Reconnect delays.

use crate::config::BackoffConfig;
use std::time::Duration;

/// Exponential delay with a hard cap: attempt `k` waits
/// `min(max_delay, base_ms^k)` milliseconds. There is no attempt limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    base_ms: u64,
    max_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(base_ms: u64, max_delay: Duration) -> Self {
        Self { base_ms, max_delay }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.base_ms, config.max_delay())
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let cap_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_ms.saturating_pow(attempt).min(cap_ms))
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}
