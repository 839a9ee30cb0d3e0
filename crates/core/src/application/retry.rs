// Retry logic for handler failures within a single firing

use std::time::Duration;

use crate::application::config::RetryConfig;

/// Exponential backoff policy.
///
/// Delay before the attempt following the n-th failed attempt:
/// `min(max_delay, base_delay * 2^(n-1))`. With `max_attempts = 1` the
/// backoff is never consulted.
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Backoff delay after `failed_attempt` (1-based) has failed.
    pub fn backoff_delay(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(31);
        let base_ms = self.config.base_delay.as_millis() as u64;
        let delay_ms = base_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay_ms.min(self.config.max_delay.as_millis() as u64))
    }
}
