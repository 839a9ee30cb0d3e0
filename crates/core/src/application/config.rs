// Scheduler Configuration

use std::time::Duration;

use crate::application::constants::*;
use crate::error::{AppError, Result};

/// Retry behavior for handler failures within one firing.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Attempts per firing; 1 disables retries entirely.
    pub max_attempts: u32,
    /// Base for exponential backoff between attempts.
    pub base_delay: Duration,
    /// Ceiling for the backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            base_delay: DEFAULT_RETRY_BASE_DELAY,
            max_delay: DEFAULT_RETRY_MAX_DELAY,
        }
    }
}

/// Background retention cleanup of terminal jobs.
#[derive(Debug, Clone)]
pub struct AutoCleanupConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub completed_retention_days: i64,
    pub cancelled_retention_days: i64,
}

impl Default for AutoCleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: DEFAULT_CLEANUP_INTERVAL,
            completed_retention_days: DEFAULT_COMPLETED_RETENTION_DAYS,
            cancelled_retention_days: DEFAULT_CANCELLED_RETENTION_DAYS,
        }
    }
}

/// Engine configuration. The store location (`db`) is passed to the store
/// adapter directly (`cronloom_infra_sqlite::create_pool`).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Max identifiers armed per refresh pass.
    pub chunk_size: u32,
    /// Period of window-refresh ticks. Must be strictly less than
    /// `look_ahead_window` so every job entering the window is seen before
    /// its `next_run`.
    pub refresh_interval: Duration,
    /// Horizon within which timers are armed.
    pub look_ahead_window: Duration,
    pub auto_cleanup: AutoCleanupConfig,
    pub retry: RetryConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            look_ahead_window: DEFAULT_LOOK_AHEAD_WINDOW,
            auto_cleanup: AutoCleanupConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(AppError::Config("chunk_size must be positive".to_string()));
        }
        if self.refresh_interval.is_zero() {
            return Err(AppError::Config(
                "refresh_interval must be positive".to_string(),
            ));
        }
        if self.refresh_interval >= self.look_ahead_window {
            return Err(AppError::Config(format!(
                "refresh_interval ({:?}) must be strictly less than look_ahead_window ({:?})",
                self.refresh_interval, self.look_ahead_window
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(AppError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.base_delay.is_zero() {
            return Err(AppError::Config(
                "retry.base_delay must be positive".to_string(),
            ));
        }
        if self.auto_cleanup.enabled && self.auto_cleanup.interval.is_zero() {
            return Err(AppError::Config(
                "auto_cleanup.interval must be positive".to_string(),
            ));
        }
        if self.auto_cleanup.completed_retention_days < 0
            || self.auto_cleanup.cancelled_retention_days < 0
        {
            return Err(AppError::Config(
                "retention days cannot be negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(SchedulerConfig::default().validate().is_ok());
    }

    #[test]
    fn refresh_interval_must_fit_inside_the_window() {
        let config = SchedulerConfig {
            refresh_interval: Duration::from_secs(100),
            look_ahead_window: Duration::from_secs(100),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn zero_values_are_rejected() {
        let config = SchedulerConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SchedulerConfig {
            retry: RetryConfig {
                max_attempts: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
