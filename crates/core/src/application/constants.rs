// Engine constants (no magic values at call sites)

use std::time::Duration;

/// Milliseconds in one day
pub const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Maximum identifiers armed per window refresh
pub const DEFAULT_CHUNK_SIZE: u32 = 1000;

/// Period of window-refresh ticks (24h)
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(86_400_000);

/// Horizon for arming timers (25h; strictly wider than the refresh period)
pub const DEFAULT_LOOK_AHEAD_WINDOW: Duration = Duration::from_millis(90_000_000);

/// Period of retention-cleanup ticks (24h)
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_millis(86_400_000);

/// Retention for completed jobs (days)
pub const DEFAULT_COMPLETED_RETENTION_DAYS: i64 = 7;

/// Retention for cancelled jobs (days)
pub const DEFAULT_CANCELLED_RETENTION_DAYS: i64 = 30;

/// Handler attempts per firing (1 = no retry)
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (1s)
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(1_000);

/// Backoff ceiling (30s)
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_millis(30_000);
