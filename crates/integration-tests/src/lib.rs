// Shared wiring helpers for the end-to-end scenarios

use std::sync::Arc;
use std::time::Duration;

use cronloom_core::application::{AutoCleanupConfig, RetryConfig, SchedulerConfig};
use cronloom_core::port::JobStore;
use cronloom_core::Scheduler;
use cronloom_infra_sqlite::{create_pool, SqliteJobStore};
use tempfile::TempDir;

/// Open a scheduler (and its store handle, for direct seeding) against the
/// given database location.
pub async fn open_scheduler(
    database_url: &str,
    config: SchedulerConfig,
) -> (Scheduler, Arc<SqliteJobStore>) {
    let pool = create_pool(database_url).await.expect("pool creation");
    let store = Arc::new(SqliteJobStore::new(pool));
    let scheduler = Scheduler::new(Arc::clone(&store) as Arc<dyn JobStore>, config)
        .expect("scheduler construction");
    (scheduler, store)
}

/// Open a scheduler against a fresh database file in a temp directory.
///
/// The engine's loops and timers hit the pool concurrently, so scenarios
/// need a real file; a pooled `:memory:` target would give each connection
/// its own private database. The `TempDir` must stay alive for the test's
/// duration.
pub async fn open_temp_scheduler(
    config: SchedulerConfig,
) -> (Scheduler, Arc<SqliteJobStore>, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cronloom.db");
    let (scheduler, store) = open_scheduler(path.to_str().expect("utf8 path"), config).await;
    (scheduler, store, dir)
}

/// Configuration tightened for fast tests: second-scale windows, no
/// background cleanup, retries off unless a scenario turns them on.
pub fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        chunk_size: 100,
        refresh_interval: Duration::from_millis(500),
        look_ahead_window: Duration::from_secs(60),
        auto_cleanup: AutoCleanupConfig {
            enabled: false,
            ..Default::default()
        },
        retry: RetryConfig {
            max_attempts: 1,
            ..Default::default()
        },
    }
}
