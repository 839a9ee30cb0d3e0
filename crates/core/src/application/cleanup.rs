// Retention cleanup - deletes terminal jobs past their retention age

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, error, info};

use crate::application::config::AutoCleanupConfig;
use crate::application::constants::MS_PER_DAY;
use crate::application::shutdown::ShutdownToken;
use crate::domain::JobStatus;
use crate::error::{AppError, Result};
use crate::port::{JobStore, TimeProvider};

/// Rows deleted by one cleanup pass, per terminal status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub completed: u64,
    pub cancelled: u64,
}

/// Retention-based deletion of terminal jobs. Runs as a periodic background
/// loop and on manual triggers; retention is best-effort, so the loop
/// swallows errors.
pub struct CleanupService {
    store: Arc<dyn JobStore>,
    time: Arc<dyn TimeProvider>,
    config: AutoCleanupConfig,
}

impl CleanupService {
    pub fn new(
        store: Arc<dyn JobStore>,
        time: Arc<dyn TimeProvider>,
        config: AutoCleanupConfig,
    ) -> Self {
        Self {
            store,
            time,
            config,
        }
    }

    /// Delete completed jobs older than `retention_days`.
    pub async fn delete_completed_older_than(&self, retention_days: i64) -> Result<u64> {
        self.delete_older_than(JobStatus::Completed, retention_days).await
    }

    /// Delete cancelled jobs older than `retention_days`.
    pub async fn delete_cancelled_older_than(&self, retention_days: i64) -> Result<u64> {
        self.delete_older_than(JobStatus::Cancelled, retention_days).await
    }

    /// One pass with explicit retentions.
    pub async fn run_with(
        &self,
        completed_retention_days: i64,
        cancelled_retention_days: i64,
    ) -> Result<CleanupReport> {
        let completed = self
            .delete_completed_older_than(completed_retention_days)
            .await?;
        let cancelled = self
            .delete_cancelled_older_than(cancelled_retention_days)
            .await?;
        let report = CleanupReport {
            completed,
            cancelled,
        };
        if completed > 0 || cancelled > 0 {
            info!(completed, cancelled, "Retention cleanup removed terminal jobs");
        }
        Ok(report)
    }

    /// One pass with the configured retentions.
    pub async fn run_once(&self) -> Result<CleanupReport> {
        self.run_with(
            self.config.completed_retention_days,
            self.config.cancelled_retention_days,
        )
        .await
    }

    async fn delete_older_than(&self, status: JobStatus, retention_days: i64) -> Result<u64> {
        if retention_days < 0 {
            return Err(AppError::Config(format!(
                "Retention days cannot be negative: {retention_days}"
            )));
        }
        let cutoff = self.time.now_millis() - retention_days * MS_PER_DAY;
        self.store.delete_terminal(status, cutoff).await
    }

    /// Cleanup loop (background task). Must never stall the refresh loop or
    /// the executor, and never terminates the engine on error.
    pub(crate) async fn run(self: Arc<Self>, period: Duration, mut shutdown: ShutdownToken) {
        let mut tick = interval(period);
        tick.tick().await;
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.run_once().await {
                        Ok(report) => {
                            debug!(
                                completed = report.completed,
                                cancelled = report.cancelled,
                                "Scheduled cleanup pass complete"
                            );
                        }
                        Err(error) => {
                            error!(error = %error, "Scheduled cleanup pass failed");
                        }
                    }
                }
                _ = shutdown.wait() => {
                    debug!("Cleanup loop shutting down");
                    break;
                }
            }
        }
    }
}
