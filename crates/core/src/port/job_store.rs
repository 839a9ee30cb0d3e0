// Job Store Port (Interface)

use crate::domain::{Job, JobStatus};
use crate::error::Result;
use async_trait::async_trait;

/// Per-status row counts, for observability queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub active: i64,
    pub paused: i64,
    pub cancelled: i64,
    pub completed: i64,
}

impl StatusCounts {
    pub fn total(&self) -> i64 {
        self.active + self.paused + self.cancelled + self.completed
    }
}

/// Durable store interface for job records.
///
/// Every operation other than `init` fails with `AppError::NotInitialized`
/// until `init` has run; `init` itself is idempotent.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create schema and indexes (idempotent).
    async fn init(&self) -> Result<()>;

    /// Insert or replace a record, keyed on `identifier`.
    async fn upsert(&self, job: &Job) -> Result<()>;

    /// Find a record by identifier.
    async fn get_by_identifier(&self, identifier: &str) -> Result<Option<Job>>;

    /// Gated status update: only rows whose current status is in
    /// `allowed_from` move to `to`. Returns rows affected (0 = gate failed
    /// or no such identifier).
    async fn transition_status(
        &self,
        identifier: &str,
        allowed_from: &[JobStatus],
        to: JobStatus,
        updated_at: i64,
    ) -> Result<u64>;

    /// Atomic post-execution update, gated on `status = 'active'` and on
    /// `id`: writes `last_run`, `next_run`, `status`, `updated_at` and
    /// increments `run_count` by one. Returns rows affected (0 = the job
    /// was paused or cancelled while its handler ran, or the record was
    /// replaced by a re-schedule and the firing belongs to the old `id`).
    async fn apply_post_execution(
        &self,
        identifier: &str,
        id: &str,
        last_run: i64,
        next_run: i64,
        status: JobStatus,
        updated_at: i64,
    ) -> Result<u64>;

    /// Active jobs with `next_run <= window_end`, ascending by `next_run`,
    /// at most `limit` rows. Overdue jobs are included so that firings
    /// missed across a restart are recovered.
    async fn due_in_window(&self, window_end: i64, limit: u32) -> Result<Vec<Job>>;

    /// Row counts grouped by status.
    async fn count_by_status(&self) -> Result<StatusCounts>;

    /// Number of active jobs.
    async fn count_active(&self) -> Result<i64>;

    /// Number of completed jobs.
    async fn count_completed(&self) -> Result<i64>;

    /// Sum of `run_count` over all records.
    async fn sum_run_count(&self) -> Result<i64>;

    /// Number of active jobs with `next_run <= window_end`.
    async fn count_active_due_by(&self, window_end: i64) -> Result<i64>;

    /// All records with the given status.
    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>>;

    /// Delete records with the given terminal status and
    /// `updated_at < updated_at_cutoff`. Returns rows deleted.
    async fn delete_terminal(&self, status: JobStatus, updated_at_cutoff: i64) -> Result<u64>;

    /// Release the underlying connection pool.
    async fn close(&self);
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// In-memory JobStore used by engine unit tests.
    #[derive(Default)]
    pub struct MemoryJobStore {
        jobs: Mutex<HashMap<String, Job>>,
        initialized: AtomicBool,
    }

    impl MemoryJobStore {
        pub fn new() -> Self {
            Self::default()
        }

        fn ensure_ready(&self) -> Result<()> {
            if self.initialized.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(AppError::NotInitialized)
            }
        }
    }

    #[async_trait]
    impl JobStore for MemoryJobStore {
        async fn init(&self) -> Result<()> {
            self.initialized.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn upsert(&self, job: &Job) -> Result<()> {
            self.ensure_ready()?;
            self.jobs
                .lock()
                .insert(job.identifier.clone(), job.clone());
            Ok(())
        }

        async fn get_by_identifier(&self, identifier: &str) -> Result<Option<Job>> {
            self.ensure_ready()?;
            Ok(self.jobs.lock().get(identifier).cloned())
        }

        async fn transition_status(
            &self,
            identifier: &str,
            allowed_from: &[JobStatus],
            to: JobStatus,
            updated_at: i64,
        ) -> Result<u64> {
            self.ensure_ready()?;
            let mut jobs = self.jobs.lock();
            match jobs.get_mut(identifier) {
                Some(job) if allowed_from.contains(&job.status) => {
                    job.status = to;
                    job.updated_at = updated_at;
                    Ok(1)
                }
                _ => Ok(0),
            }
        }

        async fn apply_post_execution(
            &self,
            identifier: &str,
            id: &str,
            last_run: i64,
            next_run: i64,
            status: JobStatus,
            updated_at: i64,
        ) -> Result<u64> {
            self.ensure_ready()?;
            let mut jobs = self.jobs.lock();
            match jobs.get_mut(identifier) {
                Some(job) if job.id == id && job.status == JobStatus::Active => {
                    job.last_run = Some(last_run);
                    job.next_run = next_run;
                    job.run_count += 1;
                    job.status = status;
                    job.updated_at = updated_at;
                    Ok(1)
                }
                _ => Ok(0),
            }
        }

        async fn due_in_window(&self, window_end: i64, limit: u32) -> Result<Vec<Job>> {
            self.ensure_ready()?;
            let mut due: Vec<Job> = self
                .jobs
                .lock()
                .values()
                .filter(|job| job.status == JobStatus::Active && job.next_run <= window_end)
                .cloned()
                .collect();
            due.sort_by_key(|job| job.next_run);
            due.truncate(limit as usize);
            Ok(due)
        }

        async fn count_by_status(&self) -> Result<StatusCounts> {
            self.ensure_ready()?;
            let jobs = self.jobs.lock();
            let mut counts = StatusCounts::default();
            for job in jobs.values() {
                match job.status {
                    JobStatus::Active => counts.active += 1,
                    JobStatus::Paused => counts.paused += 1,
                    JobStatus::Cancelled => counts.cancelled += 1,
                    JobStatus::Completed => counts.completed += 1,
                }
            }
            Ok(counts)
        }

        async fn count_active(&self) -> Result<i64> {
            Ok(self.count_by_status().await?.active)
        }

        async fn count_completed(&self) -> Result<i64> {
            Ok(self.count_by_status().await?.completed)
        }

        async fn sum_run_count(&self) -> Result<i64> {
            self.ensure_ready()?;
            Ok(self.jobs.lock().values().map(|job| job.run_count).sum())
        }

        async fn count_active_due_by(&self, window_end: i64) -> Result<i64> {
            self.ensure_ready()?;
            Ok(self
                .jobs
                .lock()
                .values()
                .filter(|job| job.status == JobStatus::Active && job.next_run <= window_end)
                .count() as i64)
        }

        async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
            self.ensure_ready()?;
            let mut found: Vec<Job> = self
                .jobs
                .lock()
                .values()
                .filter(|job| job.status == status)
                .cloned()
                .collect();
            found.sort_by(|a, b| a.identifier.cmp(&b.identifier));
            Ok(found)
        }

        async fn delete_terminal(&self, status: JobStatus, updated_at_cutoff: i64) -> Result<u64> {
            self.ensure_ready()?;
            if !status.is_terminal() {
                return Err(AppError::Internal(format!(
                    "Refusing retention delete of non-terminal status '{status}'"
                )));
            }
            let mut jobs = self.jobs.lock();
            let before = jobs.len();
            jobs.retain(|_, job| !(job.status == status && job.updated_at < updated_at_cutoff));
            Ok((before - jobs.len()) as u64)
        }

        async fn close(&self) {}
    }
}
