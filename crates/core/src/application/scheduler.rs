// Scheduler facade - the public surface over the engine
//
// Wires the executor, chunk loader, and cleanup service together and owns
// the lifecycle of the two background loops. All facade operations surface
// errors synchronously; everything that runs in the background logs and
// continues instead.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::application::cleanup::{CleanupReport, CleanupService};
use crate::application::config::SchedulerConfig;
use crate::application::executor::Executor;
use crate::application::loader::ChunkLoader;
use crate::application::retry::RetryPolicy;
use crate::application::shutdown::{shutdown_channel, ShutdownSender};
use crate::domain::{job, DomainError, Job, JobId, JobStatus, ScheduleSpec};
use crate::error::Result;
use crate::port::id_provider::UuidProvider;
use crate::port::time_provider::SystemTimeProvider;
use crate::port::{IdProvider, JobStore, TimeProvider};

/// Aggregate counters for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub total_jobs: i64,
    pub active: i64,
    pub paused: i64,
    pub cancelled: i64,
    pub completed: i64,
    pub total_runs: i64,
    /// Active jobs due within the configured look-ahead window.
    pub due_in_window: i64,
}

struct Loops {
    refresh: JoinHandle<()>,
    cleanup: Option<JoinHandle<()>>,
    shutdown: ShutdownSender,
}

/// Persistent cron-style job scheduler.
///
/// Job records live in the [`JobStore`]; handlers live only in the process
/// and must be re-registered (via [`Scheduler::register_handler`] or
/// [`Scheduler::schedule`]) after a restart.
pub struct Scheduler {
    executor: Arc<Executor>,
    loader: Arc<ChunkLoader>,
    cleanup: Arc<CleanupService>,
    ids: Arc<dyn IdProvider>,
    config: SchedulerConfig,
    loops: tokio::sync::Mutex<Option<Loops>>,
    store_ready: AtomicBool,
}

impl Scheduler {
    /// Create a scheduler with production providers (system clock, UUID v4
    /// ids). The store adapter is injected; see `cronloom-infra-sqlite`.
    pub fn new(store: Arc<dyn JobStore>, config: SchedulerConfig) -> Result<Self> {
        Self::with_providers(
            store,
            Arc::new(SystemTimeProvider),
            Arc::new(UuidProvider),
            config,
        )
    }

    /// Create a scheduler with injected providers (for deterministic tests).
    pub fn with_providers(
        store: Arc<dyn JobStore>,
        time: Arc<dyn TimeProvider>,
        ids: Arc<dyn IdProvider>,
        config: SchedulerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let executor = Arc::new(Executor::new(
            Arc::clone(&store),
            Arc::clone(&time),
            RetryPolicy::new(config.retry),
            config.look_ahead_window.as_millis() as i64,
        ));
        let loader = Arc::new(ChunkLoader::new(Arc::clone(&executor), config.chunk_size));
        let cleanup = Arc::new(CleanupService::new(store, time, config.auto_cleanup.clone()));
        Ok(Self {
            executor,
            loader,
            cleanup,
            ids,
            config,
            loops: tokio::sync::Mutex::new(None),
            store_ready: AtomicBool::new(false),
        })
    }

    /// Set the callback invoked with (identifier, error) when a firing
    /// exhausts its handler attempts. Without a callback the error goes to
    /// the log.
    pub fn set_error_callback<F>(&self, callback: F)
    where
        F: Fn(&str, &anyhow::Error) + Send + Sync + 'static,
    {
        *self.executor.on_error.lock() = Some(Arc::new(callback));
    }

    /// Schedule (or replace) a job under `identifier`.
    ///
    /// The input is either a cron expression (`&str`/`String`), an absolute
    /// epoch-millisecond instant (`i64`), or a `DateTime<Utc>`. The handler
    /// replaces any prior handler under the same identifier, and the record
    /// replaces any prior record (`run_count` restarts at zero). Starts the
    /// engine if it is not running, and arms a timer immediately when the
    /// job is due within the look-ahead window.
    pub async fn schedule<S, F, Fut>(
        &self,
        spec: S,
        identifier: &str,
        handler: F,
    ) -> Result<JobId>
    where
        S: Into<ScheduleSpec>,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        job::validate_identifier(identifier)?;
        self.ensure_init().await?;

        let now = self.executor.time.now_millis();
        let normalized = spec.into().normalize(now)?;
        let record = Job::new(self.ids.generate_id(), identifier, &normalized, now);

        let had_handler = self.executor.registry.contains(identifier);
        self.executor.registry.register(identifier, handler);
        if let Err(error) = self.executor.store.upsert(&record).await {
            if !had_handler {
                self.executor.registry.remove(identifier);
            }
            return Err(error);
        }

        self.start().await?;
        // a timer armed for the replaced record would fire at the wrong
        // instant; drop it before deciding whether the new one is due. A
        // slot pinned by an in-flight firing is left alone: that firing
        // stands down against the new record id and hands the slot over.
        self.executor.timers.cancel(identifier);
        if record.next_run <= now + self.executor.look_ahead_ms {
            self.executor
                .arm_if_absent(identifier, &record.id, record.next_run);
        }

        info!(
            identifier,
            id = %record.id,
            next_run = record.next_run,
            recurring = record.is_recurring(),
            "Job scheduled"
        );
        Ok(record.id)
    }

    /// Re-attach a handler to an existing record after a restart. Touches
    /// only the in-memory registry; returns whether a persisted record
    /// exists for the identifier.
    pub async fn register_handler<F, Fut>(&self, identifier: &str, handler: F) -> Result<bool>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        job::validate_identifier(identifier)?;
        self.ensure_init().await?;
        self.executor.registry.register(identifier, handler);
        Ok(self
            .executor
            .store
            .get_by_identifier(identifier)
            .await?
            .is_some())
    }

    /// Cancel a job: terminal transition, pending timer cancelled, handler
    /// dropped. Idempotent (a missing or already-cancelled job returns
    /// `Ok(false)`); cancelling a completed job is an
    /// `InvalidStatusTransition` error.
    pub async fn cancel(&self, identifier: &str) -> Result<bool> {
        self.ensure_init().await?;
        let now = self.executor.time.now_millis();
        let affected = self
            .executor
            .store
            .transition_status(
                identifier,
                &[JobStatus::Active, JobStatus::Paused],
                JobStatus::Cancelled,
                now,
            )
            .await?;
        self.executor.timers.cancel(identifier);
        self.executor.registry.remove(identifier);
        if affected > 0 {
            info!(identifier, "Job cancelled");
            return Ok(true);
        }
        self.resolve_blocked_transition(identifier, JobStatus::Cancelled)
            .await
    }

    /// Pause an active job. The pending timer is cancelled but the handler
    /// stays registered for a later resume. A handler already mid-execution
    /// finishes, and the gated post-execution update then observes the
    /// paused status and advances nothing. Pausing a terminal job is an
    /// `InvalidStatusTransition` error.
    pub async fn pause(&self, identifier: &str) -> Result<bool> {
        self.ensure_init().await?;
        let now = self.executor.time.now_millis();
        let affected = self
            .executor
            .store
            .transition_status(identifier, &[JobStatus::Active], JobStatus::Paused, now)
            .await?;
        self.executor.timers.cancel(identifier);
        if affected > 0 {
            info!(identifier, "Job paused");
            return Ok(true);
        }
        self.resolve_blocked_transition(identifier, JobStatus::Paused)
            .await
    }

    /// Resume a paused job and re-arm it via a chunk load if it is due
    /// within the window. Resuming a terminal job is an
    /// `InvalidStatusTransition` error.
    pub async fn resume(&self, identifier: &str) -> Result<bool> {
        self.ensure_init().await?;
        let now = self.executor.time.now_millis();
        let affected = self
            .executor
            .store
            .transition_status(identifier, &[JobStatus::Paused], JobStatus::Active, now)
            .await?;
        if affected > 0 {
            info!(identifier, "Job resumed");
            if self.executor.running.load(Ordering::SeqCst) {
                self.loader.load().await?;
            }
            return Ok(true);
        }
        self.resolve_blocked_transition(identifier, JobStatus::Active)
            .await
    }

    /// Explain a gated status update that affected zero rows: a missing
    /// record or one already at the target is an idempotent no-op; a state
    /// the machine cannot leave for `to` surfaces the domain error.
    async fn resolve_blocked_transition(&self, identifier: &str, to: JobStatus) -> Result<bool> {
        match self.executor.store.get_by_identifier(identifier).await? {
            None => Ok(false),
            Some(job) if job.status == to => Ok(false),
            // the gate lost a benign race (status changed between the
            // update and this read); nothing to report
            Some(job) if job.status.can_transition_to(to) => Ok(false),
            Some(job) => Err(DomainError::InvalidStatusTransition {
                from: job.status.to_string(),
                to: to.to_string(),
            }
            .into()),
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn get(&self, identifier: &str) -> Result<Option<Job>> {
        self.ensure_init().await?;
        self.executor.store.get_by_identifier(identifier).await
    }

    pub async fn job_status(&self, identifier: &str) -> Result<Option<JobStatus>> {
        Ok(self.get(identifier).await?.map(|job| job.status))
    }

    pub async fn job_run_count(&self, identifier: &str) -> Result<Option<i64>> {
        Ok(self.get(identifier).await?.map(|job| job.run_count))
    }

    pub async fn active_jobs_count(&self) -> Result<i64> {
        self.ensure_init().await?;
        self.executor.store.count_active().await
    }

    pub async fn completed_jobs_count(&self) -> Result<i64> {
        self.ensure_init().await?;
        self.executor.store.count_completed().await
    }

    pub async fn total_runs_count(&self) -> Result<i64> {
        self.ensure_init().await?;
        self.executor.store.sum_run_count().await
    }

    /// Number of active jobs due within the given window from now.
    pub async fn jobs_in_window(&self, window: Duration) -> Result<i64> {
        self.ensure_init().await?;
        let now = self.executor.time.now_millis();
        self.executor
            .store
            .count_active_due_by(now + window.as_millis() as i64)
            .await
    }

    pub async fn stats(&self) -> Result<SchedulerStats> {
        self.ensure_init().await?;
        let counts = self.executor.store.count_by_status().await?;
        let total_runs = self.executor.store.sum_run_count().await?;
        let now = self.executor.time.now_millis();
        let due_in_window = self
            .executor
            .store
            .count_active_due_by(now + self.executor.look_ahead_ms)
            .await?;
        Ok(SchedulerStats {
            total_jobs: counts.total(),
            active: counts.active,
            paused: counts.paused,
            cancelled: counts.cancelled,
            completed: counts.completed,
            total_runs,
            due_in_window,
        })
    }

    /// Pending (not yet fired) timers currently armed.
    pub fn armed_timer_count(&self) -> usize {
        self.executor.timers.pending_len()
    }

    // ------------------------------------------------------------------
    // Cleanup
    // ------------------------------------------------------------------

    pub async fn cleanup_completed_jobs(&self, retention_days: i64) -> Result<u64> {
        self.ensure_init().await?;
        self.cleanup.delete_completed_older_than(retention_days).await
    }

    pub async fn cleanup_cancelled_jobs(&self, retention_days: i64) -> Result<u64> {
        self.ensure_init().await?;
        self.cleanup.delete_cancelled_older_than(retention_days).await
    }

    pub async fn cleanup_all_old_jobs(
        &self,
        completed_retention_days: i64,
        cancelled_retention_days: i64,
    ) -> Result<CleanupReport> {
        self.ensure_init().await?;
        self.cleanup
            .run_with(completed_retention_days, cancelled_retention_days)
            .await
    }

    /// One cleanup pass with the configured retentions.
    pub async fn trigger_auto_cleanup(&self) -> Result<CleanupReport> {
        self.ensure_init().await?;
        self.cleanup.run_once().await
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start the engine: ensure the store is initialized (a failure here
    /// aborts startup), run an initial chunk load, and spawn the refresh
    /// and cleanup loops. Idempotent.
    pub async fn start(&self) -> Result<()> {
        let mut loops = self.loops.lock().await;
        if loops.is_some() {
            return Ok(());
        }
        self.ensure_init().await?;
        self.executor.running.store(true, Ordering::SeqCst);
        self.loader.load().await?;

        let (sender, token) = shutdown_channel();
        let refresh = tokio::spawn(Arc::clone(&self.loader).run(
            self.config.refresh_interval,
            token.clone(),
        ));
        let cleanup = if self.config.auto_cleanup.enabled {
            Some(tokio::spawn(Arc::clone(&self.cleanup).run(
                self.config.auto_cleanup.interval,
                token,
            )))
        } else {
            None
        };
        *loops = Some(Loops {
            refresh,
            cleanup,
            shutdown: sender,
        });

        info!(
            chunk_size = self.config.chunk_size,
            refresh_interval_ms = self.config.refresh_interval.as_millis() as u64,
            look_ahead_ms = self.executor.look_ahead_ms,
            auto_cleanup = self.config.auto_cleanup.enabled,
            "Scheduler started"
        );
        Ok(())
    }

    /// Stop the engine: both loops terminate and every timer is released.
    /// Handlers already mid-execution finish, and their gated updates still
    /// apply, but nothing is re-armed. Idempotent.
    pub async fn stop(&self) {
        let mut loops = self.loops.lock().await;
        let Some(active) = loops.take() else {
            return;
        };
        self.executor.running.store(false, Ordering::SeqCst);
        active.shutdown.shutdown();
        self.executor.timers.clear_all();
        let _ = active.refresh.await;
        if let Some(cleanup) = active.cleanup {
            let _ = cleanup.await;
        }
        info!("Scheduler stopped");
    }

    /// Stop, close the store, and drop the handler registry.
    pub async fn destroy(&self) {
        self.stop().await;
        self.executor.store.close().await;
        self.executor.registry.clear();
        info!("Scheduler destroyed");
    }

    /// Lazy store initialization on first use. `init` is idempotent, so a
    /// concurrent double-run is harmless.
    async fn ensure_init(&self) -> Result<()> {
        if self.store_ready.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.executor.store.init().await?;
        self.store_ready.store(true, Ordering::SeqCst);
        Ok(())
    }
}
