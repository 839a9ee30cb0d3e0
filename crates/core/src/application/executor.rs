// Executor - runs one scheduled firing: retry loop, gated state update,
// next-run recomputation, re-arm decision

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::application::registry::{ErrorCallback, HandlerRegistry};
use crate::application::retry::RetryPolicy;
use crate::application::timers::{TimerEntry, TimerSet};
use crate::domain::{schedule, JobStatus};
use crate::port::{JobStore, TimeProvider};

/// Shared engine state: the executor owns the timer set and the handler
/// registry, and is the only component that mutates job timings.
pub(crate) struct Executor {
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) time: Arc<dyn TimeProvider>,
    pub(crate) registry: HandlerRegistry,
    pub(crate) timers: TimerSet,
    pub(crate) retry: RetryPolicy,
    pub(crate) look_ahead_ms: i64,
    pub(crate) running: AtomicBool,
    pub(crate) on_error: Mutex<Option<ErrorCallback>>,
}

impl Executor {
    pub(crate) fn new(
        store: Arc<dyn JobStore>,
        time: Arc<dyn TimeProvider>,
        retry: RetryPolicy,
        look_ahead_ms: i64,
    ) -> Self {
        Self {
            store,
            time,
            registry: HandlerRegistry::new(),
            timers: TimerSet::new(),
            retry,
            look_ahead_ms,
            running: AtomicBool::new(false),
            on_error: Mutex::new(None),
        }
    }

    /// Arm (or re-arm) a timer for the identifier, replacing any existing
    /// slot. `job_id` is the record the timer belongs to; the firing will
    /// refuse to touch a record with a different id (i.e. a replacement
    /// written by a later re-schedule).
    pub(crate) fn arm(self: &Arc<Self>, identifier: &str, job_id: &str, next_run: i64) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        self.timers
            .insert(identifier, self.timer_entry(identifier, job_id, next_run));
    }

    /// Arm a timer only when no slot (pending or pinned) exists for the
    /// identifier. Used by the chunk loader and at schedule time so an
    /// in-flight execution is never doubled.
    pub(crate) fn arm_if_absent(
        self: &Arc<Self>,
        identifier: &str,
        job_id: &str,
        next_run: i64,
    ) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        self.timers
            .insert_if_absent(identifier, || self.timer_entry(identifier, job_id, next_run))
    }

    fn timer_entry(self: &Arc<Self>, identifier: &str, job_id: &str, next_run: i64) -> TimerEntry {
        let now = self.time.now_millis();
        let delay = Duration::from_millis(next_run.saturating_sub(now).max(0) as u64);
        let fired = Arc::new(AtomicBool::new(false));

        let executor = Arc::clone(self);
        let identifier = identifier.to_string();
        let job_id = job_id.to_string();
        let flag = Arc::clone(&fired);
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            // lost the race against a cancel or a replacement: stand down
            if !executor.timers.try_fire(&identifier, &flag) {
                return;
            }
            executor.execute(&identifier, &job_id).await;
            executor.timers.release(&identifier, &flag);
        });

        TimerEntry { handle, fired }
    }

    /// Run one firing of the identified job. `expected_id` is the record
    /// the firing was armed against. Never propagates errors; a firing
    /// failure must not take the engine down.
    pub(crate) async fn execute(self: &Arc<Self>, identifier: &str, expected_id: &str) {
        let Some(handler) = self.registry.get(identifier) else {
            // Benign after a restart without re-registration: the record is
            // left untouched for a later register_handler call.
            warn!(identifier, "Timer fired but no handler is registered; skipping");
            return;
        };

        let max_attempts = self.retry.max_attempts();
        let mut last_error: Option<anyhow::Error> = None;
        for attempt in 1..=max_attempts {
            match run_attempt(&handler).await {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                Err(error) => {
                    warn!(
                        identifier,
                        attempt,
                        max_attempts,
                        error = %error,
                        "Handler attempt failed"
                    );
                    let exhausted = attempt == max_attempts;
                    last_error = Some(error);
                    if exhausted {
                        break;
                    }
                    sleep(self.retry.backoff_delay(attempt)).await;
                }
            }
        }

        if let Some(error) = &last_error {
            let callback = self.on_error.lock().clone();
            match callback {
                Some(callback) => callback(identifier, error),
                None => error!(
                    identifier,
                    error = %error,
                    "Handler failed after all attempts"
                ),
            }
        }

        // The schedule advances even after an exhausted retry loop: the
        // firing happened, only the handler's outcome differs.
        self.apply_post_execution(identifier, expected_id).await;
    }

    /// Gated read-compute-write of last_run/next_run/run_count/status, plus
    /// the re-arm decision.
    async fn apply_post_execution(self: &Arc<Self>, identifier: &str, expected_id: &str) {
        let job = match self.store.get_by_identifier(identifier).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(identifier, "Record vanished during execution; skipping update");
                return;
            }
            Err(error) => {
                error!(identifier, error = %error, "Failed to read record after execution");
                return;
            }
        };
        if job.id != expected_id {
            // The record was replaced by a re-schedule while this firing
            // ran; the replacement deferred its arming because this slot
            // was pinned, so hand the slot over if it is already due.
            debug!(identifier, "Record was replaced while executing; firing stands down");
            let now = self.time.now_millis();
            if job.status == JobStatus::Active && job.next_run <= now + self.look_ahead_ms {
                self.arm(identifier, &job.id, job.next_run);
            }
            return;
        }
        if job.status != JobStatus::Active {
            // Paused or cancelled while the handler ran: honor the newer
            // state, advance nothing, re-arm nothing.
            debug!(identifier, status = %job.status, "Job no longer active; skipping update");
            return;
        }

        let now = self.time.now_millis();
        let (next_run, new_status) = match &job.cron_expression {
            Some(expression) => match schedule::next_occurrence(expression, now) {
                Ok(next_run) => (next_run, JobStatus::Active),
                Err(error) => {
                    error!(
                        identifier,
                        error = %error,
                        "Failed to compute next occurrence; leaving record untouched"
                    );
                    return;
                }
            },
            // One-shot: next_run keeps the firing instant for audit.
            None => (job.specific_time.unwrap_or(job.next_run), JobStatus::Completed),
        };

        match self
            .store
            .apply_post_execution(identifier, expected_id, now, next_run, new_status, now)
            .await
        {
            Ok(0) => {
                debug!(
                    identifier,
                    "Concurrent pause/cancel/re-schedule won the gate; no update applied"
                );
                return;
            }
            Ok(_) => {}
            Err(error) => {
                error!(identifier, error = %error, "Post-execution update failed");
                return;
            }
        }

        if new_status == JobStatus::Active && next_run <= now + self.look_ahead_ms {
            self.arm(identifier, expected_id, next_run);
        }
        // Otherwise the pinned slot is released by the timer task epilogue;
        // the refresh loop re-arms the job once it enters the window.
    }
}

async fn run_attempt(handler: &crate::application::registry::JobHandler) -> anyhow::Result<()> {
    // Handlers run in their own task so a panic is contained and counted as
    // an attempt failure rather than unwinding into the engine.
    match tokio::spawn(handler()).await {
        Ok(result) => result,
        Err(join_error) if join_error.is_panic() => {
            Err(anyhow::anyhow!("Handler panicked: {}", panic_message(join_error)))
        }
        Err(join_error) => Err(anyhow::anyhow!("Handler task aborted: {join_error}")),
    }
}

fn panic_message(join_error: tokio::task::JoinError) -> String {
    match join_error.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string()),
        Err(join_error) => join_error.to_string(),
    }
}
