// Chunk loader - bridges the durable job set to the bounded timer set
//
// Invoked on start, on resume, and on every refresh tick. Only pending
// timers are torn down between passes; a slot pinned by an in-flight
// execution is left alone and skipped, so no identifier ever has two
// concurrent executions.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, error};

use crate::application::executor::Executor;
use crate::application::shutdown::ShutdownToken;
use crate::error::Result;
use crate::port::{JobStore, TimeProvider};

pub(crate) struct ChunkLoader {
    executor: Arc<Executor>,
    chunk_size: u32,
}

impl ChunkLoader {
    pub(crate) fn new(executor: Arc<Executor>, chunk_size: u32) -> Self {
        Self {
            executor,
            chunk_size,
        }
    }

    /// One pass of the window protocol: clear pending timers, query the next
    /// chunk of due jobs, arm those with a registered handler. Returns the
    /// number of timers armed.
    pub(crate) async fn load(&self) -> Result<usize> {
        let executor = &self.executor;
        let now = executor.time.now_millis();
        let window_end = now + executor.look_ahead_ms;

        executor.timers.clear_pending();

        let due = executor.store.due_in_window(window_end, self.chunk_size).await?;
        let mut armed = 0usize;
        for job in &due {
            if !executor.registry.contains(&job.identifier) {
                // Left for a later register_handler call after a restart.
                debug!(
                    identifier = %job.identifier,
                    "Due job has no registered handler; not arming"
                );
                continue;
            }
            // Delay is computed from a fresh `now` inside arm_if_absent so
            // later entries in a large chunk do not inherit stale delays.
            if executor.arm_if_absent(&job.identifier, &job.id, job.next_run) {
                armed += 1;
            }
        }

        debug!(due = due.len(), armed, window_end, "Window refresh complete");
        Ok(armed)
    }

    /// Refresh loop (background task). Errors are logged, never propagated.
    pub(crate) async fn run(self: Arc<Self>, period: Duration, mut shutdown: ShutdownToken) {
        let mut tick = interval(period);
        // the initial load already ran inside start()
        tick.tick().await;
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(error) = self.load().await {
                        error!(error = %error, "Window refresh failed");
                    }
                }
                _ = shutdown.wait() => {
                    debug!("Refresh loop shutting down");
                    break;
                }
            }
        }
    }
}
