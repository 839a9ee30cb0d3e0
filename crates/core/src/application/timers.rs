// Timer set - pending one-shot timers keyed by job identifier
//
// Each entry owns the tokio task that sleeps until the job's next_run and
// then runs the execution pipeline. The `fired` flag splits an entry's life
// in two: while pending (still sleeping) the entry may be aborted; once
// fired the slot is pinned until the post-execution update either re-arms
// it or releases it. Pinned slots are never aborted, which is what keeps
// executions per identifier mutually exclusive.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

pub(crate) struct TimerEntry {
    pub(crate) handle: JoinHandle<()>,
    pub(crate) fired: Arc<AtomicBool>,
}

impl TimerEntry {
    fn is_pending(&self) -> bool {
        !self.fired.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub(crate) struct TimerSet {
    inner: Mutex<HashMap<String, TimerEntry>>,
}

impl TimerSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. A replaced pending timer is aborted; a replaced
    /// pinned entry is detached (its execution keeps running and its own
    /// release will no-op against the newer entry).
    pub(crate) fn insert(&self, identifier: &str, entry: TimerEntry) {
        let mut inner = self.inner.lock();
        if let Some(old) = inner.insert(identifier.to_string(), entry) {
            if old.is_pending() {
                old.handle.abort();
            }
        }
    }

    /// Atomic check-and-insert used by the chunk loader: the entry is only
    /// created when no slot (pending or pinned) exists for the identifier.
    pub(crate) fn insert_if_absent(
        &self,
        identifier: &str,
        make_entry: impl FnOnce() -> TimerEntry,
    ) -> bool {
        let mut inner = self.inner.lock();
        if inner.contains_key(identifier) {
            return false;
        }
        inner.insert(identifier.to_string(), make_entry());
        true
    }

    /// Transition an entry from pending to fired, iff it is still the
    /// current entry for the identifier. Returns false when the timer was
    /// cancelled or replaced after its sleep elapsed; the caller must then
    /// skip the execution. Because cancellation paths remove the entry
    /// under this same lock before aborting the task, a timer that wins
    /// this transition can no longer be aborted mid-execution.
    pub(crate) fn try_fire(&self, identifier: &str, fired: &Arc<AtomicBool>) -> bool {
        let inner = self.inner.lock();
        match inner.get(identifier) {
            Some(entry) if Arc::ptr_eq(&entry.fired, fired) => {
                entry.fired.store(true, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    /// Cancel a pending timer. An in-flight execution is never interrupted;
    /// its slot stays pinned and the gated post-execution update enforces
    /// the caller's intent.
    pub(crate) fn cancel(&self, identifier: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.get(identifier) {
            Some(entry) if entry.is_pending() => {
                if let Some(entry) = inner.remove(identifier) {
                    entry.handle.abort();
                }
                true
            }
            _ => false,
        }
    }

    /// Remove a pinned slot after its execution finished, unless the slot
    /// was re-armed in the meantime (flag identity distinguishes entries).
    pub(crate) fn release(&self, identifier: &str, fired: &Arc<AtomicBool>) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.get(identifier) {
            if Arc::ptr_eq(&entry.fired, fired) {
                inner.remove(identifier);
            }
        }
    }

    /// Abort and remove every pending timer; pinned slots stay.
    pub(crate) fn clear_pending(&self) {
        let mut inner = self.inner.lock();
        inner.retain(|_, entry| {
            if entry.is_pending() {
                entry.handle.abort();
                false
            } else {
                true
            }
        });
    }

    /// Bulk release on stop: abort pending timers and drop every entry.
    /// In-flight executions detach and finish best-effort.
    pub(crate) fn clear_all(&self) {
        let mut inner = self.inner.lock();
        for (_, entry) in inner.drain() {
            if entry.is_pending() {
                entry.handle.abort();
            }
        }
    }

    pub(crate) fn contains(&self, identifier: &str) -> bool {
        self.inner.lock().contains_key(identifier)
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.inner
            .lock()
            .values()
            .filter(|entry| entry.is_pending())
            .count()
    }
}
