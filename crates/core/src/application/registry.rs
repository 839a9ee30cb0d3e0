// Handler registry - in-process callables keyed by job identifier
//
// Handlers are deliberately not persisted: job records survive restarts but
// handler code versions with the binary, so callers re-register handlers
// after constructing a new scheduler against an existing store.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;

/// Boxed future returned by one handler invocation.
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A registered job handler; invoked once per attempt.
pub type JobHandler = Arc<dyn Fn() -> HandlerFuture + Send + Sync>;

/// Callback invoked with (identifier, error) when a firing exhausts its
/// attempts.
pub type ErrorCallback = Arc<dyn Fn(&str, &anyhow::Error) + Send + Sync>;

#[derive(Default)]
pub struct HandlerRegistry {
    inner: Mutex<HashMap<String, JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any prior handler under the same
    /// identifier.
    pub fn register<F, Fut>(&self, identifier: &str, handler: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let boxed: JobHandler = Arc::new(move || Box::pin(handler()) as HandlerFuture);
        self.inner.lock().insert(identifier.to_string(), boxed);
    }

    pub fn get(&self, identifier: &str) -> Option<JobHandler> {
        self.inner.lock().get(identifier).cloned()
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.inner.lock().contains_key(identifier)
    }

    pub fn remove(&self, identifier: &str) -> bool {
        self.inner.lock().remove(identifier).is_some()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
