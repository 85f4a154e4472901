//! Best-effort dispatch of side-effect calls.
//!
//! Persisting a message or recording a join/leave must never hold up the
//! broadcast that triggered it. The [`Dispatcher`] runs each call as a
//! detached task; failures are logged, counted, and reported to an optional
//! hook, and go no further.

use crate::services::ServiceError;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug_span, trace, warn, Instrument};

/// Callback invoked with the operation name when a side effect fails.
pub type FailureHook = Arc<dyn Fn(&'static str) + Send + Sync>;

#[derive(Default)]
struct Counters {
    dispatched: AtomicU64,
    failed: AtomicU64,
}

/// Spawns fire-and-forget side-effect calls.
#[derive(Clone, Default)]
pub struct Dispatcher {
    counters: Arc<Counters>,
    on_failure: Option<FailureHook>,
}

impl Dispatcher {
    /// Create a dispatcher with no failure hook.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a hook called for every failed side effect.
    #[must_use]
    pub fn with_failure_hook(mut self, hook: FailureHook) -> Self {
        self.on_failure = Some(hook);
        self
    }

    /// Run `call` in the background.
    ///
    /// Must be called from within a tokio runtime. The returned handle may be
    /// dropped; it exists so callers (mostly tests) can wait for completion.
    pub fn dispatch<F>(&self, operation: &'static str, call: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), ServiceError>> + Send + 'static,
    {
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);

        let counters = Arc::clone(&self.counters);
        let on_failure = self.on_failure.clone();
        let span = debug_span!("side_effect", operation);

        tokio::spawn(
            async move {
                match call.await {
                    Ok(()) => trace!("Side effect completed"),
                    Err(e) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        warn!(error = %e, "Side effect failed");
                        if let Some(hook) = on_failure {
                            hook(operation);
                        }
                    }
                }
            }
            .instrument(span),
        )
    }

    /// Number of side effects dispatched so far.
    #[must_use]
    pub fn dispatched(&self) -> u64 {
        self.counters.dispatched.load(Ordering::Relaxed)
    }

    /// Number of side effects that failed so far.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("dispatched", &self.dispatched())
            .field("failed", &self.failures())
            .field("has_failure_hook", &self.on_failure.is_some())
            .finish()
    }
}
