//! Delayed callbacks on the tokio runtime.
//!
//! A callback may schedule another callback on the same [`Timer`] from inside
//! itself, which is how the overflow logger keeps re-arming its quiet window.

use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Schedules one-shot callbacks on a captured runtime handle.
///
/// Holding the handle (rather than relying on an ambient runtime) lets
/// callbacks be scheduled from plain threads, e.g. a synchronous `export`
/// call made outside any async context.
#[derive(Debug, Clone)]
pub struct Timer {
    runtime: Handle,
}

impl Timer {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Uses the runtime the caller is currently running on, if any.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    /// Runs `callback` once `delay` has elapsed.
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> ScheduledCallback
    where
        F: FnOnce() + Send + 'static,
    {
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        ScheduledCallback { task }
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }
}

/// Handle to a pending callback. Dropping it does not cancel the callback.
#[derive(Debug)]
pub struct ScheduledCallback {
    task: JoinHandle<()>,
}

impl ScheduledCallback {
    /// Prevents the callback from running if it has not started yet.
    pub fn cancel(&self) {
        self.task.abort();
    }
}
