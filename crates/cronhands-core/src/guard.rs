//! Duplicate-run guard.
//!
//! Keeps the set of task names with a run in flight. A run whose name is
//! already in the set returns [`TaskError::Skipped`] immediately without
//! calling the wrapped function. The guard never blocks.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::context::JobContext;
use crate::error::TaskError;
use crate::middleware::{middleware_fn, Middleware};
use crate::task::TaskFn;

/// Per-name mutual exclusion for task runs.
#[derive(Debug, Clone, Default)]
pub struct SkipActive {
    active: Arc<Mutex<HashSet<String>>>,
}

impl SkipActive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test-and-insert `name`. Returns `None` if a run is already in flight.
    ///
    /// The name is released when the returned guard is dropped, which covers
    /// normal return, error, unwinding and a dropped future alike.
    pub fn try_acquire(&self, name: &str) -> Option<ActiveRun> {
        let mut active = self.active.lock();
        if !active.insert(name.to_string()) {
            return None;
        }
        Some(ActiveRun {
            name: name.to_string(),
            active: self.active.clone(),
        })
    }

    /// Whether `name` currently has a run in flight.
    pub fn is_active(&self, name: &str) -> bool {
        self.active.lock().contains(name)
    }

    /// Number of tasks with a run in flight.
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Middleware unit enforcing the guard.
    pub fn middleware(&self) -> Middleware {
        let guard = self.clone();
        middleware_fn(move |ctx: JobContext, next: TaskFn| {
            let guard = guard.clone();
            async move {
                let Some(_run) = guard.try_acquire(ctx.name()) else {
                    debug!(job = %ctx.name(), "cron job already running, skipping");
                    return Err(TaskError::Skipped);
                };
                next(ctx).await
            }
        })
    }
}

/// Marks a task as in flight until dropped.
#[derive(Debug)]
pub struct ActiveRun {
    name: String,
    active: Arc<Mutex<HashSet<String>>>,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.active.lock().remove(&self.name);
    }
}

/// Skip runs of a task that is already running.
pub fn with_skip_active() -> Middleware {
    SkipActive::new().middleware()
}

#[cfg(test)]
#[path = "guard_tests.rs"]
mod tests;
