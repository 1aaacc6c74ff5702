//! Maintenance gate.
//!
//! One shared/exclusive lock for the whole manager. Ordinary runs take a
//! shared hold, so any number of them proceed together. Maintenance runs take
//! the exclusive hold: they wait until every in-flight run has finished, then
//! run alone, and no other run starts until they release it.
//!
//! The lock is Tokio's [`RwLock`], which queues acquirers in FIFO order. Once
//! a maintenance run is waiting, ordinary runs that arrive later queue behind
//! it. There is no other fairness policy.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::context::JobContext;
use crate::middleware::{middleware_fn, Middleware};
use crate::task::TaskFn;

/// Shared/exclusive gate between maintenance and ordinary runs.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceGate {
    lock: Arc<RwLock<()>>,
}

impl MaintenanceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Middleware unit enforcing the gate.
    pub fn middleware(&self) -> Middleware {
        let lock = self.lock.clone();
        middleware_fn(move |ctx: JobContext, next: TaskFn| {
            let lock = lock.clone();
            async move {
                if ctx.is_maintenance() {
                    info!(job = %ctx.name(), "cron getting maintenance lock");
                    let _exclusive = lock.write_owned().await;
                    info!(job = %ctx.name(), "cron got maintenance lock");
                    next(ctx).await
                } else {
                    let _shared = lock.read_owned().await;
                    debug!(job = %ctx.name(), "cron acquired shared lock");
                    next(ctx).await
                }
            }
        })
    }
}

/// Give maintenance tasks exclusive access relative to all other tasks.
pub fn with_maintenance() -> Middleware {
    MaintenanceGate::new().middleware()
}

#[cfg(test)]
#[path = "maintenance_tests.rs"]
mod tests;
