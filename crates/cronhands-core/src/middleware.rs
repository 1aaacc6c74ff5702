//! Middleware chain.
//!
//! A middleware turns one [`TaskFn`] into another. The manager keeps them in
//! registration order and composes them once, at activation, so that the
//! first registered unit is the outermost wrapper: it runs first on entry and
//! last on exit.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::context::{Devel, JobContext};
use crate::error::TaskResult;
use crate::task::TaskFn;

/// A composable wrapper around task execution.
pub type Middleware = Arc<dyn Fn(TaskFn) -> TaskFn + Send + Sync>;

/// Build a middleware from an async closure receiving the context and the
/// next callable in the chain.
pub fn middleware_fn<F, Fut>(f: F) -> Middleware
where
    F: Fn(JobContext, TaskFn) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |next: TaskFn| -> TaskFn {
        let f = f.clone();
        Arc::new(move |ctx: JobContext| -> BoxFuture<'static, TaskResult> {
            Box::pin(f(ctx, next.clone()))
        })
    })
}

/// Fold `chain` around `func`, right to left.
pub fn compose(chain: &[Middleware], func: TaskFn) -> TaskFn {
    chain.iter().rev().fold(func, |next, m| m(next))
}

/// Mark runs as executing in a development environment.
///
/// Downstream code reads the flag with [`JobContext::is_devel`].
pub fn with_devel(is_devel: bool) -> Middleware {
    middleware_fn(move |ctx: JobContext, next: TaskFn| next(ctx.with_extension(Devel(is_devel))))
}

#[cfg(test)]
#[path = "middleware_tests.rs"]
mod tests;
