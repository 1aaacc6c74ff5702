//! Panic containment.

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::error;

use crate::context::JobContext;
use crate::error::TaskError;
use crate::middleware::{middleware_fn, Middleware};
use crate::task::TaskFn;

/// Convert a panic escaping the inner chain into [`TaskError::Panic`].
///
/// Install it innermost so that the guards and loggers wrapping it observe
/// an ordinary failure.
pub fn with_recover() -> Middleware {
    middleware_fn(|ctx: JobContext, next: TaskFn| async move {
        let name = ctx.name().to_string();
        match AssertUnwindSafe(next(ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                let backtrace = Backtrace::force_capture().to_string();
                error!(job = %name, panic = %message, "cron job panicked");
                Err(TaskError::Panic { message, backtrace })
            }
        }
    })
}

/// Extract a readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(e) = payload.downcast_ref::<TaskError>() {
        e.to_string()
    } else {
        "unknown panic payload".to_string()
    }
}
