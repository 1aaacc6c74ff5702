//! Run logging through `tracing`.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info};

use crate::context::JobContext;
use crate::middleware::{middleware_fn, Middleware};
use crate::task::TaskFn;

/// Outcome label used in logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Finished,
    Skipped,
    Failed,
}

impl RunOutcome {
    pub fn of(result: &crate::error::TaskResult) -> Self {
        match result {
            Ok(()) => RunOutcome::Finished,
            Err(e) if e.is_skipped() => RunOutcome::Skipped,
            Err(_) => RunOutcome::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Finished => "finished",
            RunOutcome::Skipped => "skipped",
            RunOutcome::Failed => "failed",
        }
    }
}

/// Log every run once it completes.
///
/// Skips are logged at info level like successful runs; only real failures
/// go to error level.
pub fn with_logging(manager: impl Into<String>) -> Middleware {
    let manager: Arc<str> = Arc::from(manager.into());
    middleware_fn(move |ctx: JobContext, next: TaskFn| {
        let manager = manager.clone();
        async move {
            let name = ctx.name().to_string();
            let maintenance = ctx.is_maintenance();
            let trigger = ctx.trigger();
            let start = Instant::now();

            let result = next(ctx).await;
            let duration = start.elapsed();

            match (&result, RunOutcome::of(&result)) {
                (Err(err), RunOutcome::Failed) => error!(
                    job = %name,
                    duration = ?duration,
                    manager = %manager,
                    maintenance,
                    trigger = %trigger,
                    err = %err,
                    "cron job failed"
                ),
                (_, outcome) => info!(
                    job = %name,
                    duration = ?duration,
                    manager = %manager,
                    maintenance,
                    trigger = %trigger,
                    "cron job {}",
                    outcome.as_str()
                ),
            }

            result
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Trigger;
    use crate::error::TaskError;
    use crate::middleware::compose;
    use crate::task::task_fn;

    #[test]
    fn test_outcome_classification() {
        assert_eq!(RunOutcome::of(&Ok(())), RunOutcome::Finished);
        assert_eq!(RunOutcome::of(&Err(TaskError::Skipped)), RunOutcome::Skipped);
        assert_eq!(RunOutcome::of(&Err(TaskError::msg("x"))), RunOutcome::Failed);
        assert_eq!(RunOutcome::Skipped.as_str(), "skipped");
    }

    #[tokio::test]
    async fn test_logging_returns_inner_result() {
        let f = compose(
            &[with_logging("test-run")],
            task_fn(|_ctx| async { Err(TaskError::msg("random error")) }),
        );
        let err = f(JobContext::new("f1", false, Trigger::Manual))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "random error");
    }
}
