//! Demo task used by `[[jobs]]` entries.

use std::time::Duration;

use async_trait::async_trait;
use cronhands_config::JobConfig;
use cronhands_core::{JobContext, Runner, TaskError, TaskResult};
use rand::Rng;
use tracing::debug;

/// Sleeps for a random time, then succeeds, fails or panics at random.
#[derive(Debug, Clone)]
pub(crate) struct DemoTask {
    max_sleep: Duration,
    error_rate: f64,
    panic_rate: f64,
}

impl DemoTask {
    pub(crate) fn from_config(job: &JobConfig) -> Self {
        Self {
            max_sleep: Duration::from_secs(job.max_sleep_secs),
            error_rate: job.error_rate.clamp(0.0, 1.0),
            panic_rate: job.panic_rate.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl Runner for DemoTask {
    async fn run(&self, ctx: JobContext) -> TaskResult {
        // ThreadRng is not Send, keep it out of the await below
        let (sleep, roll) = {
            let mut rng = rand::thread_rng();
            let max_ms = self.max_sleep.as_millis() as u64;
            (
                Duration::from_millis(rng.gen_range(0..=max_ms)),
                rng.gen_range(0.0..1.0),
            )
        };

        debug!(
            job = ctx.name(),
            sleep = ?sleep,
            devel = ctx.is_devel(),
            trigger = %ctx.trigger(),
            "demo job sleeping"
        );
        tokio::time::sleep(sleep).await;

        if roll < self.panic_rate {
            panic!("demo job {} panicked", ctx.name());
        }
        if roll < self.panic_rate + self.error_rate {
            return Err(TaskError::msg(format!("demo job {} failed", ctx.name())));
        }
        Ok(())
    }
}
