//! Task definitions and the pre-activation registry.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::context::JobContext;
use crate::error::{ManagerError, SchedulerError, TaskResult};

/// Type-erased task function.
pub type TaskFn = Arc<dyn Fn(JobContext) -> BoxFuture<'static, TaskResult> + Send + Sync>;

/// Wrap an async closure into a [`TaskFn`].
pub fn task_fn<F, Fut>(f: F) -> TaskFn
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    Arc::new(move |ctx: JobContext| -> BoxFuture<'static, TaskResult> { Box::pin(f(ctx)) })
}

/// A struct that can be registered as a task.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, ctx: JobContext) -> TaskResult;
}

/// Wrap a [`Runner`] into a [`TaskFn`].
pub fn runner_fn<R>(runner: Arc<R>) -> TaskFn
where
    R: Runner + 'static,
{
    Arc::new(move |ctx: JobContext| -> BoxFuture<'static, TaskResult> {
        let runner = runner.clone();
        Box::pin(async move { runner.run(ctx).await })
    })
}

/// Cron expression for a task.
///
/// Empty or [`Schedule::DISABLED`] means the task is never fired by the
/// scheduler and can only be started manually.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schedule(String);

impl Schedule {
    /// Sentinel for a manual-only task.
    pub const DISABLED: &'static str = "disabled";

    pub fn new(expr: impl Into<String>) -> Self {
        Self(expr.into())
    }

    /// Manual-only schedule.
    pub fn disabled() -> Self {
        Self(Self::DISABLED.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the scheduler should fire this task.
    pub fn is_active(&self) -> bool {
        !self.0.is_empty() && self.0 != Self::DISABLED
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Schedule {
    fn from(expr: &str) -> Self {
        Self::new(expr)
    }
}

impl From<String> for Schedule {
    fn from(expr: String) -> Self {
        Self(expr)
    }
}

/// A registered task before activation.
#[derive(Clone)]
pub struct TaskDef {
    pub name: String,
    pub schedule: Schedule,
    pub maintenance: bool,
    pub func: TaskFn,
}

impl fmt::Debug for TaskDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDef")
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .field("maintenance", &self.maintenance)
            .finish_non_exhaustive()
    }
}

/// Ordered set of task definitions.
///
/// Registration never validates; [`TaskRegistry::validate`] runs once at
/// activation so the registration order is preserved as-is.
#[derive(Debug, Default, Clone)]
pub struct TaskRegistry {
    tasks: Vec<TaskDef>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        schedule: impl Into<Schedule>,
        maintenance: bool,
        func: TaskFn,
    ) {
        self.tasks.push(TaskDef {
            name: name.into(),
            schedule: schedule.into(),
            maintenance,
            func,
        });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskDef> {
        self.tasks.iter()
    }

    pub(crate) fn into_tasks(self) -> Vec<TaskDef> {
        self.tasks
    }

    /// Check names and schedules in registration order.
    ///
    /// Fails on the first task whose lowercased name was already seen, or
    /// whose active schedule is rejected by `check_schedule`.
    pub fn validate<F>(&self, check_schedule: F) -> Result<(), ManagerError>
    where
        F: Fn(&str) -> Result<(), SchedulerError>,
    {
        let mut names = HashSet::with_capacity(self.tasks.len());
        for task in &self.tasks {
            if !names.insert(task.name.to_lowercase()) {
                return Err(ManagerError::DuplicateName(task.name.clone()));
            }

            if task.schedule.is_active() {
                check_schedule(task.schedule.as_str()).map_err(|source| {
                    ManagerError::BadSchedule {
                        name: task.name.clone(),
                        source,
                    }
                })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
