//! Error types for the cron manager.

use thiserror::Error;

/// Outcome of a single task run that did not succeed.
///
/// `Skipped` is not a failure: it means the run was suppressed because
/// another instance of the same task was already in flight.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Run was suppressed.
    #[error("skipped")]
    Skipped,

    /// A panic escaped the task and was contained by the recover middleware.
    #[error("panic: {message}")]
    Panic { message: String, backtrace: String },

    /// Business failure returned by the task function.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl TaskError {
    /// Build a business failure from a message.
    pub fn msg(message: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        TaskError::Failed(anyhow::Error::msg(message))
    }

    /// Build a business failure from any error type.
    pub fn other<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        TaskError::Failed(anyhow::Error::new(err))
    }

    /// Whether this error is, or wraps, the skip signal.
    ///
    /// Matching walks the whole source chain, so a skip that a task wrapped
    /// in its own context is still recognised.
    pub fn is_skipped(&self) -> bool {
        match self {
            TaskError::Skipped => true,
            TaskError::Panic { .. } => false,
            TaskError::Failed(err) => err
                .chain()
                .any(|cause| matches!(cause.downcast_ref::<TaskError>(), Some(e) if e.is_skipped())),
        }
    }

    /// Whether this error came from a contained panic.
    pub fn is_panic(&self) -> bool {
        matches!(self, TaskError::Panic { .. })
    }
}

/// Result of a single task run.
pub type TaskResult = Result<(), TaskError>;

/// Errors raised by the cron scheduler collaborator.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Cron expression does not parse under the standard grammar.
    #[error("invalid cron expression {expr:?}: {reason}")]
    InvalidExpression { expr: String, reason: String },

    /// Scheduler was started outside of a Tokio runtime.
    #[error("no Tokio runtime available to drive the scheduler")]
    NoRuntime,

    /// Scheduler has been stopped and cannot be restarted.
    #[error("scheduler already stopped")]
    Stopped,
}

/// Errors raised by the manager.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Two tasks share a name (compared case-insensitively).
    #[error("duplicate cron name: {0}")]
    DuplicateName(String),

    /// A task schedule failed validation.
    #[error("bad schedule for cron {name}: {source}")]
    BadSchedule {
        name: String,
        #[source]
        source: SchedulerError,
    },

    /// Registering a task with the scheduler failed.
    #[error("add cron {name} failed: {source}")]
    Register {
        name: String,
        #[source]
        source: SchedulerError,
    },

    /// Scheduler failed to start.
    #[error("scheduler start failed: {0}")]
    Start(#[source] SchedulerError),

    /// Manual trigger for an unknown task.
    #[error("job not found: {0}")]
    NotFound(String),

    /// A detached run was requested outside of a Tokio runtime.
    #[error("no Tokio runtime available to spawn the run")]
    NoRuntime,

    /// The task ran and returned an error.
    #[error(transparent)]
    Task(#[from] TaskError),
}

impl ManagerError {
    /// Name of the offending task for configuration errors.
    pub fn task_name(&self) -> Option<&str> {
        match self {
            ManagerError::DuplicateName(name)
            | ManagerError::NotFound(name)
            | ManagerError::BadSchedule { name, .. }
            | ManagerError::Register { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Result type for manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;
