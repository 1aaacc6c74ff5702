//! # CronHands Core
//!
//! Execution pipeline and concurrency coordination for cron jobs.
//!
//! ## Components
//!
//! - [`ManagerBuilder`] / [`Manager`] - registration, activation, manual triggers
//! - [`JobContext`] - per-run context with typed extensions
//! - Middleware units: [`with_skip_active`], [`with_maintenance`],
//!   [`with_recover`], [`with_logging`], [`with_devel`], [`JobMetrics`]
//! - [`StateTracker`] - per-task state and snapshots
//! - [`CronScheduler`] - `cron`-backed scheduler
//!
//! ## Example
//!
//! ```no_run
//! use cronhands_core::{with_recover, with_skip_active, ManagerBuilder};
//!
//! # async fn run() -> Result<(), cronhands_core::ManagerError> {
//! let mut builder = ManagerBuilder::new();
//! builder
//!     .use_middleware([with_skip_active(), with_recover()])
//!     .add_func("report", "*/5 * * * *", |_ctx| async { Ok(()) });
//!
//! let manager = builder.start()?;
//! manager.manual_run("report").await?;
//! manager.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod error;
pub mod guard;
pub mod logging;
pub mod maintenance;
pub mod manager;
pub mod metrics;
pub mod middleware;
pub mod recover;
pub mod scheduler;
pub mod state;
pub mod task;

pub use context::{Devel, JobContext, Trigger};
pub use error::{ManagerError, ManagerResult, SchedulerError, TaskError, TaskResult};
pub use guard::{with_skip_active, ActiveRun, SkipActive};
pub use logging::{with_logging, RunOutcome};
pub use maintenance::{with_maintenance, MaintenanceGate};
pub use manager::{Manager, ManagerBuilder};
pub use metrics::JobMetrics;
pub use middleware::{compose, middleware_fn, with_devel, Middleware};
pub use recover::{panic_message, with_recover};
pub use scheduler::{
    parse_duration, parse_standard, CronScheduler, Entry, EntryId, ParsedSchedule, ScheduledJob,
    Scheduler, StopSignal,
};
pub use state::{RunRecord, StateTracker, States, TaskPhase, TaskSnapshot};
pub use task::{runner_fn, task_fn, Runner, Schedule, TaskDef, TaskFn, TaskRegistry};
