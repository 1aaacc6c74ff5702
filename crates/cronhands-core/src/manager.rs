//! Manager: activation, the execution pipeline and manual triggers.
//!
//! Tasks and middleware are collected on a [`ManagerBuilder`]. Activation
//! validates every task, composes the middleware chain around each one and
//! registers active schedules with the [`Scheduler`]. The resulting
//! [`Manager`] is immutable, so the registry and chain are read without
//! locks from then on.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::context::{JobContext, Trigger};
use crate::error::{ManagerError, ManagerResult, TaskResult};
use crate::middleware::{compose, Middleware};
use crate::scheduler::{CronScheduler, ScheduledJob, Scheduler, StopSignal};
use crate::state::{StateTracker, States, TaskPhase};
use crate::task::{runner_fn, task_fn, Runner, Schedule, TaskFn, TaskRegistry};

/// Collects tasks and middleware before activation.
pub struct ManagerBuilder {
    registry: TaskRegistry,
    middleware: Vec<Middleware>,
    scheduler: Arc<dyn Scheduler>,
}

impl Default for ManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagerBuilder {
    /// Builder backed by a [`CronScheduler`].
    pub fn new() -> Self {
        Self::with_scheduler(Arc::new(CronScheduler::new()))
    }

    pub fn with_scheduler(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            registry: TaskRegistry::new(),
            middleware: Vec::new(),
            scheduler,
        }
    }

    /// Register a task. Names and schedules are checked at activation.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        schedule: impl Into<Schedule>,
        maintenance: bool,
        func: TaskFn,
    ) -> &mut Self {
        self.registry.register(name, schedule, maintenance, func);
        self
    }

    /// Register an ordinary task from an async closure.
    pub fn add_func<F, Fut>(
        &mut self,
        name: impl Into<String>,
        schedule: impl Into<Schedule>,
        f: F,
    ) -> &mut Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        self.register(name, schedule, false, task_fn(f))
    }

    /// Register a maintenance task from an async closure.
    pub fn add_maintenance_func<F, Fut>(
        &mut self,
        name: impl Into<String>,
        schedule: impl Into<Schedule>,
        f: F,
    ) -> &mut Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        self.register(name, schedule, true, task_fn(f))
    }

    /// Register a [`Runner`].
    pub fn add_runner<R>(
        &mut self,
        name: impl Into<String>,
        schedule: impl Into<Schedule>,
        maintenance: bool,
        runner: Arc<R>,
    ) -> &mut Self
    where
        R: Runner + 'static,
    {
        self.register(name, schedule, maintenance, runner_fn(runner))
    }

    /// Append middleware units. The first unit added is the outermost.
    pub fn use_middleware(&mut self, units: impl IntoIterator<Item = Middleware>) -> &mut Self {
        self.middleware.extend(units);
        self
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Validate and bind every task.
    ///
    /// Nothing is registered with the scheduler unless every name and
    /// schedule is valid.
    pub fn activate(self) -> ManagerResult<Arc<Manager>> {
        let scheduler = self.scheduler;
        self.registry.validate(|expr| scheduler.validate(expr))?;

        let tracker = StateTracker::new();
        let mut tasks = Vec::with_capacity(self.registry.len());
        for def in self.registry.into_tasks() {
            let idx = tracker.track(&def.name, &def.schedule, def.maintenance);
            tasks.push(Arc::new(BoundTask {
                name: Arc::from(def.name.as_str()),
                schedule: def.schedule,
                maintenance: def.maintenance,
                idx,
                chain: compose(&self.middleware, def.func),
                tracker: tracker.clone(),
            }));
        }

        for task in &tasks {
            if !task.schedule.is_active() {
                tracker.update(task.idx, TaskPhase::Disabled, None);
                debug!(job = %task.name, "cron job has no schedule, manual only");
                continue;
            }

            let id = scheduler
                .register(task.schedule.as_str(), task.scheduled_job())
                .map_err(|source| ManagerError::Register {
                    name: task.name.to_string(),
                    source,
                })?;
            tracker.set_entry(task.idx, Some(id));
        }

        Ok(Arc::new(Manager {
            tasks,
            tracker,
            scheduler,
            manual: TaskTracker::new(),
        }))
    }

    /// Activate and start the scheduler.
    pub fn start(self) -> ManagerResult<Arc<Manager>> {
        let manager = self.activate()?;
        manager.start()?;
        Ok(manager)
    }
}

impl fmt::Debug for ManagerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerBuilder")
            .field("registry", &self.registry)
            .field("middleware", &self.middleware.len())
            .finish_non_exhaustive()
    }
}

/// A task bound to the composed middleware chain.
struct BoundTask {
    name: Arc<str>,
    schedule: Schedule,
    maintenance: bool,
    idx: usize,
    chain: TaskFn,
    tracker: Arc<StateTracker>,
}

impl BoundTask {
    /// Run the pipeline once.
    async fn run(&self, trigger: Trigger) -> TaskResult {
        let ctx = JobContext::new(self.name.clone(), self.maintenance, trigger);
        let record = self.tracker.begin(self.idx);
        let result = (self.chain)(ctx).await;
        record.finish(&result);
        result
    }

    fn scheduled_job(self: &Arc<Self>) -> ScheduledJob {
        let task = self.clone();
        Arc::new(move || -> BoxFuture<'static, ()> {
            let task = task.clone();
            Box::pin(async move {
                // outcome is already recorded in state and reported by middleware
                let _ = task.run(Trigger::Scheduled).await;
            })
        })
    }
}

/// Activated manager.
pub struct Manager {
    tasks: Vec<Arc<BoundTask>>,
    tracker: Arc<StateTracker>,
    scheduler: Arc<dyn Scheduler>,
    manual: TaskTracker,
}

impl Manager {
    /// Start firing scheduled tasks. Requires a Tokio runtime.
    pub fn start(&self) -> ManagerResult<()> {
        self.scheduler.start().map_err(ManagerError::Start)?;
        info!(jobs = self.tasks.len(), "cron manager started");
        Ok(())
    }

    /// Stop the scheduler.
    ///
    /// Runs already in flight are not cancelled. The returned signal
    /// completes once they, and any detached manual runs, have finished.
    pub fn stop(&self) -> StopSignal {
        let scheduler = self.scheduler.stop();
        self.manual.close();
        let manual = self.manual.clone();
        info!("cron manager stopping");
        StopSignal::new(async move {
            scheduler.await;
            manual.wait().await;
        })
    }

    /// Run a task by name on the caller's task and return its outcome.
    pub async fn manual_run(&self, name: &str) -> ManagerResult<()> {
        let task = self
            .find(name)
            .ok_or_else(|| ManagerError::NotFound(name.to_string()))?;
        task.run(Trigger::Manual).await.map_err(ManagerError::Task)
    }

    /// Start a detached run of a task by name.
    ///
    /// Lookup happens before spawning, so an unknown name fails immediately.
    pub fn trigger(&self, name: &str) -> ManagerResult<JoinHandle<TaskResult>> {
        let task = self
            .find(name)
            .cloned()
            .ok_or_else(|| ManagerError::NotFound(name.to_string()))?;
        let handle = Handle::try_current().map_err(|_| ManagerError::NoRuntime)?;
        debug!(job = %task.name, "cron job triggered manually");
        Ok(self
            .manual
            .spawn_on(async move { task.run(Trigger::Manual).await }, &handle))
    }

    /// Snapshot of every task merged with scheduler fire times.
    pub fn state(&self) -> States {
        let entries = self.scheduler.entries();
        self.tracker.snapshot(&entries)
    }

    /// Whether a task with this name exists, ignoring case.
    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Task names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|t| &*t.name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn find(&self, name: &str) -> Option<&Arc<BoundTask>> {
        self.tasks
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("tasks", &self.names().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
