//! Tests for activation, the pipeline and manual triggers.

use super::*;
use crate::error::TaskError;
use crate::guard::with_skip_active;
use crate::middleware::middleware_fn;
use crate::scheduler::{parse_standard, Entry, EntryId};
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

/// Scheduler double that records registrations and fires on demand.
#[derive(Default)]
struct FakeScheduler {
    jobs: Mutex<Vec<(String, ScheduledJob)>>,
    started: AtomicBool,
}

impl FakeScheduler {
    fn registered(&self) -> Vec<String> {
        self.jobs.lock().iter().map(|(e, _)| e.clone()).collect()
    }

    fn fire(&self, i: usize) -> BoxFuture<'static, ()> {
        let job = self.jobs.lock()[i].1.clone();
        job()
    }
}

impl Scheduler for FakeScheduler {
    fn validate(&self, expr: &str) -> Result<(), crate::error::SchedulerError> {
        parse_standard(expr).map(|_| ())
    }

    fn register(
        &self,
        expr: &str,
        job: ScheduledJob,
    ) -> Result<EntryId, crate::error::SchedulerError> {
        let mut jobs = self.jobs.lock();
        jobs.push((expr.to_string(), job));
        Ok(EntryId(jobs.len() as u64 * 10))
    }

    fn entries(&self) -> Vec<Entry> {
        let next = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        (1..=self.jobs.lock().len() as u64)
            .map(|i| Entry {
                id: EntryId(i * 10),
                prev: None,
                next: Some(next),
            })
            .collect()
    }

    fn start(&self) -> Result<(), crate::error::SchedulerError> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> StopSignal {
        StopSignal::ready()
    }
}

fn builder() -> (Arc<FakeScheduler>, ManagerBuilder) {
    let scheduler = Arc::new(FakeScheduler::default());
    (scheduler.clone(), ManagerBuilder::with_scheduler(scheduler))
}

/// Task that signals `started` and waits for a `release` permit.
fn blocking(started: Arc<Notify>, release: Arc<Semaphore>) -> TaskFn {
    task_fn(move |_ctx| {
        let started = started.clone();
        let release = release.clone();
        async move {
            started.notify_one();
            release.acquire().await.map_err(TaskError::other)?.forget();
            Ok(())
        }
    })
}

#[test]
fn test_activate_duplicate_name_registers_nothing() {
    let (scheduler, mut b) = builder();
    b.add_func("f1", "* * * * *", |_ctx| async { Ok(()) })
        .add_func("F1", "* * * * *", |_ctx| async { Ok(()) });

    let err = b.activate().unwrap_err();
    assert!(matches!(err, ManagerError::DuplicateName(ref n) if n == "F1"));
    assert!(scheduler.registered().is_empty());
}

#[test]
fn test_activate_bad_schedule_registers_nothing() {
    let (scheduler, mut b) = builder();
    b.add_func("f1", "* * * * *", |_ctx| async { Ok(()) })
        .add_func("f3", "invalid", |_ctx| async { Ok(()) });

    let err = b.start().unwrap_err();
    assert_eq!(err.task_name(), Some("f3"));
    assert!(scheduler.registered().is_empty());
    assert!(!scheduler.started.load(Ordering::SeqCst));
}

#[test]
fn test_activate_registers_active_schedules() {
    let (scheduler, mut b) = builder();
    b.add_func("f1", "* * * * *", |_ctx| async { Ok(()) })
        .add_func("manual", "", |_ctx| async { Ok(()) })
        .add_maintenance_func("cleanup", Schedule::disabled(), |_ctx| async { Ok(()) })
        .add_maintenance_func("f2", "*/2 * * * *", |_ctx| async { Ok(()) });

    let manager = b.activate().unwrap();
    assert_eq!(scheduler.registered(), ["* * * * *", "*/2 * * * *"]);
    assert!(!scheduler.started.load(Ordering::SeqCst));

    let states = manager.state();
    let phases: Vec<_> = states.iter().map(|s| (s.name.as_str(), s.state, s.id)).collect();
    assert_eq!(
        phases,
        [
            ("f1", TaskPhase::Idle, Some(EntryId(10))),
            ("manual", TaskPhase::Disabled, None),
            ("cleanup", TaskPhase::Disabled, None),
            ("f2", TaskPhase::Idle, Some(EntryId(20))),
        ]
    );
    assert!(states.get("f1").unwrap().next_run.is_some());
    assert!(states.get("manual").unwrap().next_run.is_none());
    assert!(states.get("f2").unwrap().is_maintenance);
}

#[test]
fn test_start_starts_scheduler() {
    let (scheduler, mut b) = builder();
    b.add_func("f1", "@hourly", |_ctx| async { Ok(()) });
    let manager = b.start().unwrap();
    assert!(scheduler.started.load(Ordering::SeqCst));
    assert_eq!(manager.len(), 1);
}

#[tokio::test]
async fn test_manual_run_not_found() {
    let (_scheduler, mut b) = builder();
    b.add_func("f1", "* * * * *", |_ctx| async { Ok(()) });
    let manager = b.activate().unwrap();

    let before = manager.state();
    let err = manager.manual_run("nope").await.unwrap_err();
    assert!(matches!(err, ManagerError::NotFound(ref n) if n == "nope"));
    assert_eq!(manager.state(), before);
}

#[tokio::test]
async fn test_manual_run_is_case_insensitive() {
    let runs = Arc::new(AtomicU32::new(0));
    let (_scheduler, mut b) = builder();
    let counter = runs.clone();
    b.add_func("Report", "* * * * *", move |_ctx| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });
    let manager = b.activate().unwrap();

    manager.manual_run("report").await.unwrap();
    manager.manual_run("REPORT").await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert!(manager.contains("rEpOrT"));
}

#[tokio::test]
async fn test_manual_run_failure_is_recorded() {
    let (_scheduler, mut b) = builder();
    b.add_func("f1", "* * * * *", |_ctx| async {
        Err(TaskError::msg("random error"))
    });
    let manager = b.activate().unwrap();

    let err = manager.manual_run("f1").await.unwrap_err();
    assert_eq!(err.to_string(), "random error");

    let s = manager.state().get("f1").cloned().unwrap();
    assert_eq!(s.state, TaskPhase::Idle);
    assert_eq!(s.last_error.as_deref(), Some("random error"));
    assert!(s.last_updated_at.is_some());
}

#[tokio::test]
async fn test_skip_returned_directly_is_skipped() {
    let (_scheduler, mut b) = builder();
    b.add_func("f1", "* * * * *", |_ctx| async { Err(TaskError::Skipped) });
    let manager = b.activate().unwrap();

    let err = manager.manual_run("f1").await.unwrap_err();
    assert!(matches!(err, ManagerError::Task(ref e) if e.is_skipped()));

    let s = manager.state().get("f1").cloned().unwrap();
    assert_eq!(s.state, TaskPhase::Skipped);
    assert!(s.last_error.is_none());
}

#[tokio::test]
async fn test_disabled_task_runs_manually() {
    let (scheduler, mut b) = builder();
    b.use_middleware([with_skip_active()])
        .add_func("manual", Schedule::disabled(), |_ctx| async { Ok(()) });
    let manager = b.activate().unwrap();
    assert!(scheduler.registered().is_empty());
    assert_eq!(manager.state().get("manual").unwrap().state, TaskPhase::Disabled);

    manager.manual_run("manual").await.unwrap();
    let s = manager.state().get("manual").cloned().unwrap();
    assert_eq!(s.state, TaskPhase::Idle);
    assert!(s.id.is_none());
}

#[tokio::test]
async fn test_context_annotations() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (scheduler, mut b) = builder();
    let log = seen.clone();
    b.add_maintenance_func("Vacuum", "@daily", move |ctx: JobContext| {
        log.lock()
            .push((ctx.name().to_string(), ctx.is_maintenance(), ctx.trigger()));
        async { Ok(()) }
    });
    let manager = b.activate().unwrap();

    manager.manual_run("vacuum").await.unwrap();
    scheduler.fire(0).await;

    assert_eq!(
        *seen.lock(),
        [
            ("Vacuum".to_string(), true, Trigger::Manual),
            ("Vacuum".to_string(), true, Trigger::Scheduled),
        ]
    );
}

#[tokio::test]
async fn test_middleware_wraps_every_task_in_order() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let unit = |tag: &'static str, events: Arc<Mutex<Vec<String>>>| {
        middleware_fn(move |ctx: JobContext, next: TaskFn| {
            let events = events.clone();
            async move {
                events.lock().push(format!("{tag}>{}", ctx.name()));
                let result = next(ctx).await;
                events.lock().push(format!("{tag}<"));
                result
            }
        })
    };

    let (_scheduler, mut b) = builder();
    b.use_middleware([unit("outer", events.clone())])
        .use_middleware([unit("inner", events.clone())])
        .add_func("a", "* * * * *", |_ctx| async { Ok(()) });
    let manager = b.activate().unwrap();
    manager.manual_run("a").await.unwrap();

    assert_eq!(*events.lock(), ["outer>a", "inner>a", "inner<", "outer<"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scheduled_and_manual_runs_do_not_overlap() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Semaphore::new(0));

    let (scheduler, mut b) = builder();
    b.use_middleware([with_skip_active()]).register(
        "sync",
        "* * * * *",
        false,
        blocking(started.clone(), release.clone()),
    );
    let manager = b.activate().unwrap();

    let scheduled = tokio::spawn(scheduler.fire(0));
    started.notified().await;
    assert_eq!(manager.state().get("sync").unwrap().state, TaskPhase::Running);
    let running_since = manager.state().get("sync").unwrap().last_updated_at;

    let err = manager.manual_run("sync").await.unwrap_err();
    assert!(matches!(err, ManagerError::Task(ref e) if e.is_skipped()));

    let s = manager.state().get("sync").cloned().unwrap();
    assert_eq!(s.state, TaskPhase::Running);
    assert_eq!(s.last_updated_at, running_since);

    release.add_permits(1);
    scheduled.await.unwrap();

    let s = manager.state().get("sync").cloned().unwrap();
    assert_eq!(s.state, TaskPhase::Idle);
    assert!(s.last_error.is_none());
}

#[tokio::test]
async fn test_trigger_not_found_is_immediate() {
    let (_scheduler, mut b) = builder();
    b.add_func("f1", "* * * * *", |_ctx| async { Ok(()) });
    let manager = b.activate().unwrap();
    assert!(matches!(
        manager.trigger("missing"),
        Err(ManagerError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_trigger_runs_detached() {
    let (_scheduler, mut b) = builder();
    b.add_func("f1", "* * * * *", |ctx: JobContext| async move {
        assert_eq!(ctx.trigger(), Trigger::Manual);
        Err(TaskError::msg("detached failure"))
    });
    let manager = b.activate().unwrap();

    let handle = manager.trigger("F1").unwrap();
    let result = handle.await.unwrap();
    assert_eq!(result.unwrap_err().to_string(), "detached failure");
    assert_eq!(
        manager.state().get("f1").unwrap().last_error.as_deref(),
        Some("detached failure")
    );
}

#[test]
fn test_trigger_outside_runtime() {
    let (_scheduler, mut b) = builder();
    b.add_func("f1", "* * * * *", |_ctx| async { Ok(()) });
    let manager = b.activate().unwrap();
    assert!(matches!(manager.trigger("f1"), Err(ManagerError::NoRuntime)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_waits_for_detached_runs() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Semaphore::new(0));

    let (_scheduler, mut b) = builder();
    b.register(
        "slow",
        "",
        false,
        blocking(started.clone(), release.clone()),
    );
    let manager = b.activate().unwrap();

    let _handle = manager.trigger("slow").unwrap();
    started.notified().await;

    let mut stopped = manager.stop();
    assert!(futures::poll!(&mut stopped).is_pending());

    release.add_permits(1);
    tokio::time::timeout(Duration::from_secs(5), stopped)
        .await
        .unwrap();
    assert_eq!(manager.state().get("slow").unwrap().state, TaskPhase::Idle);
}

#[test]
fn test_names_in_registration_order() {
    let (_scheduler, mut b) = builder();
    b.add_func("b", "", |_ctx| async { Ok(()) })
        .add_func("a", "", |_ctx| async { Ok(()) });
    assert_eq!(b.len(), 2);
    let manager = b.activate().unwrap();
    assert_eq!(manager.names().collect::<Vec<_>>(), ["b", "a"]);
}
