//! Tests for the maintenance gate.

use super::*;
use crate::context::Trigger;
use crate::error::TaskError;
use crate::middleware::compose;
use crate::task::task_fn;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Barrier, Semaphore};

fn ctx(name: &str, maintenance: bool) -> JobContext {
    JobContext::new(name.to_string(), maintenance, Trigger::Scheduled)
}

/// Records start/end events and the peak number of concurrent runs.
#[derive(Default)]
struct Probe {
    current: AtomicUsize,
    peak: AtomicUsize,
    events: Mutex<Vec<String>>,
}

impl Probe {
    fn enter(&self, name: &str) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.events.lock().push(format!("{name}:start"));
    }

    fn exit(&self, name: &str) {
        self.events.lock().push(format!("{name}:end"));
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn started(&self, name: &str) -> bool {
        self.events.lock().iter().any(|e| e == &format!("{name}:start"))
    }
}

/// Task that records itself in the probe and holds until released.
fn gated_task(probe: Arc<Probe>, release: Arc<Semaphore>) -> TaskFn {
    task_fn(move |ctx: JobContext| {
        let probe = probe.clone();
        let release = release.clone();
        async move {
            probe.enter(ctx.name());
            release.acquire().await.map_err(TaskError::other)?.forget();
            probe.exit(ctx.name());
            Ok(())
        }
    })
}

async fn wait_until_started(probe: &Probe, name: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !probe.started(name) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("task should start");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ordinary_tasks_run_concurrently() {
    let gate = MaintenanceGate::new();
    let barrier = Arc::new(Barrier::new(2));
    let func = {
        let barrier = barrier.clone();
        task_fn(move |_ctx| {
            let barrier = barrier.clone();
            async move {
                barrier.wait().await;
                Ok(())
            }
        })
    };
    let f = compose(&[gate.middleware()], func);

    let a = tokio::spawn(f(ctx("a", false)));
    let b = tokio::spawn(f(ctx("b", false)));

    // Both must be inside the gate at once for the barrier to open.
    tokio::time::timeout(Duration::from_secs(5), async {
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
    })
    .await
    .expect("ordinary tasks must not serialize");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_maintenance_waits_for_running_tasks() {
    let gate = MaintenanceGate::new();
    let probe = Arc::new(Probe::default());
    let release = Arc::new(Semaphore::new(0));
    let f = compose(&[gate.middleware()], gated_task(probe.clone(), release.clone()));

    let ordinary = tokio::spawn(f(ctx("a", false)));
    wait_until_started(&probe, "a").await;

    let maintenance = tokio::spawn(f(ctx("m", true)));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!probe.started("m"), "maintenance must wait for ordinary run");

    release.add_permits(1);
    ordinary.await.unwrap().unwrap();
    wait_until_started(&probe, "m").await;
    release.add_permits(1);
    maintenance.await.unwrap().unwrap();

    assert_eq!(
        *probe.events.lock(),
        vec!["a:start", "a:end", "m:start", "m:end"]
    );
    assert_eq!(probe.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ordinary_blocks_while_maintenance_runs() {
    let gate = MaintenanceGate::new();
    let probe = Arc::new(Probe::default());
    let release = Arc::new(Semaphore::new(0));
    let f = compose(&[gate.middleware()], gated_task(probe.clone(), release.clone()));

    let maintenance = tokio::spawn(f(ctx("m", true)));
    wait_until_started(&probe, "m").await;

    let ordinary = tokio::spawn(f(ctx("a", false)));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!probe.started("a"), "ordinary run must wait for maintenance");

    release.add_permits(1);
    maintenance.await.unwrap().unwrap();

    // Released gate lets the waiting ordinary run make progress.
    wait_until_started(&probe, "a").await;
    release.add_permits(1);
    ordinary.await.unwrap().unwrap();
    assert_eq!(probe.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_maintenance_tasks_exclude_each_other() {
    let gate = MaintenanceGate::new();
    let probe = Arc::new(Probe::default());
    let release = Arc::new(Semaphore::new(0));
    let f = compose(&[gate.middleware()], gated_task(probe.clone(), release.clone()));

    let first = tokio::spawn(f(ctx("m1", true)));
    wait_until_started(&probe, "m1").await;
    let second = tokio::spawn(f(ctx("m2", true)));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!probe.started("m2"));

    release.add_permits(2);
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    assert_eq!(probe.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_gate_released_after_failure() {
    let gate = MaintenanceGate::new();
    let f = compose(
        &[gate.middleware()],
        task_fn(|_ctx| async { Err(TaskError::msg("maintenance failed")) }),
    );

    assert!(f(ctx("m", true)).await.is_err());
    // A second exclusive acquire would hang if the first hold leaked.
    tokio::time::timeout(Duration::from_secs(1), f(ctx("m", true)))
        .await
        .expect("gate must be released")
        .unwrap_err();
}
