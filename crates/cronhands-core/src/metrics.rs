//! Per-job run metrics.
//!
//! Three families, labelled by app and job:
//! - `app_cron_evaluated_total{state}`: completed runs by outcome
//! - `app_cron_active`: runs currently in flight
//! - `app_cron_evaluated_duration_seconds{state}`: run time summary
//!
//! `state` is one of `ok`, `error` or `skipped`.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

use crate::context::JobContext;
use crate::error::TaskResult;
use crate::middleware::{middleware_fn, Middleware};
use crate::task::TaskFn;

const NAMESPACE: &str = "app_cron";

/// Metric state label for a completed run.
fn state_label(result: &TaskResult) -> &'static str {
    match result {
        Ok(()) => "ok",
        Err(e) if e.is_skipped() => "skipped",
        Err(_) => "error",
    }
}

type JobKey = (String, String);
type StateKey = (String, String, &'static str);

#[derive(Debug, Default)]
struct DurationSummary {
    sum_micros: AtomicU64,
    count: AtomicU64,
}

/// Holds one unit of the active gauge; released on drop, so a run future
/// dropped mid-flight still decrements it.
struct ActiveGauge {
    metrics: Arc<JobMetrics>,
    app: Arc<str>,
    job: String,
}

impl ActiveGauge {
    fn new(metrics: Arc<JobMetrics>, app: Arc<str>, job: String) -> Self {
        metrics.add_active(&app, &job, 1);
        Self { metrics, app, job }
    }
}

impl Drop for ActiveGauge {
    fn drop(&mut self) {
        self.metrics.add_active(&self.app, &self.job, -1);
    }
}

/// Escape a Prometheus label value.
fn escape_label(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

/// In-process metrics registry for job runs.
#[derive(Debug, Default)]
pub struct JobMetrics {
    evaluated: DashMap<StateKey, AtomicU64>,
    active: DashMap<JobKey, AtomicI64>,
    durations: DashMap<StateKey, DurationSummary>,
}

impl JobMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Middleware recording metrics under the `app` label.
    pub fn middleware(self: &Arc<Self>, app: impl Into<String>) -> Middleware {
        let metrics = self.clone();
        let app: Arc<str> = Arc::from(app.into());
        middleware_fn(move |ctx: JobContext, next: TaskFn| {
            let metrics = metrics.clone();
            let app = app.clone();
            async move {
                let job = ctx.name().to_string();
                let start = Instant::now();

                let active = ActiveGauge::new(metrics.clone(), app.clone(), job.clone());
                let result = next(ctx).await;
                drop(active);
                metrics.record(&app, &job, state_label(&result), start.elapsed().as_micros() as u64);

                result
            }
        })
    }

    fn add_active(&self, app: &str, job: &str, delta: i64) {
        self.active
            .entry((app.to_string(), job.to_string()))
            .or_default()
            .fetch_add(delta, Ordering::Relaxed);
    }

    fn record(&self, app: &str, job: &str, state: &'static str, micros: u64) {
        let key = (app.to_string(), job.to_string(), state);
        self.evaluated
            .entry(key.clone())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
        let summary = self.durations.entry(key).or_default();
        summary.sum_micros.fetch_add(micros, Ordering::Relaxed);
        summary.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Completed runs for `job` with the given state label.
    pub fn evaluated(&self, app: &str, job: &str, state: &str) -> u64 {
        self.evaluated
            .iter()
            .find(|e| e.key().0 == app && e.key().1 == job && e.key().2 == state)
            .map(|e| e.value().load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Runs of `job` currently in flight.
    pub fn active(&self, app: &str, job: &str) -> i64 {
        self.active
            .get(&(app.to_string(), job.to_string()))
            .map(|v| v.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Export in Prometheus text format, sorted by labels.
    pub fn export(&self) -> String {
        let mut out = String::new();

        let mut evaluated: Vec<_> = self
            .evaluated
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();
        evaluated.sort();
        let _ = writeln!(out, "# HELP {NAMESPACE}_evaluated_total Track all evaluations of cron.");
        let _ = writeln!(out, "# TYPE {NAMESPACE}_evaluated_total counter");
        for ((app, job, state), value) in evaluated {
            let (app, job) = (escape_label(&app), escape_label(&job));
            let _ = writeln!(
                out,
                "{NAMESPACE}_evaluated_total{{app=\"{app}\",cron=\"{job}\",state=\"{state}\"}} {value}"
            );
        }

        let mut active: Vec<_> = self
            .active
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();
        active.sort();
        let _ = writeln!(out, "# HELP {NAMESPACE}_active Track current status of cron.");
        let _ = writeln!(out, "# TYPE {NAMESPACE}_active gauge");
        for ((app, job), value) in active {
            let (app, job) = (escape_label(&app), escape_label(&job));
            let _ = writeln!(out, "{NAMESPACE}_active{{app=\"{app}\",cron=\"{job}\"}} {value}");
        }

        let mut durations: Vec<_> = self
            .durations
            .iter()
            .map(|e| {
                let summary = e.value();
                (
                    e.key().clone(),
                    summary.sum_micros.load(Ordering::Relaxed),
                    summary.count.load(Ordering::Relaxed),
                )
            })
            .collect();
        durations.sort();
        let _ = writeln!(
            out,
            "# HELP {NAMESPACE}_evaluated_duration_seconds Response time by cron."
        );
        let _ = writeln!(out, "# TYPE {NAMESPACE}_evaluated_duration_seconds summary");
        for ((app, job, state), sum, count) in durations {
            let labels = format!(
                "app=\"{}\",cron=\"{}\",state=\"{state}\"",
                escape_label(&app),
                escape_label(&job)
            );
            let _ = writeln!(
                out,
                "{NAMESPACE}_evaluated_duration_seconds_sum{{{labels}}} {}",
                sum as f64 / 1_000_000.0
            );
            let _ = writeln!(
                out,
                "{NAMESPACE}_evaluated_duration_seconds_count{{{labels}}} {count}"
            );
        }

        out
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
