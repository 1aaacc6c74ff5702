//! Cron scheduler collaborator.
//!
//! The manager only needs a small surface from a scheduler: parse and
//! register expressions, report fire times, and start and stop firing.
//! [`CronScheduler`] implements it on top of the `cron` crate with one Tokio
//! loop per entry.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::error::SchedulerError;

/// Callable fired by the scheduler.
pub type ScheduledJob = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Identifier the scheduler assigns to a registered entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fire times of one entry. Both are `None` until the scheduler has started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: EntryId,
    pub prev: Option<DateTime<Utc>>,
    pub next: Option<DateTime<Utc>>,
}

/// Future returned by [`Scheduler::stop`].
///
/// Completes once every invocation the scheduler already fired has finished.
pub struct StopSignal(BoxFuture<'static, ()>);

impl StopSignal {
    pub fn new(fut: impl Future<Output = ()> + Send + 'static) -> Self {
        Self(Box::pin(fut))
    }

    /// A signal that is already complete.
    pub fn ready() -> Self {
        Self::new(async {})
    }
}

impl Future for StopSignal {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.0.as_mut().poll(cx)
    }
}

impl fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopSignal").finish_non_exhaustive()
    }
}

/// Scheduler surface used by the manager.
pub trait Scheduler: Send + Sync {
    /// Check that `expr` parses under the standard grammar.
    fn validate(&self, expr: &str) -> Result<(), SchedulerError>;

    /// Register `job` to fire on `expr`. May be called while running.
    fn register(&self, expr: &str, job: ScheduledJob) -> Result<EntryId, SchedulerError>;

    /// Fire times for every registered entry.
    fn entries(&self) -> Vec<Entry>;

    /// Begin firing entries.
    fn start(&self) -> Result<(), SchedulerError>;

    /// Stop firing. The returned signal completes when in-flight
    /// invocations have finished.
    fn stop(&self) -> StopSignal;
}

/// A parsed expression: calendar fields or a fixed interval.
#[derive(Debug, Clone)]
pub enum ParsedSchedule {
    Cron(cron::Schedule),
    /// `@every`, in whole seconds.
    Every(TimeDelta),
}

impl ParsedSchedule {
    /// Fire times strictly after `after`, in order.
    ///
    /// Intervals are counted from `after` truncated to the second.
    pub fn after<'a>(
        &'a self,
        after: &DateTime<Utc>,
    ) -> Box<dyn Iterator<Item = DateTime<Utc>> + 'a> {
        match self {
            ParsedSchedule::Cron(schedule) => Box::new(schedule.after(after)),
            ParsedSchedule::Every(delay) => {
                let delay = *delay;
                let first = after.trunc_subsecs(0).checked_add_signed(delay);
                Box::new(std::iter::successors(first, move |t| {
                    t.checked_add_signed(delay)
                }))
            }
        }
    }
}

/// Parse a standard cron expression.
///
/// Accepts five fields (minute, hour, day of month, month, day of week) or
/// one of `@yearly`, `@annually`, `@monthly`, `@weekly`, `@daily`,
/// `@midnight`, `@hourly` and `@every <duration>`. Day-of-week numbers use
/// the usual `0-7` numbering with both `0` and `7` meaning Sunday.
pub fn parse_standard(expr: &str) -> Result<ParsedSchedule, SchedulerError> {
    let invalid = |reason: String| SchedulerError::InvalidExpression {
        expr: expr.to_string(),
        reason,
    };

    let trimmed = expr.trim();
    let normalized = if let Some(descriptor) = trimmed.strip_prefix('@') {
        let fields = match descriptor.to_ascii_lowercase().as_str() {
            "yearly" | "annually" => "0 0 0 1 1 *",
            "monthly" => "0 0 0 1 * *",
            "weekly" => "0 0 0 * * SUN",
            "daily" | "midnight" => "0 0 0 * * *",
            "hourly" => "0 0 * * * *",
            "every" => return Err(invalid("@every requires a duration".to_string())),
            other if other.starts_with("every ") => {
                let delay = every_interval(&descriptor["every ".len()..]).map_err(invalid)?;
                return Ok(ParsedSchedule::Every(delay));
            }
            other => return Err(invalid(format!("unknown descriptor @{other}"))),
        };
        fields.to_string()
    } else {
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(format!(
                "expected exactly 5 fields, found {}",
                fields.len()
            )));
        }
        let dow = weekday_names(fields[4]).map_err(invalid)?;
        format!(
            "0 {} {} {} {} {}",
            fields[0], fields[1], fields[2], fields[3], dow
        )
    };

    cron::Schedule::from_str(&normalized)
        .map(ParsedSchedule::Cron)
        .map_err(|e| invalid(e.to_string()))
}

/// Interval of `@every`: truncated to whole seconds, at least one second.
fn every_interval(value: &str) -> Result<TimeDelta, String> {
    let delay = parse_duration(value.trim())?;
    let secs = delay.as_secs().max(1);
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .ok_or_else(|| format!("interval {value:?} is too large"))
}

/// Parse a duration such as `90s`, `1h30m`, `1.5h` or `500ms`.
///
/// Units are `ns`, `us`, `µs`, `ms`, `s`, `m` and `h`; every number needs
/// one.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        let (num, tail) = rest.split_at(num_end);
        if num.is_empty() {
            return Err(format!("invalid duration {s:?}"));
        }
        let value: f64 = num
            .parse()
            .map_err(|_| format!("invalid number {num:?} in duration {s:?}"))?;

        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_end);
        let nanos_per_unit = match unit {
            "ns" => 1e0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(format!("missing unit in duration {s:?}")),
            other => return Err(format!("unknown unit {other:?} in duration {s:?}")),
        };
        total += value * nanos_per_unit;
        rest = next;
    }

    Duration::try_from_secs_f64(total / 1e9).map_err(|e| format!("invalid duration {s:?}: {e}"))
}

const WEEKDAYS: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// Rewrite numeric day-of-week values as names.
///
/// The `cron` crate numbers weekdays from 1 (Sunday), so numbers are never
/// passed through. Numeric ranges with a step are expanded to a list.
fn weekday_names(field: &str) -> Result<String, String> {
    let mut parts = Vec::new();
    for item in field.split(',') {
        let translated = match item.split_once('/') {
            Some((range, step)) => match numeric_bounds(range) {
                Some((lo, hi)) => stepped_weekdays(lo, hi, step)?,
                None => format!("{}/{step}", weekday_range(range)?),
            },
            None => weekday_range(item)?,
        };
        parts.push(translated);
    }
    Ok(parts.join(","))
}

fn weekday_range(range: &str) -> Result<String, String> {
    match range.split_once('-') {
        Some((lo, hi)) => {
            let lo_name = weekday(lo)?;
            let hi_name = weekday(hi)?;
            // 7 closes the week: N-7 is N-SAT plus Sunday
            Ok(match (hi == "7", lo_name) {
                (true, "SUN") => "SUN-SAT".to_string(),
                (true, lo_name) => format!("{lo_name}-SAT,SUN"),
                _ => format!("{lo_name}-{hi_name}"),
            })
        }
        None => Ok(weekday(range)?.to_string()),
    }
}

/// Bounds of `*`, `N` or `N-M` in standard numbering. `N` alone runs to
/// Saturday. `None` when the range uses names.
fn numeric_bounds(range: &str) -> Option<(usize, usize)> {
    if range == "*" {
        return Some((0, 6));
    }
    match range.split_once('-') {
        Some((lo, hi)) => Some((lo.parse().ok()?, hi.parse().ok()?)),
        None => Some((range.parse().ok()?, 6)),
    }
}

fn stepped_weekdays(lo: usize, hi: usize, step: &str) -> Result<String, String> {
    let step: usize = step
        .parse()
        .map_err(|_| format!("invalid day of week step {step:?}"))?;
    if step == 0 {
        return Err("day of week step must be positive".to_string());
    }
    if hi >= WEEKDAYS.len() || lo > hi {
        return Err(format!("day of week range {lo}-{hi} out of range 0-7"));
    }

    let mut days: Vec<&str> = Vec::new();
    for n in (lo..=hi).step_by(step) {
        if !days.contains(&WEEKDAYS[n]) {
            days.push(WEEKDAYS[n]);
        }
    }
    Ok(days.join(","))
}

fn weekday(value: &str) -> Result<&str, String> {
    match value.parse::<usize>() {
        Ok(n) => WEEKDAYS
            .get(n)
            .copied()
            .ok_or_else(|| format!("day of week {n} out of range 0-7")),
        Err(_) => Ok(value),
    }
}

struct CronEntry {
    id: EntryId,
    expr: String,
    schedule: ParsedSchedule,
    job: ScheduledJob,
    times: Mutex<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)>,
}

impl CronEntry {
    fn snapshot(&self) -> Entry {
        let (prev, next) = *self.times.lock();
        Entry {
            id: self.id,
            prev,
            next,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Running,
    Stopped,
}

struct Inner {
    entries: Mutex<Vec<Arc<CronEntry>>>,
    state: Mutex<RunState>,
    handle: Mutex<Option<Handle>>,
    next_id: AtomicU64,
    cancel: CancellationToken,
    loops: TaskTracker,
    jobs: TaskTracker,
}

/// Scheduler backed by the `cron` crate.
///
/// Each entry runs its own loop that sleeps until the next fire time and
/// then spawns the job, so a slow job never delays other entries or its own
/// next fire.
#[derive(Clone)]
pub struct CronScheduler {
    inner: Arc<Inner>,
}

impl Default for CronScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl CronScheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(Vec::new()),
                state: Mutex::new(RunState::Idle),
                handle: Mutex::new(None),
                next_id: AtomicU64::new(1),
                cancel: CancellationToken::new(),
                loops: TaskTracker::new(),
                jobs: TaskTracker::new(),
            }),
        }
    }

    /// Whether the scheduler is currently firing entries.
    pub fn is_running(&self) -> bool {
        *self.inner.state.lock() == RunState::Running
    }

    fn spawn_loop(&self, entry: Arc<CronEntry>, handle: &Handle) {
        let cancel = self.inner.cancel.clone();
        let jobs = self.inner.jobs.clone();
        self.inner
            .loops
            .spawn_on(run_entry(entry, cancel, jobs), handle);
    }
}

impl fmt::Debug for CronScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CronScheduler")
            .field("entries", &self.inner.entries.lock().len())
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}

impl Scheduler for CronScheduler {
    fn validate(&self, expr: &str) -> Result<(), SchedulerError> {
        parse_standard(expr).map(|_| ())
    }

    fn register(&self, expr: &str, job: ScheduledJob) -> Result<EntryId, SchedulerError> {
        let schedule = parse_standard(expr)?;
        let entry = Arc::new(CronEntry {
            id: EntryId(self.inner.next_id.fetch_add(1, Ordering::Relaxed)),
            expr: expr.to_string(),
            schedule,
            job,
            times: Mutex::new((None, None)),
        });
        let id = entry.id;

        let state = self.inner.state.lock();
        self.inner.entries.lock().push(entry.clone());
        if *state == RunState::Running {
            if let Some(handle) = self.inner.handle.lock().clone() {
                self.spawn_loop(entry, &handle);
            }
        }
        drop(state);

        debug!(entry = %id, expr, "cron entry registered");
        Ok(id)
    }

    fn entries(&self) -> Vec<Entry> {
        self.inner
            .entries
            .lock()
            .iter()
            .map(|e| e.snapshot())
            .collect()
    }

    fn start(&self) -> Result<(), SchedulerError> {
        let handle = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;

        let mut state = self.inner.state.lock();
        match *state {
            RunState::Running => return Ok(()),
            RunState::Stopped => return Err(SchedulerError::Stopped),
            RunState::Idle => {}
        }
        *state = RunState::Running;
        *self.inner.handle.lock() = Some(handle.clone());

        let entries = self.inner.entries.lock().clone();
        for entry in entries {
            self.spawn_loop(entry, &handle);
        }

        info!("cron scheduler started");
        Ok(())
    }

    fn stop(&self) -> StopSignal {
        {
            let mut state = self.inner.state.lock();
            if *state == RunState::Stopped {
                return StopSignal::ready();
            }
            *state = RunState::Stopped;
        }

        self.inner.cancel.cancel();
        self.inner.loops.close();
        self.inner.jobs.close();
        for entry in self.inner.entries.lock().iter() {
            entry.times.lock().1 = None;
        }
        info!("cron scheduler stopped");

        let loops = self.inner.loops.clone();
        let jobs = self.inner.jobs.clone();
        StopSignal::new(async move {
            loops.wait().await;
            jobs.wait().await;
        })
    }
}

/// Sleep until each fire time of `entry` and spawn its job.
async fn run_entry(entry: Arc<CronEntry>, cancel: CancellationToken, jobs: TaskTracker) {
    let mut after = Utc::now();
    loop {
        let Some(next) = entry.schedule.after(&after).next() else {
            debug!(entry = %entry.id, expr = %entry.expr, "cron entry has no upcoming fire time");
            entry.times.lock().1 = None;
            return;
        };
        entry.times.lock().1 = Some(next);

        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        entry.times.lock().0 = Some(next);
        let job = entry.job.clone();
        jobs.spawn(async move { job().await });

        // fire times missed while this loop was delayed are skipped
        after = next.max(Utc::now());
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
