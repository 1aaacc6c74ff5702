//! Per-task execution state.
//!
//! [`StateTracker::update`] is the only writer; [`StateTracker::snapshot`]
//! copies every record out under the same mutex, so presentation code never
//! holds a reference to live state.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{TaskError, TaskResult};
use crate::scheduler::{Entry, EntryId};
use crate::task::Schedule;

/// Current phase of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPhase {
    Idle,
    Running,
    Disabled,
    Skipped,
}

impl TaskPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPhase::Idle => "idle",
            TaskPhase::Running => "running",
            TaskPhase::Disabled => "disabled",
            TaskPhase::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable record for one task.
#[derive(Debug)]
struct Slot {
    name: String,
    schedule: Schedule,
    maintenance: bool,
    entry: Option<EntryId>,

    phase: TaskPhase,
    last_error: Option<String>,
    updated_at: Option<DateTime<Utc>>,
    duration: Duration,
    started: Option<Instant>,
    in_flight: u32,
}

/// Synchronized per-task state, indexed by registration order.
#[derive(Debug, Default)]
pub struct StateTracker {
    slots: Mutex<Vec<Slot>>,
}

impl StateTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a task record in phase `idle`. Returns its index.
    pub fn track(&self, name: &str, schedule: &Schedule, maintenance: bool) -> usize {
        let mut slots = self.slots.lock();
        slots.push(Slot {
            name: name.to_string(),
            schedule: schedule.clone(),
            maintenance,
            entry: None,
            phase: TaskPhase::Idle,
            last_error: None,
            updated_at: None,
            duration: Duration::ZERO,
            started: None,
            in_flight: 0,
        });
        slots.len() - 1
    }

    /// Store the scheduler entry for a task.
    pub fn set_entry(&self, idx: usize, entry: Option<EntryId>) {
        if let Some(slot) = self.slots.lock().get_mut(idx) {
            slot.entry = entry;
        }
    }

    /// Apply a phase transition.
    ///
    /// - `running` starts a run. If another run of the task is already in
    ///   flight the record is left alone.
    /// - `idle` ends a run. Coming from `running`, the elapsed time since the
    ///   run started is stored as the last duration. If another run is still
    ///   in flight the phase stays `running` for it.
    /// - An `err` that is or wraps the skip signal is stored as phase
    ///   `skipped` with no error. If another run is still in flight the
    ///   record keeps showing that run.
    pub fn update(&self, idx: usize, phase: TaskPhase, err: Option<&TaskError>) {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(idx) else {
            return;
        };
        let now = Utc::now();

        match phase {
            TaskPhase::Running => {
                slot.in_flight += 1;
                if slot.in_flight > 1 && slot.phase == TaskPhase::Running {
                    return;
                }
                slot.phase = TaskPhase::Running;
                slot.last_error = None;
                slot.started = Some(Instant::now());
                slot.updated_at = Some(now);
            }
            TaskPhase::Idle | TaskPhase::Skipped => {
                let skipped = phase == TaskPhase::Skipped || err.is_some_and(TaskError::is_skipped);
                Self::close(slot, skipped, None, err, now);
            }
            TaskPhase::Disabled => {
                slot.phase = TaskPhase::Disabled;
                slot.last_error = None;
                slot.updated_at = Some(now);
            }
        }
    }

    /// End one in-flight run. `run_started` overrides the slot's start time.
    fn close(
        slot: &mut Slot,
        skipped: bool,
        run_started: Option<Instant>,
        err: Option<&TaskError>,
        now: DateTime<Utc>,
    ) {
        slot.in_flight = slot.in_flight.saturating_sub(1);
        let others_running = slot.in_flight > 0 && slot.phase == TaskPhase::Running;

        if skipped {
            if others_running {
                return;
            }
            slot.phase = TaskPhase::Skipped;
            slot.last_error = None;
            slot.started = None;
            slot.updated_at = Some(now);
            return;
        }

        if slot.phase == TaskPhase::Running {
            if let Some(started) = run_started.or(slot.started) {
                slot.duration = started.elapsed();
            }
        }
        slot.last_error = err.map(|e| e.to_string());
        slot.updated_at = Some(now);

        if others_running {
            // the remaining in-flight run keeps the record
            slot.started = Some(Instant::now());
        } else {
            slot.phase = TaskPhase::Idle;
            slot.started = None;
        }
    }

    /// Mark the start of a run and return a record that closes it.
    pub fn begin(self: &Arc<Self>, idx: usize) -> RunRecord {
        self.update(idx, TaskPhase::Running, None);
        RunRecord {
            tracker: self.clone(),
            idx,
            started: Instant::now(),
            finished: false,
        }
    }

    /// Copy out one record per task, merged with scheduler fire times.
    pub fn snapshot(&self, entries: &[Entry]) -> States {
        let by_id: HashMap<EntryId, &Entry> = entries.iter().map(|e| (e.id, e)).collect();
        let slots = self.slots.lock();

        let records = slots
            .iter()
            .map(|slot| {
                let entry = slot.entry.and_then(|id| by_id.get(&id));
                TaskSnapshot {
                    id: slot.entry,
                    name: slot.name.clone(),
                    schedule: slot.schedule.to_string(),
                    is_maintenance: slot.maintenance,
                    state: slot.phase,
                    last_error: slot.last_error.clone(),
                    last_duration: slot.duration,
                    last_updated_at: slot.updated_at,
                    last_run: entry.and_then(|e| e.prev),
                    next_run: entry.and_then(|e| e.next),
                }
            })
            .collect();

        States(records)
    }

    /// Phase of one task.
    pub fn phase(&self, idx: usize) -> Option<TaskPhase> {
        self.slots.lock().get(idx).map(|s| s.phase)
    }
}

/// Closes a run on the tracker.
///
/// Dropping it without calling [`RunRecord::finish`] (a cancelled future or a
/// panic unwinding through the pipeline) records the run as aborted, so the
/// task never stays `running`.
#[derive(Debug)]
pub struct RunRecord {
    tracker: Arc<StateTracker>,
    idx: usize,
    started: Instant,
    finished: bool,
}

impl RunRecord {
    pub fn finish(mut self, result: &TaskResult) {
        self.finished = true;
        self.close(result.as_ref().err());
    }

    fn close(&self, err: Option<&TaskError>) {
        let mut slots = self.tracker.slots.lock();
        if let Some(slot) = slots.get_mut(self.idx) {
            let skipped = err.is_some_and(TaskError::is_skipped);
            StateTracker::close(slot, skipped, Some(self.started), err, Utc::now());
        }
    }
}

impl Drop for RunRecord {
    fn drop(&mut self) {
        if !self.finished {
            self.close(Some(&TaskError::msg("run aborted")));
        }
    }
}

/// Point-in-time copy of one task's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub id: Option<EntryId>,
    pub name: String,
    pub schedule: String,
    pub is_maintenance: bool,
    pub state: TaskPhase,
    pub last_error: Option<String>,
    #[serde(rename = "last_duration_ms", serialize_with = "duration_ms")]
    pub last_duration: Duration,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

fn duration_ms<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Ordered snapshot of every task.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct States(pub Vec<TaskSnapshot>);

impl States {
    pub fn iter(&self) -> std::slice::Iter<'_, TaskSnapshot> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Find a task by name, ignoring case.
    pub fn get(&self, name: &str) -> Option<&TaskSnapshot> {
        self.0.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }
}

impl IntoIterator for States {
    type Item = TaskSnapshot;
    type IntoIter = std::vec::IntoIter<TaskSnapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// One-line summary: `name{schedule=.., next=.., state=..}` per task.
impl fmt::Display for States {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, s) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            let next = s
                .next_run
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string());
            write!(
                f,
                "{}{{schedule={:?}, next={}, state={}}}",
                s.name, s.schedule, next, s.state
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
