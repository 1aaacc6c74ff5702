//! Presentation of state snapshots.
//!
//! Three formats are served from the same snapshot: JSON for machines, an
//! HTML table for browsers and an aligned text table for terminals.

use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cronhands_core::{States, TaskPhase, TaskSnapshot};
use minijinja::Environment;
use serde::Serialize;

use crate::error::ApiError;

const TEMPLATE: &str = "states.html";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Response format chosen from the `Accept` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Html,
    Text,
}

impl Format {
    /// JSON wins over HTML; anything else is plain text.
    pub fn from_accept(accept: &str) -> Self {
        if accept.contains("application/json") {
            Format::Json
        } else if accept.contains("text/html") {
            Format::Html
        } else {
            Format::Text
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Format::Json => "application/json",
            Format::Html => "text/html; charset=utf-8",
            Format::Text => "text/plain; charset=utf-8",
        }
    }
}

/// Serialize the snapshot as a JSON array.
pub fn json(states: &States) -> Result<String, ApiError> {
    Ok(serde_json::to_string(states)?)
}

/// Aligned `cron | schedule | next | state` table.
pub fn text(states: &States, now: DateTime<Utc>) -> String {
    let mut rows: Vec<[String; 4]> = vec![[
        "cron".to_string(),
        "schedule".to_string(),
        "next".to_string(),
        "state".to_string(),
    ]];

    for s in states.iter() {
        let maintenance = if s.is_maintenance { " (maintenance)" } else { "" };
        let next = match s.next_run {
            None => "never".to_string(),
            Some(next) if next < now => "(overdue)".to_string(),
            Some(next) => format!("(starts in {})", until(now, next)),
        };
        rows.push([
            format!("cron={}{}", s.name, maintenance),
            s.schedule.clone(),
            next,
            s.state.to_string(),
        ]);
    }

    let mut widths = [0usize; 3];
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    for row in &rows {
        for (cell, width) in row.iter().zip(widths) {
            let _ = write!(out, "  {:<width$}  |", cell, width = width);
        }
        let _ = writeln!(out, "  {}", row[3]);
    }
    out
}

/// Row as seen by the HTML template.
#[derive(Debug, Serialize)]
struct HtmlRow<'a> {
    id: String,
    name: &'a str,
    maintenance: bool,
    schedule: &'a str,
    state: TaskPhase,
    style: &'static str,
    last_error: &'a str,
    duration: String,
    updated: String,
    last_run: String,
    next_run: String,
    overdue: bool,
}

impl<'a> HtmlRow<'a> {
    fn new(s: &'a TaskSnapshot, now: DateTime<Utc>) -> Self {
        let overdue = s.next_run.is_some_and(|next| next < now);
        let next_run = match s.next_run {
            None => String::new(),
            Some(_) if overdue => "overdue".to_string(),
            Some(next) => format!("{} (in {})", next.format(TIME_FORMAT), until(now, next)),
        };

        Self {
            id: s.id.map(|id| id.to_string()).unwrap_or_default(),
            name: &s.name,
            maintenance: s.is_maintenance,
            schedule: &s.schedule,
            state: s.state,
            style: phase_style(s.state),
            last_error: s.last_error.as_deref().unwrap_or_default(),
            duration: if s.last_duration.is_zero() {
                String::new()
            } else {
                human_duration(s.last_duration)
            },
            updated: relative_time(s.last_updated_at, now),
            last_run: relative_time(s.last_run, now),
            next_run,
            overdue,
        }
    }
}

fn phase_style(phase: TaskPhase) -> &'static str {
    match phase {
        TaskPhase::Running => "background-color: #e6f7ff",
        TaskPhase::Disabled => "background-color: #f5f5f5",
        TaskPhase::Skipped => "background-color: #fff7e6",
        TaskPhase::Idle => "background-color: #e6ffed",
    }
}

/// HTML status page renderer.
#[derive(Debug)]
pub struct HtmlRenderer {
    env: Environment<'static>,
    title: String,
    refresh_secs: u32,
}

impl HtmlRenderer {
    pub fn new() -> Result<Self, ApiError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);
        env.add_template(TEMPLATE, include_str!("../templates/states.html"))?;
        Ok(Self {
            env,
            title: "Cron Jobs".to_string(),
            refresh_secs: 10,
        })
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn render(&self, states: &States, now: DateTime<Utc>) -> Result<String, ApiError> {
        let rows: Vec<HtmlRow<'_>> = states.iter().map(|s| HtmlRow::new(s, now)).collect();
        let template = self.env.get_template(TEMPLATE)?;
        Ok(template.render(minijinja::context! {
            title => &self.title,
            refresh_secs => self.refresh_secs,
            rows => rows,
        })?)
    }
}

/// `2026-01-02 10:00:00 (5m0s ago)`, or empty when unset.
fn relative_time(at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(at) = at else {
        return String::new();
    };
    let stamp = at.format(TIME_FORMAT);
    if at <= now {
        format!("{} ({} ago)", stamp, until(at, now))
    } else {
        format!("{} (in {})", stamp, until(now, at))
    }
}

/// Whole-second span from `from` to `to`, zero if negative.
fn until(from: DateTime<Utc>, to: DateTime<Utc>) -> String {
    let secs = (to - from).num_seconds().max(0) as u64;
    clock(secs)
}

/// Sub-second runs are shown in milliseconds, longer ones in whole seconds.
pub fn human_duration(d: Duration) -> String {
    if d < Duration::from_secs(1) {
        return format!("{}ms", d.as_millis());
    }
    clock(d.as_secs_f64().round() as u64)
}

fn clock(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h{m}m{s}s")
    } else if m > 0 {
        format!("{m}m{s}s")
    } else {
        format!("{s}s")
    }
}

#[cfg(test)]
#[path = "render_tests.rs"]
mod tests;
