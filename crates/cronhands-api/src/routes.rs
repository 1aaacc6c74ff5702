//! HTTP route definitions.
//!
//! ```text
//! GET  {path}              - Task states (JSON, HTML or text by Accept)
//! GET  {path}?start={name} - Start a task, then redirect back to {path}
//! POST {path}/run/{name}   - Start a task, 202 with a JSON body
//! GET  /metrics            - Prometheus metrics (404 when disabled)
//! GET  /livez              - Liveness probe
//! ```

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{
        HeaderMap, StatusCode,
        header::{ACCEPT, CONTENT_TYPE, LOCATION},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use cronhands_core::{JobMetrics, Manager};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::render::{self, Format, HtmlRenderer};

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<Manager>,
    pub metrics: Option<Arc<JobMetrics>>,
    /// Status page path, without a trailing `/` unless it is the root.
    pub path: String,
    pub html: Arc<HtmlRenderer>,
}

impl AppState {
    pub fn new(manager: Arc<Manager>, path: &str) -> Result<Self, ApiError> {
        Ok(Self {
            manager,
            metrics: None,
            path: normalize_path(path),
            html: Arc::new(HtmlRenderer::new()?),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<JobMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_renderer(mut self, html: HtmlRenderer) -> Self {
        self.html = Arc::new(html);
        self
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("path", &self.path)
            .field("tasks", &self.manager.len())
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Build the router serving the status page and its companions.
pub fn cron_router(state: AppState) -> Router {
    let path = state.path.clone();
    let run_path = if path == "/" {
        "/run/{name}".to_string()
    } else {
        format!("{}/run/{{name}}", path)
    };

    Router::new()
        .route(&path, get(task_states))
        .route(&run_path, post(run_task))
        .route("/metrics", get(prometheus_metrics))
        .route("/livez", get(liveness_probe))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct StatesQuery {
    pub start: Option<String>,
}

/// Render task states, or start a task when `?start=` is present.
pub async fn task_states(
    State(state): State<AppState>,
    Query(query): Query<StatesQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if let Some(name) = query.start.filter(|name| !name.is_empty()) {
        match state.manager.trigger(&name) {
            Ok(_) => info!(job = %name, "cron job started from status page"),
            Err(err) => warn!(job = %name, error = %err, "cannot start cron job"),
        }
        return Ok(see_path(&state.path));
    }

    let accept = headers
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let format = Format::from_accept(accept);
    let states = state.manager.state();

    let body = match format {
        Format::Json => render::json(&states)?,
        Format::Html => state.html.render(&states, Utc::now())?,
        Format::Text => render::text(&states, Utc::now()),
    };

    Ok(([(CONTENT_TYPE, format.content_type())], body).into_response())
}

/// 302 back to the status page so a reload does not start the task again.
fn see_path(path: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, path.to_string())]).into_response()
}

/// Start a task without waiting for it.
pub async fn run_task(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let _ = state.manager.trigger(&name)?;
    info!(job = %name, "cron job started via api");

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "job": name,
            "status": "started"
        })),
    ))
}

/// Prometheus text exposition of job metrics.
pub async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(metrics) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            metrics.export(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Liveness probe.
pub async fn liveness_probe() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "alive"
    }))
}

#[cfg(test)]
#[path = "routes_tests.rs"]
mod tests;
