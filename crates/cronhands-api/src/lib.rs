//! # CronHands API
//!
//! HTTP surface for a cron [`Manager`](cronhands_core::Manager).
//!
//! ```text
//! GET  <path>             - status page (JSON, HTML or plain text by Accept)
//! GET  <path>?start=name  - start a run, redirect back
//! POST <path>/run/{name}  - start a run
//! GET  /metrics           - job metrics
//! GET  /livez             - liveness probe
//! ```

pub mod error;
pub mod render;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use render::{Format, HtmlRenderer};
pub use routes::{cron_router, AppState};
pub use server::ApiServer;
