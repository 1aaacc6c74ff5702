//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub manager: ManagerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Mount path of the status page.
    #[serde(default = "default_path")]
    pub path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_path(),
        }
    }
}

impl ServerConfig {
    /// `host:port` listen address.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    2112
}

fn default_path() -> String {
    "/debug/cron".to_string()
}

/// Manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Name reported by logging and metrics middleware.
    #[serde(default = "default_manager_name")]
    pub name: String,

    /// Mark runs as executing in a development environment.
    #[serde(default)]
    pub devel: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            name: default_manager_name(),
            devel: false,
        }
    }
}

fn default_manager_name() -> String {
    "cronhands".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set.
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,

    /// Directory for daily rolling log files. Console only when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            dir: None,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

/// One demo job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,

    /// Cron expression. Empty or `disabled` for a manual-only job.
    #[serde(default)]
    pub schedule: String,

    #[serde(default)]
    pub maintenance: bool,

    /// Upper bound of the random sleep per run.
    #[serde(default = "default_max_sleep_secs")]
    pub max_sleep_secs: u64,

    /// Probability that a run fails.
    #[serde(default = "default_rate")]
    pub error_rate: f64,

    /// Probability that a run panics.
    #[serde(default = "default_rate")]
    pub panic_rate: f64,
}

impl JobConfig {
    pub fn new(name: impl Into<String>, schedule: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schedule: schedule.into(),
            maintenance: false,
            max_sleep_secs: default_max_sleep_secs(),
            error_rate: default_rate(),
            panic_rate: default_rate(),
        }
    }
}

fn default_max_sleep_secs() -> u64 {
    70
}

fn default_rate() -> f64 {
    0.1
}
