//! Server initialization and startup logic for cronhands.

use std::sync::{Arc, OnceLock};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use cronhands_api::{ApiServer, AppState, HtmlRenderer, render};
use cronhands_config::{Config, ConfigValidator, LoggingConfig};
use cronhands_core::{
    JobMetrics, Manager, ManagerBuilder, with_devel, with_logging, with_maintenance, with_recover,
    with_skip_active,
};

use crate::demo::DemoTask;

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize tracing with console and optional file output.
///
/// `RUST_LOG` wins over `logging.level`. Log files rotate daily and the last
/// 30 are kept.
pub(crate) fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let file_layer = match &logging.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("cronhands")
                .filename_suffix("log")
                .max_log_files(30)
                .build(dir)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let _ = GUARD.set(guard);
            Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
        }
        None => None,
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(logging.json.then(|| fmt::layer().json()))
        .with((!logging.json).then(|| fmt::layer().with_target(true).with_ansi(true)))
        .with(file_layer)
        .try_init()?;

    Ok(())
}

/// Build and activate a manager with one demo task per configured job.
///
/// Middleware order, outermost first: metrics, devel, logging, maintenance
/// gate, duplicate-run guard, recover.
pub(crate) fn build_manager(config: &Config) -> anyhow::Result<(Arc<Manager>, Arc<JobMetrics>)> {
    let metrics = JobMetrics::new();
    let mut builder = ManagerBuilder::new();

    builder.use_middleware([
        metrics.middleware(config.manager.name.clone()),
        with_devel(config.manager.devel),
        with_logging(config.manager.name.clone()),
        with_maintenance(),
        with_skip_active(),
        with_recover(),
    ]);

    for job in &config.jobs {
        builder.add_runner(
            job.name.clone(),
            job.schedule.clone(),
            job.maintenance,
            Arc::new(DemoTask::from_config(job)),
        );
    }

    let manager = builder.activate()?;
    Ok((manager, metrics))
}

/// Start the manager, print its schedule and stop it again.
pub(crate) async fn print_schedule(config: Config) -> anyhow::Result<()> {
    let (manager, _) = build_manager(&config)?;
    manager.start()?;
    print!("{}", render::text(&manager.state(), Utc::now()));
    manager.stop().await;
    Ok(())
}

/// Run the manager and the status server until Ctrl-C.
pub(crate) async fn run_server(config: Config) -> anyhow::Result<()> {
    info!("Starting cronhands v{}", env!("CARGO_PKG_VERSION"));

    let warnings = ConfigValidator::validate(&config).into_result()?;
    for warning in warnings {
        warn!(path = %warning.path, "{}", warning.message);
    }

    let (manager, metrics) = build_manager(&config)?;
    manager.start()?;

    let states = manager.state();
    print!("{}", render::text(&states, Utc::now()));
    info!(manager = %config.manager.name, tasks = %states, "cron manager started");

    let state = AppState::new(manager.clone(), &config.server.path)?
        .with_metrics(metrics)
        .with_renderer(HtmlRenderer::new()?.with_title(format!("{} jobs", config.manager.name)));
    info!(
        "status page at http://{}{}",
        config.server.addr(),
        state.path
    );

    let cancel = CancellationToken::new();
    let server = ApiServer::new(config.server.addr(), state);
    let mut server_task = tokio::spawn(server.run(cancel.clone()));

    let server_exit = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("shutdown signal received");
            None
        }
        result = &mut server_task => Some(result),
    };

    cancel.cancel();
    manager.stop().await;
    info!("all cron jobs finished");

    let result = match server_exit {
        Some(result) => result,
        None => server_task.await,
    };
    result??;
    Ok(())
}
