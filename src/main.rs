//! cronhands - cron job manager with middleware and a status page.
//!
//! Main entry point for the cronhands CLI and server.

mod cli;
mod demo;
mod server;

use clap::Parser;
use cronhands_config::{ConfigLoader, ConfigValidator};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = ConfigLoader::load_or_default(cli.config.as_deref())?;

    match cli.command {
        None => {
            server::init_tracing(&config.logging)?;
            server::run_server(config).await
        }
        Some(Commands::Run { host, port }) => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            server::init_tracing(&config.logging)?;
            server::run_server(config).await
        }
        Some(Commands::Validate) => {
            let result = ConfigValidator::validate(&config);
            for warning in &result.warnings {
                println!("warning: {}: {}", warning.path, warning.message);
            }
            result.into_result()?;
            let (manager, _) = server::build_manager(&config)?;
            println!("configuration ok: {} job(s)", manager.len());
            Ok(())
        }
        Some(Commands::Schedule) => server::print_schedule(config).await,
    }
}
