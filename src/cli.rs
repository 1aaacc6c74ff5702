//! CLI definitions for cronhands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// cronhands CLI.
#[derive(Parser)]
#[command(name = "cronhands")]
#[command(about = "Cron job manager with a status page")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path (defaults to the user config dir)
    #[arg(short, long, env = "CRONHANDS_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the manager and status server in foreground (default)
    Run {
        /// Server host, overrides `server.host`
        #[arg(long, env = "CRONHANDS_HOST")]
        host: Option<String>,

        /// Server port, overrides `server.port`
        #[arg(long, env = "CRONHANDS_PORT")]
        port: Option<u16>,
    },

    /// Validate the configuration and job schedules
    Validate,

    /// Print the job schedule and exit
    Schedule,
}
