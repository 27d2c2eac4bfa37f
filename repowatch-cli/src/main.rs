//! repowatch CLI - backup repository health monitoring
//!
//! Entry point for the `repowatch` binary:
//! - `serve`: HTTP trigger endpoints for an external scheduler
//! - `check`: run one status or storage pass directly (crontab friendly)
//! - `config`: create and inspect the configuration file

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use repowatch_core::{ReconcileError, RepowatchConfig};

mod commands;
mod config;
mod tracing_setup;

/// sysexits EX_TEMPFAIL: another pass is running, try again later
const EXIT_BUSY: u8 = 75;

#[derive(Parser, Debug)]
#[command(
    name = "repowatch",
    author,
    version,
    about = "Watch backup repositories for stale backups and alert once per incident"
)]
struct Cli {
    /// Config file (default: ~/.repowatch/config.toml)
    #[arg(long, short = 'c', global = true, env = "REPOWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run HTTP API server (cron trigger endpoints)
    Serve(commands::serve::ServeArgs),
    /// Run one reconciliation pass now
    Check(commands::check::CheckArgs),
    /// Manage repowatch configuration (init, show, path)
    Config(config::ConfigArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env is fine
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let tracing_config = tracing_setup::TracingConfig { debug: cli.debug };
    tracing_setup::init(&tracing_config).ok();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            match err.downcast_ref::<ReconcileError>() {
                Some(e) if e.is_retryable() => ExitCode::from(EXIT_BUSY),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Config(args) => config::run_config(args, config_path)?,
        Commands::Serve(args) => {
            let config = RepowatchConfig::load(config_path).context("Failed to load config")?;
            commands::run_serve(args, config).await?
        }
        Commands::Check(args) => {
            let config = RepowatchConfig::load(config_path).context("Failed to load config")?;
            commands::run_check(args, config).await?
        }
    }

    Ok(())
}
