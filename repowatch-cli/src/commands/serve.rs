//! HTTP server command
//!
//! Runs the cron trigger endpoints until Ctrl+C / SIGTERM.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use repowatch_core::{ConfigStore, Reconciler, RepowatchConfig};
use repowatch_server::{run_server, AppState, ServerConfig};

/// Arguments for the serve command
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Address to bind to (overrides [server] bind)
    #[arg(long, short = 'b')]
    pub bind: Option<SocketAddr>,

    /// Allow permissive CORS (all origins) - use with caution
    #[arg(long)]
    pub cors_permissive: bool,
}

/// Run the HTTP server
pub async fn run_serve(args: ServeArgs, config: RepowatchConfig) -> Result<()> {
    let bind_addr = match args.bind {
        Some(addr) => addr,
        None => config
            .server
            .bind
            .parse()
            .context(format!("Invalid [server] bind address '{}'", config.server.bind))?,
    };

    let store = ConfigStore::open(&config.store)
        .await
        .context("Failed to open store")?;
    tracing::info!(store = %store.dir().display(), "store opened");

    let reconciler = Reconciler::from_config(&config, store);
    let state = AppState::new(reconciler, config.server.cron_key.clone());

    let server_config = ServerConfig {
        bind_addr,
        cors_permissive: args.cors_permissive || config.server.cors_permissive,
    };

    tracing::info!("Starting repowatch server on {}", bind_addr);
    run_server(state, server_config)
        .await
        .context("Server error")?;

    Ok(())
}
