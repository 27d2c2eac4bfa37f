//! One-shot reconciliation pass
//!
//! `repowatch check status` / `repowatch check storage` run a single pass
//! against the configured store, for use straight from crontab.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use repowatch_core::{ChannelOutcome, ConfigStore, PassKind, PassOutcome, Reconciler, RepowatchConfig};

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum Pass {
    /// Last-save staleness and alerts
    Status,
    /// Storage usage
    Storage,
}

impl From<Pass> for PassKind {
    fn from(pass: Pass) -> Self {
        match pass {
            Pass::Status => PassKind::Status,
            Pass::Storage => PassKind::Storage,
        }
    }
}

#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Which pass to run
    #[arg(value_enum)]
    pub pass: Pass,
}

pub async fn run_check(args: CheckArgs, config: RepowatchConfig) -> Result<()> {
    let kind = PassKind::from(args.pass);
    let store = ConfigStore::open(&config.store)
        .await
        .context("Failed to open store")?;
    let reconciler = Reconciler::from_config(&config, store);

    let outcome = reconciler.run(kind).await?;

    match outcome {
        PassOutcome::NothingToCheck => {
            println!("{} check executed. No repository to check.", kind.label());
        }
        PassOutcome::Completed(summary) => {
            println!(
                "{} check executed: {} repositories updated",
                kind.label(),
                summary.matched
            );
            if !summary.alerted.is_empty() {
                println!("Alerted: {}", summary.alerted.join(", "));
            }
            if let Some(report) = summary.dispatch {
                for (channel, outcome) in [("email", &report.email), ("apprise", &report.apprise)] {
                    match outcome {
                        ChannelOutcome::Sent => println!("  {}: sent", channel),
                        ChannelOutcome::Skipped(why) => println!("  {}: skipped ({})", channel, why),
                        ChannelOutcome::Failed(why) => println!("  {}: failed ({})", channel, why),
                    }
                }
            }
        }
    }

    Ok(())
}
