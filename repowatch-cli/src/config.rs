use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use repowatch_core::RepowatchConfig;

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Write a config file with default values
    Init(InitArgs),
    /// Print the effective configuration (secrets masked)
    Show,
    /// Show config file path
    Path,
}

#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Force overwrite existing config
    #[arg(long, short)]
    pub force: bool,
}

pub fn run_config(args: ConfigArgs, config_path: Option<&Path>) -> Result<()> {
    match args.command {
        ConfigCommands::Init(args) => run_init(args, config_path),
        ConfigCommands::Show => run_show(config_path),
        ConfigCommands::Path => {
            println!("{}", resolve_path(config_path).display());
            Ok(())
        }
    }
}

fn resolve_path(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(RepowatchConfig::default_path)
}

fn run_init(args: InitArgs, config_path: Option<&Path>) -> Result<()> {
    let path = resolve_path(config_path);

    if path.exists() && !args.force {
        return Err(anyhow::anyhow!(
            "Config already exists at {:?}\n\nUse --force to overwrite",
            path
        ));
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .context(format!("Failed to create {}", parent.display()))?;
    }

    let content = RepowatchConfig::default()
        .to_toml_string()
        .context("Failed to render default config")?;
    std::fs::write(&path, content).context(format!("Failed to write config file: {:?}", path))?;

    println!("Created config at: {:?}", path);
    println!("\nNext steps:");
    println!("  1. Edit the config: $EDITOR {:?}", path);
    println!("  2. Point [collector] commands at your repositories root");
    println!("  3. Set CRONJOB_KEY and run: repowatch serve");

    Ok(())
}

fn run_show(config_path: Option<&Path>) -> Result<()> {
    let config = RepowatchConfig::load(config_path).context("Failed to load config")?;
    let rendered = config
        .redacted()
        .to_toml_string()
        .context("Failed to render config")?;
    print!("{}", rendered);
    Ok(())
}
