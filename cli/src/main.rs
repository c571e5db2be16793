// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Projector CLI
//!
//! The `projector` binary keeps a directory in sync with ConfigMap and Secret
//! bundles kept on local disk.
//!
//! ## Commands
//!
//! - `projector mount --target DIR BUNDLE...` - One-shot projection
//! - `projector watch` - Poll the configured bundles and keep the target in sync
//! - `projector validate BUNDLE...` - Check bundles without touching disk
//! - `projector config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use projector_cli::commands::{self, ConfigCommand, MountArgs, ValidateArgs, WatchArgs};
use projector_core::domain::mounter_config::MounterConfigManifest;

/// Projector - atomic directory projection of secret and config bundles
#[derive(Parser)]
#[command(name = "projector")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "PROJECTOR_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level.
    #[arg(long, global = true, env = "PROJECTOR_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (text or json). Defaults to the configured format.
    #[arg(long, global = true, env = "PROJECTOR_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Project bundles into a directory once
    #[command(name = "mount")]
    Mount(MountArgs),

    /// Keep the configured target directory in sync with its bundles
    #[command(name = "watch")]
    Watch(WatchArgs),

    /// Decode bundles and validate their keys
    #[command(name = "validate")]
    Validate(ValidateArgs),

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (level, format) = resolve_logging(&cli);
    init_logging(&level, &format)?;

    match cli.command {
        Some(Commands::Mount(args)) => commands::mount::handle_command(args).await,
        Some(Commands::Watch(args)) => commands::watch::handle_command(args, cli.config).await,
        Some(Commands::Validate(args)) => commands::validate::handle_command(args).await,
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Flags win, then the `observability.logging` section of the configuration
fn resolve_logging(cli: &Cli) -> (String, String) {
    let configured = MounterConfigManifest::load_or_default(cli.config.clone())
        .ok()
        .and_then(|config| config.logging().cloned());

    let level = cli
        .log_level
        .clone()
        .or_else(|| configured.as_ref().map(|l| l.level.clone()))
        .unwrap_or_else(|| "info".to_string());
    let format = cli
        .log_format
        .clone()
        .or_else(|| configured.map(|l| l.format))
        .unwrap_or_else(|| "text".to_string());

    (level, format)
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    match format {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init(),
        "text" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .init(),
        other => anyhow::bail!("Invalid log format: '{}'. Must be 'text' or 'json'", other),
    }

    Ok(())
}
