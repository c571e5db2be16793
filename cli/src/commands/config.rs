// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use projector_core::domain::bundle::ProjectionMode;
use projector_core::domain::mounter_config::{
    HookConfig, LoggingConfig, MetricsConfig, MounterConfigManifest, ObservabilityConfig,
    SourceConfig,
};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the effective configuration as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./projector-config.yaml)
        #[arg(short, long, default_value = "./projector-config.yaml")]
        output: PathBuf,

        /// Include example sources, hook and observability settings
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool, as_yaml: bool) -> Result<()> {
    let config = MounterConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. PROJECTOR_CONFIG_PATH: {}",
            std::env::var("PROJECTOR_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./projector-config.yaml");
        println!("  4. ~/.projector/config.yaml");
        println!("  5. /etc/projector/config.yaml");
        println!();
    }

    if as_yaml {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Mounter:".bold());
    println!("  Name: {}", config.metadata.name);
    println!("  Target: {}", config.spec.target_dir.display());
    println!("  Permission policy: {:?}", config.spec.permission_policy);
    println!("  Resync interval: {}s", config.spec.resync_interval_secs);
    println!();

    println!("{}", "Sources:".bold());
    if config.spec.sources.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for source in &config.spec.sources {
        let mode = if source.mode == 0 {
            "default".to_string()
        } else {
            format!("{:04o}", source.mode)
        };
        println!(
            "  {} (mode {}, {:?})",
            source.path.display().to_string().bold(),
            mode,
            source.projection
        );
    }
    println!();

    println!("{}", "Post-mount hook:".bold());
    match &config.spec.hook {
        Some(hook) => println!("  {} (timeout {}s)", hook.command, hook.timeout_secs),
        None => println!("  {}", "(none)".dimmed()),
    }
    println!();

    let queue = &config.spec.queue;
    println!("{}", "Retry queue:".bold());
    println!("  Max retries: {}", queue.max_retries);
    println!(
        "  Backoff: {}ms doubling, capped at {}s",
        queue.base_delay_ms, queue.max_delay_secs
    );
    println!("  Rate: {}/s, burst {}", queue.rate_per_second, queue.burst);
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = MounterConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    for source in &config.spec.sources {
        if !source.path.exists() {
            println!(
                "{}",
                format!("! Source {} does not exist yet", source.path.display()).yellow()
            );
        }
    }

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = sample_config(with_examples);
    sample
        .to_yaml_file(&output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

/// Default manifest, optionally filled with a representative setup.
pub fn sample_config(with_examples: bool) -> MounterConfigManifest {
    let mut config = MounterConfigManifest::default();
    if !with_examples {
        return config;
    }

    config.metadata.name = "web-certs".to_string();
    config.spec.target_dir = PathBuf::from("/etc/ssl/private/web");
    config.spec.sources = vec![
        SourceConfig {
            path: PathBuf::from("/run/bundles/web-tls.yaml"),
            mode: 0o600,
            projection: ProjectionMode::Pem,
        },
        SourceConfig {
            path: PathBuf::from("/run/bundles/app-config.yaml"),
            mode: 0o644,
            projection: ProjectionMode::Keys,
        },
    ];
    config.spec.hook = Some(HookConfig {
        command: "nginx -s reload".to_string(),
        timeout_secs: 60,
    });
    config.spec.observability = Some(ObservabilityConfig {
        logging: Some(LoggingConfig {
            level: "info".to_string(),
            format: "text".to_string(),
        }),
        metrics: Some(MetricsConfig {
            enabled: false,
            port: 9090,
        }),
    });
    config
}
