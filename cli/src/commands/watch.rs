// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Keep the configured target directory in sync with its bundles
//!
//! Wires the bundle watcher to the mount trigger: the watcher polls the
//! configured sources and the trigger mounts every change, retrying failures.
//! Runs until Ctrl-C, or for a single pass with `--once`.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use projector_core::application::{
    describe_metrics, MountService, MountTrigger, RetryPolicy, StandardMountService, TriggerReport,
};
use projector_core::domain::mounter_config::MounterConfigManifest;
use projector_core::infrastructure::bundle_source::PayloadEvent;
use projector_core::infrastructure::{BundleWatcher, FileBundleSource, PayloadSource};

#[derive(Args, Debug, Clone, Default)]
pub struct WatchArgs {
    /// Mount the current bundles once (with retries) and exit
    #[arg(long)]
    pub once: bool,
}

pub async fn handle_command(args: WatchArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = MounterConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;

    if let Some(metrics) = config.metrics().filter(|m| m.enabled) {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], metrics.port))
            .install()
            .context("Failed to install Prometheus exporter")?;
        describe_metrics();
        info!(port = metrics.port, "Serving Prometheus metrics");
    }

    let report = run(&config, args.once).await?;

    if report.dropped.is_empty() {
        println!(
            "{}",
            format!("✓ {} mounts, {} unchanged", report.mounted, report.unchanged).green()
        );
        Ok(())
    } else {
        anyhow::bail!("gave up on {} after repeated failures", report.dropped.join(", "))
    }
}

/// Run watcher and trigger for `config`. With `once`, a single poll is
/// mounted; otherwise polling continues until Ctrl-C.
pub async fn run(config: &MounterConfigManifest, once: bool) -> Result<TriggerReport> {
    let service: Arc<dyn MountService> = Arc::new(StandardMountService::from_config(config)?);
    let policy = RetryPolicy::from_config(&config.spec.queue)?;
    let trigger = MountTrigger::new(service, policy);

    let sources: Vec<Arc<dyn PayloadSource>> = config
        .spec
        .sources
        .iter()
        .map(|source| Arc::new(FileBundleSource::from_config(source)) as Arc<dyn PayloadSource>)
        .collect();
    if sources.is_empty() {
        warn!("No sources configured; the target directory will be emptied");
    }

    let key = config.metadata.name.clone();
    let watcher = BundleWatcher::new(key.clone(), sources, config.resync_interval());
    let (tx, rx) = mpsc::channel(16);
    let trigger_handle = tokio::spawn(trigger.run(rx));

    if once {
        let payload = watcher.poll().await.context("Failed to read bundles")?;
        tx.send(PayloadEvent { key, payload })
            .await
            .context("Mount trigger stopped unexpectedly")?;
        drop(tx);
    } else {
        info!(
            target_dir = %config.spec.target_dir.display(),
            "Watching bundles; press Ctrl-C to stop"
        );
        let cancel = CancellationToken::new();
        let watcher_handle = tokio::spawn(watcher.run(tx, cancel.clone()));

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        info!("Shutting down");
        cancel.cancel();
        watcher_handle.await.context("Bundle watcher panicked")??;
    }

    trigger_handle.await.context("Mount trigger panicked")
}
