// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Bundle Sources
//
// Where payloads come from. A `PayloadSource` yields the current payload of
// one bundle; `BundleWatcher` polls a set of sources, merges them into the
// payload for one target directory and emits a `PayloadEvent` whenever that
// merged payload changes.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::bundle::{BundleManifest, ProjectionMode};
use crate::domain::mounter_config::SourceConfig;
use crate::domain::projection::Payload;

/// The complete desired payload for the target identified by `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEvent {
    pub key: String,
    pub payload: Payload,
}

#[async_trait]
pub trait PayloadSource: Send + Sync {
    /// Label used in logs
    fn describe(&self) -> String;

    /// Current payload, or `None` if the source does not exist right now.
    async fn fetch(&self) -> Result<Option<Payload>>;
}

/// A ConfigMap or Secret manifest on local disk.
#[derive(Debug, Clone)]
pub struct FileBundleSource {
    path: PathBuf,
    mode: u32,
    projection: ProjectionMode,
}

impl FileBundleSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mode: 0,
            projection: ProjectionMode::Keys,
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_projection(mut self, projection: ProjectionMode) -> Self {
        self.projection = projection;
        self
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(config.path.clone())
            .with_mode(config.mode)
            .with_projection(config.projection)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PayloadSource for FileBundleSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn fetch(&self) -> Result<Option<Payload>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Bundle file not found");
                return Ok(None);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read bundle {:?}", self.path))
            }
        };

        let bundle = BundleManifest::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse bundle {:?}", self.path))?;
        let payload = bundle
            .to_payload(self.mode, self.projection)
            .with_context(|| format!("Failed to decode bundle {:?}", self.path))?;

        Ok(Some(payload))
    }
}

/// Polls sources and reports changes of their merged payload.
pub struct BundleWatcher {
    key: String,
    sources: Vec<Arc<dyn PayloadSource>>,
    interval: Duration,
}

impl BundleWatcher {
    pub fn new(key: impl Into<String>, sources: Vec<Arc<dyn PayloadSource>>, interval: Duration) -> Self {
        Self {
            key: key.into(),
            sources,
            interval,
        }
    }

    /// Fetch every source and merge the results. Later sources win when two
    /// produce the same key; missing sources contribute nothing.
    pub async fn poll(&self) -> Result<Payload> {
        let mut merged = Payload::new();

        for source in &self.sources {
            let Some(payload) = source.fetch().await? else {
                continue;
            };
            for (path, projection) in payload {
                if merged.insert(path.clone(), projection).is_some() {
                    warn!(
                        key = %self.key,
                        path = %path,
                        source = %source.describe(),
                        "Bundle key provided by more than one source; later source wins"
                    );
                }
            }
        }

        Ok(merged)
    }

    /// Poll until `cancel` fires or the receiver goes away. The first
    /// successful poll is always sent; after that only changes are. A failed
    /// poll is logged and skipped so a half-read source set never prunes files.
    pub async fn run(self, tx: mpsc::Sender<PayloadEvent>, cancel: CancellationToken) -> Result<()> {
        info!(
            key = %self.key,
            sources = self.sources.len(),
            interval_ms = self.interval.as_millis() as u64,
            "Bundle watcher started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_sent: Option<Payload> = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let payload = match self.poll().await {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(key = %self.key, "Failed to poll bundle sources: {:#}", e);
                    continue;
                }
            };

            if last_sent.as_ref() == Some(&payload) {
                continue;
            }

            debug!(key = %self.key, files = payload.len(), "Bundle payload changed");
            let event = PayloadEvent {
                key: self.key.clone(),
                payload: payload.clone(),
            };
            if tx.send(event).await.is_err() {
                debug!(key = %self.key, "Payload receiver closed");
                break;
            }
            last_sent = Some(payload);
        }

        info!(key = %self.key, "Bundle watcher stopped");
        Ok(())
    }
}
