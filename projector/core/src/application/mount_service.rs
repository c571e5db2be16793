// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Mount Application Service
//!
//! Owns the writer for one target directory and coordinates:
//! - Infrastructure layer: `AtomicWriter` (run on the blocking pool)
//! - Post-mount hook, run after every mount that changed the directory
//! - Mount counters
//!
//! The writer sits behind a mutex, so concurrent `mount` calls on the same
//! service are serialized instead of interleaving on disk.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::domain::mounter_config::MounterConfigManifest;
use crate::domain::projection::Payload;
use crate::infrastructure::atomic_writer::AtomicWriter;
use crate::infrastructure::hook::PostMountHook;

pub const MOUNTS_TOTAL: &str = "projector_mounts_total";

/// Result of one successful mount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountOutcome {
    /// Whether any file was written or removed
    pub changed: bool,
    /// Whether the post-mount hook ran (and succeeded)
    pub hook_ran: bool,
}

// ============================================================================
// Service Trait
// ============================================================================

#[async_trait]
pub trait MountService: Send + Sync {
    /// Project `payload` into the target directory. `key` names the payload
    /// in logs.
    async fn mount(&self, key: &str, payload: Payload) -> Result<MountOutcome>;
}

// ============================================================================
// Standard Implementation
// ============================================================================

pub struct StandardMountService {
    writer: Arc<Mutex<AtomicWriter>>,
    target_dir: PathBuf,
    hook: Option<PostMountHook>,
    // Set when the directory changed but the hook failed, so that a retry
    // which finds nothing to write still runs the hook.
    hook_pending: AtomicBool,
}

impl StandardMountService {
    pub fn new(writer: AtomicWriter) -> Self {
        let target_dir = writer.target_dir().to_path_buf();
        Self {
            writer: Arc::new(Mutex::new(writer)),
            target_dir,
            hook: None,
            hook_pending: AtomicBool::new(false),
        }
    }

    pub fn with_hook(mut self, hook: PostMountHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Build the service described by a mounter configuration.
    pub fn from_config(config: &MounterConfigManifest) -> Result<Self> {
        let writer = AtomicWriter::new(&config.spec.target_dir)
            .with_context(|| format!("Invalid target directory {:?}", config.spec.target_dir))?
            .with_permission_policy(config.spec.permission_policy);

        let mut service = Self::new(writer);
        if let Some(hook) = &config.spec.hook {
            service = service.with_hook(PostMountHook::from_config(hook));
        }
        Ok(service)
    }

    pub fn target_dir(&self) -> &PathBuf {
        &self.target_dir
    }
}

#[async_trait]
impl MountService for StandardMountService {
    async fn mount(&self, key: &str, payload: Payload) -> Result<MountOutcome> {
        debug!(key = %key, files = payload.len(), target_dir = %self.target_dir.display(), "Mounting payload");

        let writer = self.writer.clone();
        let changed = tokio::task::spawn_blocking(move || writer.lock().write(&payload))
            .await
            .context("Projection task failed")?
            .with_context(|| {
                format!("Failed to project {} into {}", key, self.target_dir.display())
            })?;

        if changed {
            metrics::counter!(MOUNTS_TOTAL).increment(1);
            info!(key = %key, target_dir = %self.target_dir.display(), "Target directory updated");
        } else {
            debug!(key = %key, "Target directory already up to date");
        }

        let Some(hook) = &self.hook else {
            return Ok(MountOutcome {
                changed,
                hook_ran: false,
            });
        };

        let retrying_hook = self.hook_pending.load(Ordering::Acquire);
        if !changed && !retrying_hook {
            return Ok(MountOutcome {
                changed,
                hook_ran: false,
            });
        }

        if retrying_hook && !changed {
            warn!(key = %key, command = %hook.command(), "Retrying post-mount hook from a previous mount");
        }

        self.hook_pending.store(true, Ordering::Release);
        hook.run()
            .await
            .with_context(|| format!("Post-mount hook failed after mounting {}", key))?;
        self.hook_pending.store(false, Ordering::Release);

        Ok(MountOutcome {
            changed,
            hook_ran: true,
        })
    }
}
