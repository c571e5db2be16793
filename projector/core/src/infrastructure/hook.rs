// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Post-mount hook: a shell command run after the target directory changed,
//! typically to make a server reload the files it reads from there.

use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::domain::mounter_config::HookConfig;

pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct PostMountHook {
    command: String,
    timeout: Duration,
}

impl PostMountHook {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: DEFAULT_HOOK_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_config(config: &HookConfig) -> Self {
        Self::new(config.command.clone()).with_timeout(config.timeout())
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Run `sh -c <command>` and return its output, stdout followed by
    /// stderr. A non-zero exit or a timeout is an error; a timed out child is
    /// killed.
    pub async fn run(&self) -> Result<String> {
        debug!(command = %self.command, timeout_secs = self.timeout.as_secs(), "Running post-mount hook");
        let start = Instant::now();

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .with_context(|| format!("Failed to spawn post-mount hook '{}'", self.command))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result
                .with_context(|| format!("Failed to wait for post-mount hook '{}'", self.command))?,
            Err(_) => {
                warn!(command = %self.command, "Post-mount hook timed out");
                anyhow::bail!(
                    "post-mount hook '{}' timed out after {}s",
                    self.command,
                    self.timeout.as_secs()
                );
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            warn!(command = %self.command, status = %output.status, output = %combined.trim_end(), "Post-mount hook failed");
            anyhow::bail!(
                "post-mount hook '{}' exited with {}: {}",
                self.command,
                output.status,
                combined.trim_end()
            );
        }

        info!(
            command = %self.command,
            elapsed_ms = start.elapsed().as_millis() as u64,
            output = %combined.trim_end(),
            "Post-mount hook completed"
        );
        Ok(combined)
    }
}
