// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! One-shot projection of bundles into a target directory

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use projector_core::application::{MountOutcome, MountService, StandardMountService};
use projector_core::domain::bundle::ProjectionMode;
use projector_core::infrastructure::{AtomicWriter, BundleWatcher, FileBundleSource, PayloadSource, PostMountHook};
use projector_core::PermissionPolicy;

#[derive(Args, Debug, Clone)]
pub struct MountArgs {
    /// Directory to project into (must exist)
    #[arg(short, long, value_name = "DIR")]
    pub target: PathBuf,

    /// ConfigMap or Secret manifests; later bundles win on key clashes
    #[arg(value_name = "BUNDLE", required = true)]
    pub bundles: Vec<PathBuf>,

    /// Shell command to run if the directory changed
    #[arg(long, value_name = "CMD")]
    pub hook: Option<String>,

    /// File mode in octal (default 0777)
    #[arg(long, value_name = "OCTAL", value_parser = super::parse_mode)]
    pub mode: Option<u32>,

    /// Project each Secret as a single <name>.pem (certificate, then key)
    #[arg(long)]
    pub pem: bool,

    /// What to do when setting a file mode fails (strict or lenient)
    #[arg(long, default_value = "strict")]
    pub permission_policy: PermissionPolicy,
}

pub async fn handle_command(args: MountArgs) -> Result<()> {
    let target = args.target.clone();
    let outcome = run(args).await?;

    if outcome.changed {
        println!("{}", format!("✓ {} updated", target.display()).green());
    } else {
        println!("{}", format!("✓ {} already up to date", target.display()).dimmed());
    }
    if outcome.hook_ran {
        println!("  Post-mount hook ran");
    }

    Ok(())
}

/// Merge the bundles and project them into the target directory.
pub async fn run(args: MountArgs) -> Result<MountOutcome> {
    let projection = if args.pem {
        ProjectionMode::Pem
    } else {
        ProjectionMode::Keys
    };

    let sources: Vec<Arc<dyn PayloadSource>> = args
        .bundles
        .iter()
        .map(|path| {
            let source = FileBundleSource::new(path.clone())
                .with_mode(args.mode.unwrap_or(0))
                .with_projection(projection);
            Arc::new(source) as Arc<dyn PayloadSource>
        })
        .collect();

    for bundle in &args.bundles {
        if !bundle.exists() {
            anyhow::bail!("Bundle not found: {}", bundle.display());
        }
    }

    let key = args.target.display().to_string();
    let payload = BundleWatcher::new(key.clone(), sources, Duration::ZERO)
        .poll()
        .await
        .context("Failed to read bundles")?;

    let writer = AtomicWriter::new(&args.target)
        .with_context(|| format!("Invalid target directory {}", args.target.display()))?
        .with_permission_policy(args.permission_policy);

    let mut service = StandardMountService::new(writer);
    if let Some(command) = args.hook {
        service = service.with_hook(PostMountHook::new(command));
    }

    service.mount(&key, payload).await
}
