// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Validate bundles without touching any target directory

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::{Path, PathBuf};

use projector_core::domain::bundle::{BundleManifest, ProjectionMode};
use projector_core::{Payload, PathSanitizer};

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    /// ConfigMap or Secret manifests to check
    #[arg(value_name = "BUNDLE", required = true)]
    pub bundles: Vec<PathBuf>,

    /// Check the pem projection instead of one file per key
    #[arg(long)]
    pub pem: bool,
}

pub async fn handle_command(args: ValidateArgs) -> Result<()> {
    let projection = if args.pem {
        ProjectionMode::Pem
    } else {
        ProjectionMode::Keys
    };

    let mut failures = 0;
    for path in &args.bundles {
        match check_bundle(path, projection) {
            Ok(payload) => {
                println!("{} {}", "✓".green(), path.display());
                for file in payload.keys() {
                    println!("    {}", file);
                }
            }
            Err(e) => {
                failures += 1;
                println!("{} {}: {:#}", "✗".red(), path.display(), e);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} bundles are invalid", failures, args.bundles.len());
    }

    println!("{}", "✓ All bundles are valid".green());
    Ok(())
}

/// Decode one bundle and return the cleaned payload it would project.
pub fn check_bundle(path: &Path, projection: ProjectionMode) -> Result<Payload> {
    let bundle = BundleManifest::from_yaml_file(path)?;
    let payload = bundle.to_payload(0, projection)?;
    Ok(PathSanitizer::new().validate_payload(&payload)?)
}
