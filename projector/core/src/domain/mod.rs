// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: payload model, path rules, bundle manifests and configuration.

pub mod projection;
pub mod path_sanitizer;
pub mod bundle;
pub mod mounter_config;

pub use projection::{FileProjection, Payload, PermissionPolicy, ProjectionError};
pub use path_sanitizer::{PathError, PathSanitizer};
