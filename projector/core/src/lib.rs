// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `projector-core`: Atomic Directory Projection
//!
//! Makes a target directory on disk reflect exactly a named set of in-memory
//! byte blobs (a **payload**), writing only when something changed and
//! refusing any key that could escape the directory.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `FileProjection`, `Payload`, `PathSanitizer`, bundles, config |
//! | [`application`] | Application | `MountService`, `MountTrigger` |
//! | [`infrastructure`] | Infrastructure | `AtomicWriter`, `PostMountHook`, `BundleWatcher` |
//!
//! The writer is synchronous and holds no state besides the target path; the
//! directory tree itself is the only persistent state.

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
