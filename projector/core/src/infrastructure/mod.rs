// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod atomic_writer;
pub mod bundle_source;
pub mod hook;

pub use atomic_writer::AtomicWriter;
pub use bundle_source::{BundleWatcher, FileBundleSource, PayloadEvent, PayloadSource};
pub use hook::PostMountHook;
