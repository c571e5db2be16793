// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Atomic Writer
//!
//! Projects a [`Payload`] into a target directory: writes new and changed
//! files, fixes their permission bits and prunes every path the payload no
//! longer implies.
//!
//! Notes:
//!
//! 1. Relative paths whose first segment starts with `..` are reserved. The
//!    sanitizer rejects them as keys and the pruning walk never touches them.
//! 2. The writer does no locking. [`AtomicWriter::write`] takes `&mut self`,
//!    and callers sharing a writer across tasks must serialize access (see
//!    [`crate::application::mount_service`]).
//! 3. "Atomic" means convergent: a failed call leaves whatever it managed to
//!    apply in place and the next successful call finishes the job. Each
//!    individual file is replaced by rename, so readers never see a partially
//!    written file.

use std::collections::BTreeSet;
use std::fs::{DirBuilder, File, Permissions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tracing::{debug, error, trace};
use walkdir::WalkDir;

use crate::domain::path_sanitizer::PathSanitizer;
use crate::domain::projection::{
    FileProjection, Payload, PermissionPolicy, ProjectionError, DEFAULT_DIR_MODE,
};

const TEMP_FILE_PREFIX: &str = ".projector-";

/// Applies permission bits to a freshly written file.
pub type SetMode = fn(&File, u32) -> std::io::Result<()>;

fn set_file_mode(file: &File, mode: u32) -> std::io::Result<()> {
    file.set_permissions(Permissions::from_mode(mode))
}

/// Projects payloads into a single target directory.
pub struct AtomicWriter {
    target_dir: PathBuf,
    sanitizer: PathSanitizer,
    permission_policy: PermissionPolicy,
    set_mode: SetMode,
}

impl std::fmt::Debug for AtomicWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicWriter")
            .field("target_dir", &self.target_dir)
            .field("permission_policy", &self.permission_policy)
            .finish_non_exhaustive()
    }
}

impl AtomicWriter {
    /// Create a writer for `target_dir`, which must already exist.
    pub fn new(target_dir: impl Into<PathBuf>) -> Result<Self, ProjectionError> {
        let target_dir = target_dir.into();

        match std::fs::metadata(&target_dir) {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => return Err(ProjectionError::NotADirectory(target_dir)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ProjectionError::TargetMissing(target_dir))
            }
            Err(e) => return Err(ProjectionError::io("stat", target_dir, e)),
        }

        Ok(Self {
            target_dir,
            sanitizer: PathSanitizer::new(),
            permission_policy: PermissionPolicy::default(),
            set_mode: set_file_mode,
        })
    }

    pub fn with_permission_policy(mut self, policy: PermissionPolicy) -> Self {
        self.permission_policy = policy;
        self
    }

    /// Replace the chmod step, e.g. with one that fails.
    pub fn with_set_mode(mut self, set_mode: SetMode) -> Self {
        self.set_mode = set_mode;
        self
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    /// Make the target directory reflect `payload` exactly.
    ///
    /// Returns `Ok(true)` if any file was written or any path removed, and
    /// `Ok(false)` if the directory already matched. A validation error is
    /// returned before the directory is touched.
    pub fn write(&mut self, payload: &Payload) -> Result<bool, ProjectionError> {
        let clean_payload = self.sanitizer.validate_payload(payload).map_err(|e| {
            error!(target_dir = %self.target_dir.display(), "invalid payload: {}", e);
            ProjectionError::from(e)
        })?;

        let paths_to_remove = self.paths_to_remove(&clean_payload).map_err(|e| {
            error!("error determining user-visible files to remove: {}", e);
            e
        })?;

        let should_write = self.should_write_payload(&clean_payload).map_err(|e| {
            error!("error determining whether payload should be written to disk: {}", e);
            e
        })?;

        if !should_write && paths_to_remove.is_empty() {
            debug!(target_dir = %self.target_dir.display(), "no update required for target directory");
            return Ok(false);
        }

        if should_write {
            debug!(target_dir = %self.target_dir.display(), "write required for target directory");
            let written = self.write_payload_to_dir(&clean_payload)?;
            debug!(
                target_dir = %self.target_dir.display(),
                files = written,
                "performed write of new data"
            );
        }

        self.remove_user_visible_paths(&paths_to_remove)?;

        Ok(true)
    }

    /// Reconstruct a payload from the regular files currently on disk.
    pub fn observe(&self) -> Result<Payload, ProjectionError> {
        let mut observed = Payload::new();

        for relative in self.walk()? {
            let full_path = self.target_dir.join(&relative);
            let metadata = std::fs::symlink_metadata(&full_path)
                .map_err(|e| ProjectionError::io("stat", &full_path, e))?;
            if !metadata.file_type().is_file() {
                continue;
            }

            let data = std::fs::read(&full_path)
                .map_err(|e| ProjectionError::io("read", &full_path, e))?;
            let mode = metadata.permissions().mode() & 0o7777;
            observed.insert(
                relative.to_string_lossy().into_owned(),
                FileProjection { data, mode },
            );
        }

        Ok(observed)
    }

    /// Whether any entry of the payload differs from what is on disk.
    /// Stops at the first difference.
    fn should_write_payload(&self, payload: &Payload) -> Result<bool, ProjectionError> {
        for (user_visible_path, projection) in payload {
            let full_path = self.target_dir.join(user_visible_path);
            if Self::should_write_file(&full_path, projection)? {
                trace!(path = %user_visible_path, "payload entry differs from disk");
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn should_write_file(path: &Path, projection: &FileProjection) -> Result<bool, ProjectionError> {
        let metadata = match std::fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if is_absent(&e) => return Ok(true),
            Err(e) => return Err(ProjectionError::io("stat", path, e)),
        };

        // A symlink or directory squatting on the path has to be replaced.
        if !metadata.file_type().is_file() {
            return Ok(true);
        }

        if metadata.permissions().mode() & 0o7777 != projection.effective_mode() {
            return Ok(true);
        }

        let content_on_fs =
            std::fs::read(path).map_err(|e| ProjectionError::io("read", path, e))?;

        Ok(content_on_fs != projection.data)
    }

    /// Write every entry that differs from disk; returns how many were written.
    fn write_payload_to_dir(&self, payload: &Payload) -> Result<usize, ProjectionError> {
        let mut written = 0;
        for (user_visible_path, projection) in payload {
            let relative = Path::new(user_visible_path);
            if !Self::should_write_file(&self.target_dir.join(relative), projection)? {
                continue;
            }
            self.write_file(relative, projection)?;
            written += 1;
        }

        Ok(written)
    }

    fn write_file(&self, relative: &Path, projection: &FileProjection) -> Result<(), ProjectionError> {
        let full_path = &self.target_dir.join(relative);
        let mode = projection.effective_mode();
        let base_dir = full_path.parent().unwrap_or(&self.target_dir);

        self.clear_non_directory_ancestors(relative)?;
        DirBuilder::new()
            .recursive(true)
            .mode(DEFAULT_DIR_MODE)
            .create(base_dir)
            .map_err(|e| {
                error!("unable to create directory {}: {}", base_dir.display(), e);
                ProjectionError::io("create directory", base_dir, e)
            })?;

        let mut staged = tempfile::Builder::new()
            .prefix(TEMP_FILE_PREFIX)
            .tempfile_in(base_dir)
            .map_err(|e| ProjectionError::io("create temporary file in", base_dir, e))?;

        staged.write_all(&projection.data).map_err(|e| {
            error!("unable to write file {} with mode {:o}: {}", full_path.display(), mode, e);
            ProjectionError::io("write", full_path, e)
        })?;

        // The file was created with a umask-narrowed mode; set the requested
        // bits explicitly.
        if let Err(e) = (self.set_mode)(staged.as_file(), mode) {
            match self.permission_policy {
                PermissionPolicy::Strict => {
                    return Err(ProjectionError::Permission {
                        path: full_path.to_path_buf(),
                        mode,
                        source: e,
                    })
                }
                PermissionPolicy::Lenient => {
                    error!("unable to set mode {:o} on {}: {}", mode, full_path.display(), e);
                }
            }
        }

        // Whatever a directory here holds is stale: the payload wants a file.
        if let Ok(metadata) = std::fs::symlink_metadata(full_path) {
            if metadata.is_dir() {
                debug!(path = %relative.display(), "replacing directory with file");
                std::fs::remove_dir_all(full_path)
                    .map_err(|e| ProjectionError::io("remove", full_path, e))?;
            }
        }

        staged
            .persist(full_path)
            .map_err(|e| ProjectionError::io("rename into place", full_path, e.error))?;

        Ok(())
    }

    /// Remove files and symlinks standing where a parent directory of
    /// `relative` has to be, so directory creation never follows a link out
    /// of the target.
    fn clear_non_directory_ancestors(&self, relative: &Path) -> Result<(), ProjectionError> {
        let Some(parent) = relative.parent() else {
            return Ok(());
        };

        let mut current = self.target_dir.clone();
        for component in parent.components() {
            current.push(component);
            match std::fs::symlink_metadata(&current) {
                Ok(metadata) if metadata.is_dir() => {}
                Ok(_) => {
                    debug!(path = %current.display(), "replacing non-directory with directory");
                    std::fs::remove_file(&current)
                        .map_err(|e| ProjectionError::io("remove", &current, e))?;
                    break;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => break,
                Err(e) => return Err(ProjectionError::io("stat", &current, e)),
            }
        }

        Ok(())
    }

    /// Paths under the target directory that the payload no longer implies.
    ///
    /// Every ancestor directory of a payload entry is kept, so a directory
    /// that still holds current files is never scheduled for removal.
    fn paths_to_remove(&self, payload: &Payload) -> Result<BTreeSet<PathBuf>, ProjectionError> {
        let paths = self.walk()?;
        trace!(target_dir = %self.target_dir.display(), "current paths:   {:?}", paths);

        let mut new_paths: BTreeSet<PathBuf> = BTreeSet::new();
        for file in payload.keys() {
            for sub_path in Path::new(file).ancestors() {
                if sub_path.as_os_str().is_empty() {
                    break;
                }
                new_paths.insert(sub_path.to_path_buf());
            }
        }
        trace!(target_dir = %self.target_dir.display(), "new paths:       {:?}", new_paths);

        let result: BTreeSet<PathBuf> = paths.difference(&new_paths).cloned().collect();
        trace!(target_dir = %self.target_dir.display(), "paths to remove: {:?}", result);

        Ok(result)
    }

    /// Every path below the target directory, relative to it, excluding the
    /// reserved `..`-prefixed names.
    fn walk(&self) -> Result<BTreeSet<PathBuf>, ProjectionError> {
        let mut paths = BTreeSet::new();

        for entry in WalkDir::new(&self.target_dir).min_depth(1).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                // Vanished between readdir and stat
                Err(e) if e.io_error().map(|io| io.kind()) == Some(ErrorKind::NotFound) => continue,
                Err(e) => {
                    let path = e
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.target_dir.clone());
                    return Err(ProjectionError::io("walk", path, e.into()));
                }
            };

            let Ok(relative) = entry.path().strip_prefix(&self.target_dir) else {
                continue;
            };
            if relative.to_string_lossy().starts_with("..") {
                continue;
            }

            paths.insert(relative.to_path_buf());
        }

        Ok(paths)
    }

    /// Remove stale paths deepest-first, so each directory is empty by the
    /// time its turn comes.
    fn remove_user_visible_paths(&self, paths: &BTreeSet<PathBuf>) -> Result<(), ProjectionError> {
        for relative in paths.iter().rev() {
            let full_path = self.target_dir.join(relative);

            let metadata = match std::fs::symlink_metadata(&full_path) {
                Ok(metadata) => metadata,
                // Already gone along with a replaced parent
                Err(e) if is_absent(&e) => continue,
                Err(e) => return Err(ProjectionError::io("stat", &full_path, e)),
            };

            let removed = if metadata.is_dir() {
                std::fs::remove_dir(&full_path)
            } else {
                std::fs::remove_file(&full_path)
            };

            removed.map_err(|e| {
                error!("error pruning old user-visible path {}: {}", relative.display(), e);
                ProjectionError::io("remove", &full_path, e)
            })?;
            trace!(path = %relative.display(), "pruned stale path");
        }

        Ok(())
    }
}

/// Nothing at the path, either because it is missing or because one of its
/// parents is not a directory.
fn is_absent(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory)
}
