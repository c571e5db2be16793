// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Payload Model
//!
//! A [`Payload`] is the complete desired file set for one write: relative
//! `/`-separated paths mapped to a [`FileProjection`] (content plus POSIX
//! permission bits). There is no patch API; every call carries everything.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use super::path_sanitizer::PathError;

/// Mode substituted when a projection leaves its mode unset.
pub const DEFAULT_FILE_MODE: u32 = 0o777;

/// Mode requested for implicitly created directories (narrowed by umask).
pub const DEFAULT_DIR_MODE: u32 = 0o777;

const PERMISSION_BITS: u32 = 0o7777;

/// Desired content and permission bits of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileProjection {
    pub data: Vec<u8>,
    /// POSIX permission bits; no permission bits set means "use
    /// [`DEFAULT_FILE_MODE`]".
    #[serde(default)]
    pub mode: u32,
}

impl FileProjection {
    pub fn new(data: impl Into<Vec<u8>>, mode: u32) -> Self {
        Self {
            data: data.into(),
            mode,
        }
    }

    /// The mode the writer will actually apply.
    pub fn effective_mode(&self) -> u32 {
        match self.mode & PERMISSION_BITS {
            0 => DEFAULT_FILE_MODE,
            bits => bits,
        }
    }
}

/// Relative path -> projection. Ordered so that logs and walks are stable.
pub type Payload = BTreeMap<String, FileProjection>;

/// What to do when the explicit chmod after a successful content write fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionPolicy {
    /// Fail the write with [`ProjectionError::Permission`].
    #[default]
    Strict,
    /// Log the failure and report success; the file keeps whatever mode it got.
    Lenient,
}

impl FromStr for PermissionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "lenient" => Ok(Self::Lenient),
            other => Err(format!(
                "unknown permission policy '{}', expected 'strict' or 'lenient'",
                other
            )),
        }
    }
}

/// Errors returned by the projection writer
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// A payload key broke a path-safety rule. Raised before any I/O.
    #[error("invalid payload: {0}")]
    Validation(#[from] PathError),

    #[error("target directory does not exist: {}", .0.display())]
    TargetMissing(PathBuf),

    #[error("target is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// A filesystem call failed mid-write. Earlier mutations are not rolled back.
    #[error("failed to {op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to set mode {mode:o} on {}: {source}", path.display())]
    Permission {
        path: PathBuf,
        mode: u32,
        #[source]
        source: std::io::Error,
    },
}

impl ProjectionError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ProjectionError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// Whether the error happened before the target directory was touched.
    pub fn is_validation(&self) -> bool {
        matches!(self, ProjectionError::Validation(_))
    }
}
