// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Path Sanitizer Domain Service
//!
//! Decides whether a payload key is safe to materialize under the target
//! directory, and lexically cleans the keys that are.
//!
//! A key may not:
//!
//! 1. be empty
//! 2. be absolute
//! 3. be longer than 4096 bytes
//! 4. contain `..` as a segment
//! 5. contain a segment longer than 255 bytes
//! 6. start with a first segment that begins with `..` and is longer than two
//!    bytes (`..data`, `..sneaky.txt`); those names are reserved for the writer
//!
//! Ordinary dotfiles (`.dotfile`, `.binary.bin`) are allowed.
//!
//! A payload is additionally rejected if two keys clean to the same path, if
//! a key cleans to the target directory itself, or if one key is a parent
//! directory of another.

use std::collections::BTreeMap;
use thiserror::Error;

use super::projection::Payload;

pub const MAX_PATH_LENGTH: usize = 4096;
pub const MAX_FILE_NAME_LENGTH: usize = 255;

const SEPARATOR: char = '/';

/// Path validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("invalid path: must not be empty: {0:?}")]
    Empty(String),

    #[error("invalid path: must be relative path: {0}")]
    Absolute(String),

    #[error("invalid path: must be less than {limit} characters")]
    TooLong { path: String, limit: usize },

    #[error("invalid path: must not contain '..': {0}")]
    ParentReference(String),

    #[error("invalid path: filenames must be less than {limit} characters")]
    NameTooLong { path: String, limit: usize },

    #[error("invalid path: must not start with '..': {0}")]
    ReservedPrefix(String),

    #[error("invalid path: {0:?} refers to the target directory itself")]
    RefersToRoot(String),

    #[error("{file:?} would have to be both a file and the directory holding {nested:?}")]
    FileIsParent { file: String, nested: String },

    #[error("{first:?} and {second:?} both resolve to {cleaned:?}")]
    Collision {
        first: String,
        second: String,
        cleaned: String,
    },
}

/// Path sanitizer domain service
#[derive(Debug, Clone)]
pub struct PathSanitizer {
    max_path_len: usize,
    max_name_len: usize,
}

impl PathSanitizer {
    pub fn new() -> Self {
        Self {
            max_path_len: MAX_PATH_LENGTH,
            max_name_len: MAX_FILE_NAME_LENGTH,
        }
    }

    /// Create a sanitizer with custom limits
    pub fn with_limits(max_path_len: usize, max_name_len: usize) -> Self {
        Self {
            max_path_len,
            max_name_len,
        }
    }

    /// Validate a single payload key, stopping at the first broken rule.
    pub fn validate(&self, path: &str) -> Result<(), PathError> {
        if path.is_empty() {
            return Err(PathError::Empty(path.to_string()));
        }
        if path.starts_with(SEPARATOR) {
            return Err(PathError::Absolute(path.to_string()));
        }
        if path.len() > self.max_path_len {
            return Err(PathError::TooLong {
                path: path.to_string(),
                limit: self.max_path_len,
            });
        }

        for segment in path.split(SEPARATOR) {
            if segment == ".." {
                tracing::warn!(path = %path, "Rejected payload key containing '..' segment");
                return Err(PathError::ParentReference(path.to_string()));
            }
            if segment.len() > self.max_name_len {
                return Err(PathError::NameTooLong {
                    path: path.to_string(),
                    limit: self.max_name_len,
                });
            }
        }

        if has_reserved_prefix(path) {
            return Err(PathError::ReservedPrefix(path.to_string()));
        }

        Ok(())
    }

    /// Lexically clean a `/`-separated path.
    ///
    /// Drops `.` segments, collapses repeated separators, drops a trailing
    /// separator and resolves `..` against preceding segments. An empty
    /// result is returned as `"."`.
    pub fn clean(path: &str) -> String {
        let rooted = path.starts_with(SEPARATOR);
        let mut out: Vec<&str> = Vec::new();

        for segment in path.split(SEPARATOR) {
            match segment {
                "" | "." => {}
                ".." => match out.last() {
                    Some(&last) if last != ".." => {
                        out.pop();
                    }
                    _ if rooted => {}
                    _ => out.push(".."),
                },
                other => out.push(other),
            }
        }

        let joined = out.join("/");
        match (rooted, joined.is_empty()) {
            (true, _) => format!("/{}", joined),
            (false, true) => ".".to_string(),
            (false, false) => joined,
        }
    }

    /// Validate every key of `payload` and return a copy keyed by cleaned paths.
    ///
    /// Nothing is accepted partially: the first invalid key fails the whole
    /// payload.
    pub fn validate_payload(&self, payload: &Payload) -> Result<Payload, PathError> {
        let mut clean_payload: Payload = BTreeMap::new();
        let mut origin: BTreeMap<String, &str> = BTreeMap::new();

        for (key, projection) in payload {
            self.validate(key)?;

            let cleaned = Self::clean(key);
            if cleaned == "." {
                return Err(PathError::RefersToRoot(key.clone()));
            }
            // `./..name` only reveals its reserved first segment once cleaned
            if has_reserved_prefix(&cleaned) {
                return Err(PathError::ReservedPrefix(key.clone()));
            }
            if let Some(first) = origin.get(&cleaned) {
                return Err(PathError::Collision {
                    first: first.to_string(),
                    second: key.clone(),
                    cleaned,
                });
            }

            origin.insert(cleaned.clone(), key.as_str());
            clean_payload.insert(cleaned, projection.clone());
        }

        for nested in clean_payload.keys() {
            for (idx, _) in nested.match_indices(SEPARATOR) {
                let parent = &nested[..idx];
                if clean_payload.contains_key(parent) {
                    return Err(PathError::FileIsParent {
                        file: parent.to_string(),
                        nested: nested.clone(),
                    });
                }
            }
        }

        Ok(clean_payload)
    }
}

impl Default for PathSanitizer {
    fn default() -> Self {
        Self::new()
    }
}

/// First segment starts with `..` but is not `..` itself.
fn has_reserved_prefix(path: &str) -> bool {
    // split always yields at least one item
    let first = path.split(SEPARATOR).next().unwrap_or_default();
    first.starts_with("..") && first.len() > 2
}
