//! Path validation and security utilities.
//!
//! This module provides functions to validate storage paths and entity
//! identifiers, preventing security issues like path traversal attacks.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Longest identifier accepted as a single path component.
pub const MAX_IDENTIFIER_LENGTH: usize = 128;
/// Markers used by in-flight and set-aside extraction directories.
pub(crate) const TEMP_MARKER: &str = ".tmp-";
pub(crate) const ASIDE_MARKER: &str = ".old-";

/// Validates a path relative to the storage root for security and correctness.
/// Ensures that paths don't escape the storage root (no `..` traversal).
///
/// > **Note:** This does **not** normalize backslashes, non-UTF8 bytes, or
/// >           platform-specific weirdness. Null bytes are explicitly rejected.
///
/// # Returns
/// Returns the normalized path if valid, or [`InvalidPath`](crate::error::ErrorKind::InvalidPath)
/// if invalid.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use shelf_storage::validate_path;
/// // Valid paths
/// assert!(validate_path("workspaces/w1/manifest.json").is_ok());
/// assert!(validate_path("shards/00001.md").is_ok());
/// assert!(validate_path("a/../output.md").is_ok()); // (never leaves the root)
/// // Invalid paths
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a/../../b").is_err()); // (leaves the root)
/// assert!(validate_path("a\0b").is_err());
/// // Paths get resolved
/// assert_eq!(
///     validate_path("wrong/../still-wrong/.././correct//./output.md/").unwrap(),
///     Path::new("correct/output.md")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let mut components = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls; reject them explicitly.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
        false => Ok(components.into_iter().collect()),
    }
}

/// Validates an entity identifier (workspace, library, file or extraction
/// method id) that will be used verbatim as one directory name.
///
/// Allowed: ASCII letters, digits, `-`, `_` and `.`, not starting with a dot,
/// at most [`MAX_IDENTIFIER_LENGTH`] bytes. Anything that could climb out of
/// the parent directory is a [`PathTraversal`](ErrorKind::PathTraversal); any
/// other violation is an [`InvalidPath`](ErrorKind::InvalidPath).
///
/// ```
/// use shelf_storage::validate_identifier;
/// assert!(validate_identifier("docling-markdown_v2").is_ok());
/// assert!(validate_identifier("../w2").is_err());
/// assert!(validate_identifier("has space").is_err());
/// ```
pub fn validate_identifier(id: &str) -> Result<&str> {
    if id.contains(['/', '\\']) || id.contains("..") {
        exn::bail!(ErrorKind::PathTraversal(id.to_string()));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.');
    if id.is_empty()
        || id.len() > MAX_IDENTIFIER_LENGTH
        || id.starts_with('.')
        || !id.chars().all(allowed)
        // Would be mistaken for an in-flight or set-aside extraction.
        || id.contains(TEMP_MARKER)
        || id.contains(ASIDE_MARKER)
    {
        exn::bail!(ErrorKind::InvalidPath(PathBuf::from(id)));
    }
    Ok(id)
}

/// `true` for directory names produced by an extraction write that has not
/// (or not yet) become the live extraction.
pub(crate) fn is_transient(name: &str) -> bool {
    name.contains(TEMP_MARKER) || name.contains(ASIDE_MARKER)
}
