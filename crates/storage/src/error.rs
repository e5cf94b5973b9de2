//! Storage Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! Callers translate [`NotFound`](ErrorKind::NotFound) into "404" responses and
//! [`CorruptManifest`](ErrorKind::CorruptManifest) or [`Stream`](ErrorKind::Stream)
//! into "500" responses, surfacing the error tree for operators.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::{Path, PathBuf};

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Workspace, library, file, extraction or manifest does not exist
    #[display("not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Access denied by the filesystem
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// Entity already exists (for operations that require new entities)
    #[display("already exists: {}", _0.display())]
    AlreadyExists(#[error(not(source))] PathBuf),
    /// Manifest could not be parsed against its schema, or has an
    /// unsupported version. Never coerced.
    #[display("corrupt manifest: {}", _0.display())]
    CorruptManifest(#[error(not(source))] PathBuf),
    /// A manifest value could not be serialized; nothing was written
    #[display("could not encode manifest: {}", _0.display())]
    Encode(#[error(not(source))] PathBuf),
    /// Reading from a caller-provided stream, or producing a read stream, failed
    #[display("stream error")]
    Stream,
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Identifier or path contains characters outside the allowlist, or does
    /// not point inside the storage tree
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// Identifier would escape the directory it names
    #[display("path traversal rejected: {_0:?}")]
    PathTraversal(#[error(not(source))] String),
    #[display("invalid argument: {_0}")]
    InvalidArgument(#[error(not(source))] String),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Classify an I/O error that happened while touching `path`.
    pub(crate) fn from_io(err: IoError, path: &Path) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            std::io::ErrorKind::AlreadyExists => Self::AlreadyExists(path.to_path_buf()),
            _ => Self::Io(err),
        }
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Stream)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
