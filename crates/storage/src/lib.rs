//! Multi-tenant document storage on a local filesystem.
//!
//! Workspaces own libraries, libraries own files, and files own one source
//! blob plus any number of extractions (one per method). Every level keeps a
//! JSON manifest with denormalized usage statistics that are bubbled up on
//! each change and recomputed from disk by [`StorageService::reconcile`].

pub mod error;
mod extraction;
pub mod io;
pub mod layout;
mod ledger;
pub mod manifest;
pub mod models;
mod path;
mod reconcile;
pub mod service;
mod source;
pub mod walk;

pub use crate::io::{ContentReader, ContentStream, collect, into_async_read};
pub use crate::models::{
    ExtractionMetadata, ExtractionOptions, FileManifest, FileState, FileTransition, FolderStats, GroupUpdate,
    IntegrityState, LibraryManifest, LibraryUpdate, SourceMeta, SourceWrite, StorageStats, WorkspaceManifest,
    WorkspaceUpdate,
};
pub use crate::path::{MAX_IDENTIFIER_LENGTH, validate as validate_path, validate_identifier};
pub use crate::service::{LocalStorage, StorageService};
use std::sync::Arc;

pub type StorageHandle = Arc<dyn StorageService + Send + Sync>;
