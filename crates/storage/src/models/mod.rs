//! Storage models.
//!
//! The directory tree is the database; these types are the JSON manifests
//! co-located with each entity, acting as denormalized indexes over it.

mod extraction;
mod manifest;
mod usage;

pub use self::extraction::{
    EXTRACTION_METADATA_VERSION, ExtractionMetadata, ExtractionOptions, ExtractionOutput, ExtractionStatus, Shard,
};
pub use self::manifest::{
    FileManifest, FileUsage, GroupManifest, GroupUpdate, LibraryManifest, LibraryUpdate, MANIFEST_VERSION, SourceMeta,
    WorkspaceManifest, WorkspaceUpdate,
};
pub use self::usage::{IntegrityState, StorageStats, Tally, UsageDelta};

/// Manifests carry a schema version; a mismatch is a corrupt manifest.
pub trait Versioned {
    const VERSION: u32;
    fn version(&self) -> u32;
}

/// Manifests that carry usage statistics and take part in bubble-up.
pub trait Accountable {
    fn usage(&self) -> &StorageStats;
    fn usage_mut(&mut self) -> &mut StorageStats;
}

/// Lifecycle of a file: `Absent → Active → Absent`.
///
/// A file becomes active on its first successful source write and returns to
/// absent when deleted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileState {
    Absent,
    Active(Box<FileManifest>),
}
impl FileState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }
}

/// Which lifecycle transition a source write performed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileTransition {
    /// `Absent → Active`
    Created,
    /// `Active → Active` with new source content
    Replaced,
}

/// Outcome of a successful source write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceWrite {
    pub manifest: FileManifest,
    pub transition: FileTransition,
}

/// Total size and number of regular files below a directory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FolderStats {
    pub bytes: u64,
    pub files: u64,
}
