//! The programmatic surface of the storage engine.
//!
//! [`StorageService`] is what the API layer and job workers program against.
//! [`LocalStorage`] implements it on top of a single filesystem root.

mod local;

pub use self::local::LocalStorage;
use crate::error::Result;
use crate::io::{ContentReader, ContentStream};
use crate::models::{
    ExtractionMetadata, ExtractionOptions, FileManifest, FileState, FolderStats, LibraryManifest, LibraryUpdate,
    SourceMeta, SourceWrite, StorageStats, WorkspaceManifest, WorkspaceUpdate,
};
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

/// Storage for workspaces, libraries, files and their extractions, with
/// usage statistics maintained at every level.
///
/// # Identifiers
/// Every id (workspace, library, file, extraction method) must pass
/// [`validate_identifier`](crate::validate_identifier); anything else is
/// rejected before the filesystem is touched.
///
/// # Consistency
/// Each operation runs its steps in the order physical mutation, then
/// manifest write, then bubble-up to the ancestors. Usage figures maintained
/// this way can drift; [`reconcile()`](Self::reconcile) recomputes them from
/// disk. Extraction writes for the same `(file, method)` pair must be
/// serialized by the caller.
///
/// # Examples
///
/// ```no_run
/// use futures::io::Cursor;
/// use shelf_storage::{LocalStorage, SourceMeta, StorageService, collect};
///
/// # async fn example() -> shelf_storage::error::Result<()> {
/// let storage = LocalStorage::new("/srv/shelf")?;
/// storage.create_workspace("acme", "Acme Inc.", None).await?;
/// storage.create_library("acme", "contracts", "Contracts", None).await?;
///
/// let content = Box::new(Cursor::new(b"hello".to_vec()));
/// let meta = SourceMeta::new("hello.txt", "text/plain");
/// storage.write_source("acme", "contracts", "f1", content, meta).await?;
///
/// let stream = storage.read_source("acme", "contracts", "f1").await?;
/// assert_eq!(collect(stream).await?, b"hello");
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Ids of all workspaces, sorted.
    async fn list_workspaces(&self) -> Result<Vec<String>>;

    /// Create a workspace with all-zero usage. Fails with
    /// [`AlreadyExists`](crate::error::ErrorKind::AlreadyExists) rather than
    /// silently succeeding if it is already there.
    async fn create_workspace(&self, id: &str, name: &str, settings: Option<Value>) -> Result<WorkspaceManifest>;

    async fn get_workspace_manifest(&self, id: &str) -> Result<WorkspaceManifest>;

    /// Change the name and/or settings of a workspace. Usage is untouched.
    async fn update_workspace(&self, id: &str, update: WorkspaceUpdate) -> Result<WorkspaceManifest>;

    /// Ids of the libraries in a workspace, sorted.
    async fn list_libraries(&self, workspace: &str) -> Result<Vec<String>>;

    /// Create a library inside an existing workspace.
    async fn create_library(
        &self,
        workspace: &str,
        id: &str,
        name: &str,
        settings: Option<Value>,
    ) -> Result<LibraryManifest>;

    async fn get_library_manifest(&self, workspace: &str, library: &str) -> Result<LibraryManifest>;

    async fn update_library(&self, workspace: &str, library: &str, update: LibraryUpdate) -> Result<LibraryManifest>;

    /// Move a library, with everything in it, into another workspace.
    ///
    /// The library's own manifest is unchanged; its usage is subtracted from
    /// the source workspace and added to the destination workspace.
    async fn move_library(&self, from: &str, library: &str, to: &str) -> Result<LibraryManifest>;

    /// Ids of the files in a library, sorted.
    async fn list_files(&self, workspace: &str, library: &str) -> Result<Vec<String>>;

    /// Where the file is in its `Absent → Active → Absent` lifecycle.
    async fn file_state(&self, workspace: &str, library: &str, file: &str) -> Result<FileState>;

    async fn get_file_manifest(&self, workspace: &str, library: &str, file: &str) -> Result<FileManifest>;

    /// Stream a source upload to disk, hashing it on the way.
    ///
    /// Creates the file on first write. Rewriting changes the file's
    /// `currentSourceHash`, which makes every existing extraction stale.
    async fn write_source(
        &self,
        workspace: &str,
        library: &str,
        file: &str,
        content: ContentReader,
        meta: SourceMeta,
    ) -> Result<SourceWrite>;

    async fn read_source(&self, workspace: &str, library: &str, file: &str) -> Result<ContentStream>;

    /// Remove a file with its source and all extractions, returning the
    /// manifest it had.
    async fn delete_file(&self, workspace: &str, library: &str, file: &str) -> Result<FileManifest>;

    /// Method ids of the file's extractions, sorted. Writes still in flight
    /// are not listed.
    async fn list_extractions(&self, workspace: &str, library: &str, file: &str) -> Result<Vec<String>>;

    async fn get_extraction_metadata(
        &self,
        workspace: &str,
        library: &str,
        file: &str,
        method: &str,
    ) -> Result<ExtractionMetadata>;

    /// Write `output.md` for a method, bound to the file's current source
    /// hash, replacing any previous extraction for that method.
    ///
    /// Readers never observe a partially written extraction: on failure the
    /// previous extraction, if any, is left as it was.
    async fn write_extraction(
        &self,
        workspace: &str,
        library: &str,
        file: &str,
        method: &str,
        content: ContentReader,
        options: ExtractionOptions,
    ) -> Result<ExtractionMetadata>;

    /// Like [`write_extraction()`](Self::write_extraction), but the output
    /// is split into ordered shards. Shard `n` of `shards` gets index `n`.
    async fn write_sharded_extraction(
        &self,
        workspace: &str,
        library: &str,
        file: &str,
        method: &str,
        shards: Vec<ContentReader>,
        options: ExtractionOptions,
    ) -> Result<ExtractionMetadata>;

    /// Stream an extraction's content. Sharded extractions come back as one
    /// continuous stream, shards in index order.
    async fn read_extraction(&self, workspace: &str, library: &str, file: &str, method: &str)
    -> Result<ContentStream>;

    /// Recompute usage from disk for a file, a library, or a whole workspace,
    /// overwriting the manifests at and below that scope.
    ///
    /// Only the scope itself has to exist: unreadable entities below it are
    /// logged and counted as empty. Returns the recomputed stats of the scope.
    async fn reconcile(&self, workspace: &str, library: Option<&str>, file: Option<&str>) -> Result<StorageStats>;

    /// Total size and number of regular files below a path relative to the
    /// storage root.
    async fn folder_stats(&self, path: &Path) -> Result<FolderStats>;
}
