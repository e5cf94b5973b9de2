//! Filesystem implementation of [`StorageService`].
//!
//! Workspace and library lifecycle lives here; source, extraction and
//! reconciliation operations are implemented in their own modules as
//! inherent methods of [`LocalStorage`] and forwarded by the trait impl.

use crate::error::{ErrorKind, Result};
use crate::io::{ContentReader, ContentStream};
use crate::layout::{LIBRARIES_DIR, Layout, MANIFEST_FILE};
use crate::ledger::Ledger;
use crate::models::{
    ExtractionMetadata, ExtractionOptions, FileManifest, FileState, FolderStats, GroupManifest, LibraryManifest,
    LibraryUpdate, SourceMeta, SourceWrite, StorageStats, UsageDelta, WorkspaceManifest, WorkspaceUpdate,
};
use crate::path::validate as validate_path;
use crate::service::StorageService;
use crate::walk::{self, DEFAULT_CONCURRENCY};
use crate::{layout, manifest};
use async_trait::async_trait;
use serde_json::Value;
use std::fs::create_dir_all as sync_create_dir;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::fs;

/// Storage engine rooted at a directory on a local (or network-mounted)
/// filesystem.
///
/// Clones share the same ledger, so manifest updates made through any clone
/// are serialized with each other.
///
/// # Examples
///
/// ```no_run
/// use shelf_storage::LocalStorage;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = LocalStorage::new("/srv/shelf")?.with_concurrency(8);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct LocalStorage {
    pub(crate) layout: Layout,
    pub(crate) ledger: Arc<Ledger>,
    pub(crate) concurrency: usize,
}
impl LocalStorage {
    /// Open (and create, if absent) a storage root.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPath`](ErrorKind::InvalidPath) if `root` is not
    /// absolute or exists but is not a directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Once per process; not worth making the constructor async.
            sync_create_dir(&root).map_err(|e| ErrorKind::from_io(e, &root))?;
            tracing::info!(root = %root.display(), "Created storage root");
        }
        Ok(Self {
            layout: Layout::new(root),
            ledger: Arc::new(Ledger::new()),
            concurrency: DEFAULT_CONCURRENCY,
        })
    }

    /// Cap on simultaneous filesystem operations in tree walks. Zero is
    /// treated as one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub(crate) fn now() -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    /// Fail with [`NotFound`](ErrorKind::NotFound) unless `dir` is an
    /// existing directory.
    pub(crate) async fn require_dir(dir: &Path) -> Result<()> {
        let metadata = fs::metadata(dir).await.map_err(|e| ErrorKind::from_io(e, dir))?;
        if !metadata.is_dir() {
            exn::bail!(ErrorKind::NotFound(dir.to_path_buf()));
        }
        Ok(())
    }

    /// Create `dir` (which must not exist yet) and write a fresh group
    /// manifest into it. The directory is removed again if the manifest
    /// cannot be written.
    async fn create_group(dir: PathBuf, manifest: GroupManifest) -> Result<GroupManifest> {
        fs::create_dir(&dir).await.map_err(|e| ErrorKind::from_io(e, &dir))?;
        if let Err(e) = manifest::write(&dir.join(MANIFEST_FILE), &manifest).await {
            if let Err(cleanup) = fs::remove_dir_all(&dir).await {
                tracing::warn!(dir = %dir.display(), error = %cleanup, "Could not remove half-created directory");
            }
            return Err(e);
        }
        Ok(manifest)
    }
}

#[async_trait]
impl StorageService for LocalStorage {
    async fn list_workspaces(&self) -> Result<Vec<String>> {
        walk::subdirectories_or_empty(&self.layout.workspaces_dir()).await
    }

    #[tracing::instrument(level = "debug", skip(self, settings))]
    async fn create_workspace(&self, id: &str, name: &str, settings: Option<Value>) -> Result<WorkspaceManifest> {
        let dir = self.layout.workspace_dir(id)?;
        let parent = self.layout.workspaces_dir();
        fs::create_dir_all(&parent).await.map_err(|e| ErrorKind::from_io(e, &parent))?;
        let manifest = Self::create_group(dir, GroupManifest::new(id, name, settings, Self::now())).await?;
        tracing::info!(workspace = id, "Workspace created");
        Ok(manifest)
    }

    async fn get_workspace_manifest(&self, id: &str) -> Result<WorkspaceManifest> {
        manifest::read(&self.layout.workspace_dir(id)?.join(MANIFEST_FILE)).await
    }

    #[tracing::instrument(level = "debug", skip(self, update))]
    async fn update_workspace(&self, id: &str, update: WorkspaceUpdate) -> Result<WorkspaceManifest> {
        let path = self.layout.workspace_dir(id)?.join(MANIFEST_FILE);
        self.ledger.update(&path, |manifest: &mut GroupManifest| manifest.update(update, Self::now())).await
    }

    async fn list_libraries(&self, workspace: &str) -> Result<Vec<String>> {
        let dir = self.layout.workspace_dir(workspace)?;
        Self::require_dir(&dir).await?;
        walk::subdirectories_or_empty(&dir.join(LIBRARIES_DIR)).await
    }

    #[tracing::instrument(level = "debug", skip(self, settings))]
    async fn create_library(
        &self,
        workspace: &str,
        id: &str,
        name: &str,
        settings: Option<Value>,
    ) -> Result<LibraryManifest> {
        let dir = self.layout.library_dir(workspace, id)?;
        // The workspace has to exist; its manifest is where usage lands.
        self.get_workspace_manifest(workspace).await?;
        let parent = self.layout.workspace_dir(workspace)?.join(LIBRARIES_DIR);
        fs::create_dir_all(&parent).await.map_err(|e| ErrorKind::from_io(e, &parent))?;
        let manifest = Self::create_group(dir, GroupManifest::new(id, name, settings, Self::now())).await?;
        tracing::info!(workspace, library = id, "Library created");
        Ok(manifest)
    }

    async fn get_library_manifest(&self, workspace: &str, library: &str) -> Result<LibraryManifest> {
        manifest::read(&self.layout.library_dir(workspace, library)?.join(MANIFEST_FILE)).await
    }

    #[tracing::instrument(level = "debug", skip(self, update))]
    async fn update_library(&self, workspace: &str, library: &str, update: LibraryUpdate) -> Result<LibraryManifest> {
        let path = self.layout.library_dir(workspace, library)?.join(MANIFEST_FILE);
        self.ledger.update(&path, |manifest: &mut GroupManifest| manifest.update(update, Self::now())).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn move_library(&self, from: &str, library: &str, to: &str) -> Result<LibraryManifest> {
        if from == to {
            exn::bail!(ErrorKind::InvalidArgument(format!("library {library:?} is already in workspace {from:?}")));
        }
        let source = self.layout.library_dir(from, library)?;
        let target = self.layout.library_dir(to, library)?;
        self.get_workspace_manifest(to).await?;
        let manifest = self.get_library_manifest(from, library).await?;
        if fs::try_exists(&target).await.map_err(|e| ErrorKind::from_io(e, &target))? {
            exn::bail!(ErrorKind::AlreadyExists(target));
        }
        let parent = self.layout.workspace_dir(to)?.join(LIBRARIES_DIR);
        fs::create_dir_all(&parent).await.map_err(|e| ErrorKind::from_io(e, &parent))?;
        fs::rename(&source, &target).await.map_err(|e| ErrorKind::from_io(e, &source))?;
        tracing::debug!(from = %source.display(), to = %target.display(), "Library directory moved");

        let delta = UsageDelta::from(&manifest.usage);
        self.ledger.apply_delta(&self.layout, &self.layout.workspace_dir(from)?, -delta).await?;
        self.ledger.apply_delta(&self.layout, &self.layout.workspace_dir(to)?, delta).await?;
        tracing::info!(library, from, to, bytes = manifest.usage.active_bytes, "Library moved");
        Ok(manifest)
    }

    async fn list_files(&self, workspace: &str, library: &str) -> Result<Vec<String>> {
        let dir = self.layout.library_dir(workspace, library)?;
        Self::require_dir(&dir).await?;
        walk::subdirectories_or_empty(&dir.join(layout::FILES_DIR)).await
    }

    async fn file_state(&self, workspace: &str, library: &str, file: &str) -> Result<FileState> {
        LocalStorage::file_state(self, workspace, library, file).await
    }

    async fn get_file_manifest(&self, workspace: &str, library: &str, file: &str) -> Result<FileManifest> {
        LocalStorage::get_file_manifest(self, workspace, library, file).await
    }

    async fn write_source(
        &self,
        workspace: &str,
        library: &str,
        file: &str,
        content: ContentReader,
        meta: SourceMeta,
    ) -> Result<SourceWrite> {
        LocalStorage::write_source(self, workspace, library, file, content, meta).await
    }

    async fn read_source(&self, workspace: &str, library: &str, file: &str) -> Result<ContentStream> {
        LocalStorage::read_source(self, workspace, library, file).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn delete_file(&self, workspace: &str, library: &str, file: &str) -> Result<FileManifest> {
        let dir = self.layout.file_dir(workspace, library, file)?;
        let manifest = LocalStorage::get_file_manifest(self, workspace, library, file).await?;
        fs::remove_dir_all(&dir).await.map_err(|e| ErrorKind::from_io(e, &dir))?;
        tracing::debug!(dir = %dir.display(), "File directory removed");
        // The file manifest is gone with its directory; bubbling starts at the library.
        let library_dir = self.layout.library_dir(workspace, library)?;
        self.ledger.apply_delta(&self.layout, &library_dir, -UsageDelta::from(&manifest.usage.stats)).await?;
        tracing::info!(workspace, library, file, bytes = manifest.usage.stats.physical_bytes, "File deleted");
        Ok(manifest)
    }

    async fn list_extractions(&self, workspace: &str, library: &str, file: &str) -> Result<Vec<String>> {
        LocalStorage::list_extractions(self, workspace, library, file).await
    }

    async fn get_extraction_metadata(
        &self,
        workspace: &str,
        library: &str,
        file: &str,
        method: &str,
    ) -> Result<ExtractionMetadata> {
        LocalStorage::get_extraction_metadata(self, workspace, library, file, method).await
    }

    async fn write_extraction(
        &self,
        workspace: &str,
        library: &str,
        file: &str,
        method: &str,
        content: ContentReader,
        options: ExtractionOptions,
    ) -> Result<ExtractionMetadata> {
        LocalStorage::write_extraction(self, workspace, library, file, method, content, options).await
    }

    async fn write_sharded_extraction(
        &self,
        workspace: &str,
        library: &str,
        file: &str,
        method: &str,
        shards: Vec<ContentReader>,
        options: ExtractionOptions,
    ) -> Result<ExtractionMetadata> {
        LocalStorage::write_sharded_extraction(self, workspace, library, file, method, shards, options).await
    }

    async fn read_extraction(
        &self,
        workspace: &str,
        library: &str,
        file: &str,
        method: &str,
    ) -> Result<ContentStream> {
        LocalStorage::read_extraction(self, workspace, library, file, method).await
    }

    async fn reconcile(&self, workspace: &str, library: Option<&str>, file: Option<&str>) -> Result<StorageStats> {
        LocalStorage::reconcile(self, workspace, library, file).await
    }

    async fn folder_stats(&self, path: &Path) -> Result<FolderStats> {
        let path = self.layout.root().join(validate_path(path)?);
        walk::folder_stats(&path, self.concurrency).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IntegrityState;
    use serde_json::json;

    fn storage() -> (tempfile::TempDir, LocalStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        (dir, storage)
    }

    #[test]
    fn test_new_requires_absolute_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LocalStorage::new("relative/root").is_err());
        std::fs::write(dir.path().join("file"), b"x").unwrap();
        assert!(LocalStorage::new(dir.path().join("file")).is_err());
        assert!(LocalStorage::new(dir.path().join("nested/root")).is_ok());
        assert!(dir.path().join("nested/root").is_dir());
    }

    #[tokio::test]
    async fn test_create_workspace_rejects_duplicates() {
        let (_dir, storage) = storage();
        let manifest = storage.create_workspace("w1", "Acme", Some(json!({"tier": "gold"}))).await.unwrap();
        assert_eq!(manifest.usage.active_bytes, 0);
        assert_eq!(manifest.usage.integrity_state, IntegrityState::Healthy);
        let err = storage.create_workspace("w1", "Acme again", None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
        assert_eq!(storage.get_workspace_manifest("w1").await.unwrap().name, "Acme");
    }

    #[tokio::test]
    async fn test_create_library_requires_workspace() {
        let (_dir, storage) = storage();
        let err = storage.create_library("nope", "l1", "Library", None).await.unwrap_err();
        assert!(err.is_not_found());
        storage.create_workspace("w1", "Acme", None).await.unwrap();
        storage.create_library("w1", "l1", "Contracts", None).await.unwrap();
        let err = storage.create_library("w1", "l1", "Contracts", None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
        assert_eq!(storage.list_libraries("w1").await.unwrap(), vec!["l1"]);
    }

    #[tokio::test]
    async fn test_rejects_unsafe_identifiers() {
        let (_dir, storage) = storage();
        let err = storage.create_workspace("..", "Escape", None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::PathTraversal(_)));
        let err = storage.create_workspace("a b", "Space", None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_update_library_keeps_usage() {
        let (_dir, storage) = storage();
        storage.create_workspace("w1", "Acme", None).await.unwrap();
        let created = storage.create_library("w1", "l1", "Contracts", None).await.unwrap();
        let update = LibraryUpdate {
            name: Some("Legal".to_string()),
            settings: None,
        };
        let updated = storage.update_library("w1", "l1", update).await.unwrap();
        assert_eq!(updated.name, "Legal");
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.usage.active_bytes, created.usage.active_bytes);
        assert_eq!(storage.get_library_manifest("w1", "l1").await.unwrap().name, "Legal");
    }

    #[tokio::test]
    async fn test_move_library_preconditions() {
        let (_dir, storage) = storage();
        storage.create_workspace("w1", "One", None).await.unwrap();
        storage.create_workspace("w2", "Two", None).await.unwrap();
        storage.create_library("w1", "l1", "Lib", None).await.unwrap();
        storage.create_library("w2", "l1", "Clash", None).await.unwrap();

        let err = storage.move_library("w1", "l1", "w1").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidArgument(_)));
        let err = storage.move_library("w1", "l1", "w3").await.unwrap_err();
        assert!(err.is_not_found());
        let err = storage.move_library("w1", "l1", "w2").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
        // Nothing moved.
        assert_eq!(storage.get_library_manifest("w1", "l1").await.unwrap().name, "Lib");
    }

    #[tokio::test]
    async fn test_listing_missing_parents() {
        let (_dir, storage) = storage();
        assert!(storage.list_workspaces().await.unwrap().is_empty());
        assert!(storage.list_libraries("w1").await.unwrap_err().is_not_found());
        storage.create_workspace("w1", "Acme", None).await.unwrap();
        assert!(storage.list_libraries("w1").await.unwrap().is_empty());
        assert!(storage.list_files("w1", "l1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_folder_stats_stays_inside_root() {
        let (_dir, storage) = storage();
        storage.create_workspace("w1", "Acme", None).await.unwrap();
        let stats = storage.folder_stats(Path::new("workspaces/w1")).await.unwrap();
        assert_eq!(stats.files, 1);
        assert!(storage.folder_stats(Path::new("../..")).await.is_err());
    }
}
