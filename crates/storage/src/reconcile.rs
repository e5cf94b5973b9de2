//! Reconciler: recompute usage from the physical tree.
//!
//! Walks bottom-up from the requested scope and overwrites the usage of every
//! manifest on the way with ground truth. Only the requested scope has to be
//! readable; anything below it that cannot be read is logged and counted as
//! empty, trading undercount for never failing a whole reconciliation.

use crate::error::{ErrorKind, Result};
use crate::extraction::extraction_usage;
use crate::layout::{EXTRACTIONS_DIR, FILES_DIR, LIBRARIES_DIR, MANIFEST_FILE, SOURCE_FILE};
use crate::models::{Accountable, FileManifest, GroupManifest, StorageStats, Tally, Versioned};
use crate::path::is_transient;
use crate::service::LocalStorage;
use crate::{manifest, walk};
use futures::{StreamExt, stream};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use tokio::fs;

impl LocalStorage {
    /// See [`StorageService::reconcile`](crate::StorageService::reconcile).
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn reconcile(&self, workspace: &str, library: Option<&str>, file: Option<&str>) -> Result<StorageStats> {
        let (scope, tally) = match (library, file) {
            (Some(library), Some(file)) => {
                ("file", self.reconcile_file(workspace, library, file, self.concurrency).await?)
            },
            (Some(library), None) => ("library", self.reconcile_library(workspace, library).await?),
            (None, None) => ("workspace", self.reconcile_workspace(workspace).await?),
            (None, Some(file)) => {
                exn::bail!(ErrorKind::InvalidArgument(format!("file {file:?} given without a library")))
            },
        };
        tracing::info!(
            scope,
            active_bytes = tally.active_bytes,
            physical_bytes = tally.physical_bytes,
            active_files = tally.active_files,
            total_files = tally.total_files,
            "Reconciled"
        );
        Ok(StorageStats::reconciled(tally, Self::now()))
    }

    async fn reconcile_workspace(&self, workspace: &str) -> Result<Tally> {
        let dir = self.layout.workspace_dir(workspace)?;
        let path = dir.join(MANIFEST_FILE);
        manifest::read::<GroupManifest>(&path).await?;
        let mut tally = Tally::default();
        for library in walk::subdirectories_or_empty(&dir.join(LIBRARIES_DIR)).await? {
            tally += self.reconcile_library(workspace, &library).await.unwrap_or_else(|e| {
                tracing::warn!(workspace, library = %library, error = %e, "Skipping unreadable library");
                Tally::default()
            });
        }
        self.store::<GroupManifest>(&path, tally).await?;
        Ok(tally)
    }

    async fn reconcile_library(&self, workspace: &str, library: &str) -> Result<Tally> {
        let dir = self.layout.library_dir(workspace, library)?;
        let path = dir.join(MANIFEST_FILE);
        manifest::read::<GroupManifest>(&path).await?;
        let files = walk::subdirectories_or_empty(&dir.join(FILES_DIR)).await?;
        let (parallel_files, per_file) = split_concurrency(self.concurrency, files.len());
        let tally: Tally = stream::iter(files)
            .map(|file| async move {
                self.reconcile_file(workspace, library, &file, per_file).await.unwrap_or_else(|e| {
                    tracing::warn!(workspace, library, file = %file, error = %e, "Skipping unreadable file");
                    Tally::default()
                })
            })
            .buffer_unordered(parallel_files)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .sum();
        self.store::<GroupManifest>(&path, tally).await?;
        Ok(tally)
    }

    /// The source always counts as active. Each extraction counts as
    /// physical, and also as active when it is bound to the current hash.
    async fn reconcile_file(&self, workspace: &str, library: &str, file: &str, concurrency: usize) -> Result<Tally> {
        let dir = self.layout.file_dir(workspace, library, file)?;
        let path = dir.join(MANIFEST_FILE);
        let current: FileManifest = manifest::read(&path).await?;

        let source_bytes = source_size(&dir.join(SOURCE_FILE)).await;
        let mut tally = source_bytes.map(|bytes| Tally::active(bytes, 1)).unwrap_or_default();
        let extractions = dir.join(EXTRACTIONS_DIR);
        for method in walk::subdirectories_or_empty(&extractions).await? {
            let hash = (!is_transient(&method)).then_some(current.current_source_hash.as_str());
            tally += extraction_usage(&extractions.join(&method), hash, concurrency).await.unwrap_or_else(|e| {
                tracing::warn!(file = %dir.display(), method = %method, error = %e, "Skipping unreadable extraction");
                Tally::default()
            });
        }

        let now = Self::now();
        self.ledger
            .update(&path, |manifest: &mut FileManifest| {
                manifest.usage.source_bytes = source_bytes.unwrap_or_default();
                manifest.usage.stats = StorageStats::reconciled(tally, now);
            })
            .await?;
        Ok(tally)
    }

    async fn store<T>(&self, path: &Path, tally: Tally) -> Result<()>
    where
        T: DeserializeOwned + Serialize + Versioned + Accountable,
    {
        let now = Self::now();
        self.ledger.update(path, |manifest: &mut T| *manifest.usage_mut() = StorageStats::reconciled(tally, now)).await?;
        Ok(())
    }
}

/// Split a concurrency budget between `tasks` parallel tasks and the work
/// inside each, so the product stays within `total`.
fn split_concurrency(total: usize, tasks: usize) -> (usize, usize) {
    let total = total.max(1);
    let parallel = tasks.clamp(1, total);
    (parallel, total / parallel)
}

/// Size of the source blob; `None` if there is none to count.
async fn source_size(path: &Path) -> Option<u64> {
    match fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => Some(metadata.len()),
        Ok(_) => None,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Could not stat source");
            None
        },
    }
}
