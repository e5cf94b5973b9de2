//! Usage ledger: bubbles usage deltas from a manifest up to its ancestors.
//!
//! Every level's update is an independent read-modify-write of its own
//! manifest file; there is no transaction across levels. Within one process
//! the read-modify-write cycles on a given manifest path are serialized
//! through a per-path gate, so concurrent deltas to the same manifest are
//! each applied exactly once. Separate processes sharing a root are not
//! coordinated and can still drift; [`reconcile`](crate::StorageService::reconcile)
//! restores ground truth.

use crate::error::Result;
use crate::layout::{Layout, Level, MANIFEST_FILE};
use crate::manifest;
use crate::models::{Accountable, FileManifest, GroupManifest, UsageDelta, Versioned};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use time::OffsetDateTime;
use tokio::sync::Mutex as AsyncMutex;

type Gate = Arc<AsyncMutex<()>>;

/// Prune dead gates once the table grows past this many entries.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Default)]
pub struct Ledger {
    gates: Mutex<HashMap<PathBuf, Weak<AsyncMutex<()>>>>,
}
impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    fn gate(&self, path: &Path) -> Gate {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(gate) = gates.get(path).and_then(Weak::upgrade) {
            return gate;
        }
        if gates.len() >= PRUNE_THRESHOLD {
            gates.retain(|_, gate| gate.strong_count() > 0);
        }
        let gate = Gate::default();
        gates.insert(path.to_path_buf(), Arc::downgrade(&gate));
        gate
    }

    /// Read-modify-write a manifest while holding its gate.
    pub async fn update<T, F>(&self, path: &Path, change: F) -> Result<T>
    where
        T: DeserializeOwned + Serialize + Versioned,
        F: FnOnce(&mut T),
    {
        let gate = self.gate(path);
        let _guard = gate.lock().await;
        let mut current: T = manifest::read(path).await?;
        change(&mut current);
        manifest::write(path, &current).await?;
        Ok(current)
    }

    /// Overwrite a manifest while holding its gate.
    pub async fn replace<T: Serialize>(&self, path: &Path, manifest: &T) -> Result<()> {
        let gate = self.gate(path);
        let _guard = gate.lock().await;
        manifest::write(path, manifest).await
    }

    /// Apply `delta` to the manifest of the entity enclosing `dir` and then
    /// to each of its ancestors: file, then library, then workspace.
    ///
    /// `dir` may be any path inside the tree; the starting level is derived
    /// from it. Stops at the first level that fails; levels already updated
    /// stay updated.
    #[tracing::instrument(level = "debug", skip(self, layout, dir), fields(dir = %dir.display()))]
    pub async fn apply_delta(&self, layout: &Layout, dir: &Path, delta: UsageDelta) -> Result<()> {
        if delta.is_zero() {
            return Ok(());
        }
        self.apply_per_level(layout, dir, |_| delta).await
    }

    /// Like [`apply_delta()`](Self::apply_delta), but each level gets its
    /// own delta. Levels whose delta is zero are not touched.
    #[tracing::instrument(level = "debug", skip(self, layout, dir, delta_for), fields(dir = %dir.display()))]
    pub async fn apply_per_level<F>(&self, layout: &Layout, dir: &Path, delta_for: F) -> Result<()>
    where
        F: Fn(Level) -> UsageDelta,
    {
        let now = OffsetDateTime::now_utc();
        for (level, entity_dir) in layout.locate(dir)?.chain(layout)? {
            let delta = delta_for(level);
            if delta.is_zero() {
                continue;
            }
            let path = entity_dir.join(MANIFEST_FILE);
            match level {
                Level::File => self.apply_to::<FileManifest>(&path, delta, now).await?,
                Level::Library | Level::Workspace => self.apply_to::<GroupManifest>(&path, delta, now).await?,
            }
        }
        Ok(())
    }

    async fn apply_to<T>(&self, path: &Path, delta: UsageDelta, now: OffsetDateTime) -> Result<()>
    where
        T: DeserializeOwned + Serialize + Versioned + Accountable,
    {
        self.update::<T, _>(path, |manifest| {
            if !manifest.usage_mut().apply(delta, now) {
                tracing::warn!(path = %path.display(), ?delta, "Usage delta underflowed; manifest marked drifted");
            }
        })
        .await
        .map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IntegrityState, SourceMeta};
    use tokio::fs;

    async fn tree() -> (tempfile::TempDir, Layout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let now = OffsetDateTime::now_utc();
        let ws = layout.workspace_dir("w1").unwrap();
        let lib = layout.library_dir("w1", "l1").unwrap();
        let file = layout.file_dir("w1", "l1", "f1").unwrap();
        fs::create_dir_all(&file).await.unwrap();
        manifest::write(&ws.join(MANIFEST_FILE), &GroupManifest::new("w1", "W", None, now)).await.unwrap();
        manifest::write(&lib.join(MANIFEST_FILE), &GroupManifest::new("l1", "L", None, now)).await.unwrap();
        let meta = SourceMeta::new("a.txt", "text/plain");
        manifest::write(&file.join(MANIFEST_FILE), &FileManifest::fresh("f1", meta, "h".into(), 10, now))
            .await
            .unwrap();
        (dir, layout)
    }

    async fn group(dir: PathBuf) -> GroupManifest {
        manifest::read(&dir.join(MANIFEST_FILE)).await.unwrap()
    }

    #[tokio::test]
    async fn test_bubbles_from_file_to_workspace() {
        let (_dir, layout) = tree().await;
        let ledger = Ledger::new();
        let extraction = layout.extraction_dir("w1", "l1", "f1", "methodA").unwrap();
        ledger.apply_delta(&layout, &extraction, UsageDelta::uniform(50, 2)).await.unwrap();

        let file: FileManifest =
            manifest::read(&layout.file_dir("w1", "l1", "f1").unwrap().join(MANIFEST_FILE)).await.unwrap();
        assert_eq!(file.usage.stats.active_bytes, 60);
        assert_eq!(file.usage.stats.total_file_count, 3);
        assert_eq!(group(layout.library_dir("w1", "l1").unwrap()).await.usage.active_bytes, 50);
        assert_eq!(group(layout.workspace_dir("w1").unwrap()).await.usage.active_bytes, 50);
    }

    #[tokio::test]
    async fn test_per_level_deltas() {
        let (_dir, layout) = tree().await;
        let ledger = Ledger::new();
        let file_dir = layout.file_dir("w1", "l1", "f1").unwrap();
        let file_path = file_dir.join(MANIFEST_FILE);
        let before: FileManifest = manifest::read(&file_path).await.unwrap();
        ledger
            .apply_per_level(&layout, &file_dir, |level| match level {
                Level::File => UsageDelta::default(),
                Level::Library | Level::Workspace => UsageDelta::uniform(4, 1),
            })
            .await
            .unwrap();
        let after: FileManifest = manifest::read(&file_path).await.unwrap();
        assert_eq!(after, before);
        assert_eq!(group(layout.library_dir("w1", "l1").unwrap()).await.usage.active_bytes, 4);
        assert_eq!(group(layout.workspace_dir("w1").unwrap()).await.usage.total_file_count, 1);
    }

    #[tokio::test]
    async fn test_starting_at_library_skips_file() {
        let (_dir, layout) = tree().await;
        let ledger = Ledger::new();
        let library = layout.library_dir("w1", "l1").unwrap();
        ledger.apply_delta(&layout, &library, UsageDelta::uniform(7, 1)).await.unwrap();
        let file: FileManifest =
            manifest::read(&layout.file_dir("w1", "l1", "f1").unwrap().join(MANIFEST_FILE)).await.unwrap();
        assert_eq!(file.usage.stats.active_bytes, 10);
        assert_eq!(group(library).await.usage.active_bytes, 7);
        assert_eq!(group(layout.workspace_dir("w1").unwrap()).await.usage.total_file_count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_deltas_are_all_applied() {
        let (_dir, layout) = tree().await;
        let ledger = Ledger::new();
        let file = layout.file_dir("w1", "l1", "f1").unwrap();
        let deltas = (0..16).map(|_| ledger.apply_delta(&layout, &file, UsageDelta::uniform(3, 1)));
        for result in futures::future::join_all(deltas).await {
            result.unwrap();
        }
        let workspace = group(layout.workspace_dir("w1").unwrap()).await;
        assert_eq!(workspace.usage.active_bytes, 48);
        assert_eq!(workspace.usage.total_file_count, 16);
    }

    #[tokio::test]
    async fn test_underflow_marks_drifted() {
        let (_dir, layout) = tree().await;
        let ledger = Ledger::new();
        let library = layout.library_dir("w1", "l1").unwrap();
        ledger.apply_delta(&layout, &library, -UsageDelta::uniform(5, 1)).await.unwrap();
        let manifest = group(library).await;
        assert_eq!(manifest.usage.active_bytes, 0);
        assert_eq!(manifest.usage.integrity_state, IntegrityState::Drifted);
    }

    #[tokio::test]
    async fn test_missing_level_fails() {
        let (_dir, layout) = tree().await;
        let ledger = Ledger::new();
        let orphan = layout.file_dir("w1", "l1", "ghost").unwrap();
        let err = ledger.apply_delta(&layout, &orphan, UsageDelta::uniform(1, 1)).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
