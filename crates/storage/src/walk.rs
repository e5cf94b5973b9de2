//! Directory enumeration and bounded-concurrency size walks.

use crate::error::{ErrorKind, Result};
use crate::models::FolderStats;
use futures::{StreamExt, stream};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Default cap on simultaneous filesystem operations during a walk. Protects
/// file descriptors on very large libraries; not a correctness mechanism.
pub const DEFAULT_CONCURRENCY: usize = 20;

/// Names of the directories directly below `dir`, sorted.
///
/// A missing `dir` is [`NotFound`](ErrorKind::NotFound). Non-UTF8 names are
/// skipped since they can never be valid identifiers.
pub async fn subdirectories(dir: &Path) -> Result<Vec<String>> {
    let mut entries = fs::read_dir(dir).await.map_err(|e| ErrorKind::from_io(e, dir))?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| ErrorKind::from_io(e, dir))? {
        let file_type = entry.file_type().await.map_err(|e| ErrorKind::from_io(e, &entry.path()))?;
        if !file_type.is_dir() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(name) => tracing::warn!(dir = %dir.display(), name = ?name, "Skipping non-UTF8 directory name"),
        }
    }
    names.sort();
    Ok(names)
}

/// Like [`subdirectories`], but a missing `dir` is simply empty.
pub(crate) async fn subdirectories_or_empty(dir: &Path) -> Result<Vec<String>> {
    match subdirectories(dir).await {
        Err(e) if e.is_not_found() => Ok(Vec::new()),
        other => other,
    }
}

/// Recursively sums the size and count of regular files below `dir`.
///
/// Walks iteratively; the entries of each directory are inspected at most
/// `concurrency` at a time. Symlinks and other special files are ignored.
pub async fn folder_stats(dir: &Path, concurrency: usize) -> Result<FolderStats> {
    let mut totals = FolderStats::default();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let mut entries = fs::read_dir(&current).await.map_err(|e| ErrorKind::from_io(e, &current))?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| ErrorKind::from_io(e, &current))? {
            paths.push(entry.path());
        }
        let mut inspected = stream::iter(paths).map(inspect).buffer_unordered(concurrency.max(1));
        while let Some(entry) = inspected.next().await {
            match entry? {
                Entry::Directory(path) => stack.push(path),
                Entry::File(size) => {
                    totals.bytes = totals.bytes.saturating_add(size);
                    totals.files += 1;
                },
                Entry::Other => {},
            }
        }
    }
    Ok(totals)
}

enum Entry {
    Directory(PathBuf),
    File(u64),
    Other,
}

async fn inspect(path: PathBuf) -> Result<Entry> {
    let metadata = fs::symlink_metadata(&path).await.map_err(|e| ErrorKind::from_io(e, &path))?;
    Ok(match metadata {
        m if m.is_dir() => Entry::Directory(path),
        m if m.is_file() => Entry::File(m.len()),
        _ => Entry::Other,
    })
}
