//! Extraction Writer and Reader.
//!
//! A write builds the complete extraction in `extractions/{method}.tmp-{ts}`
//! and only then swaps it into place:
//!
//! 1. rename the live `extractions/{method}` aside to `{method}.old-{ts}`,
//! 2. rename the temp directory to `extractions/{method}`,
//! 3. remove the aside copy.
//!
//! If step 2 fails the aside copy is renamed back. A crash between steps 1
//! and 2 leaves the method without a live extraction (the previous one
//! survives as `*.old-*`) until the next successful write.

use crate::error::{ErrorKind, Result};
use crate::io::{self, ContentReader, ContentStream};
use crate::layout::{EXTRACTIONS_DIR, Level, METADATA_FILE, OUTPUT_FILE, SHARDS_DIR};
use crate::models::{
    EXTRACTION_METADATA_VERSION, ExtractionMetadata, ExtractionOptions, ExtractionOutput, ExtractionStatus, Shard,
    Tally, UsageDelta,
};
use crate::path::{ASIDE_MARKER, TEMP_MARKER, is_transient, validate as validate_path, validate_identifier};
use crate::service::LocalStorage;
use crate::{manifest, walk};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs;

enum Payload {
    Single(ContentReader),
    Sharded(Vec<ContentReader>),
}

impl LocalStorage {
    pub async fn list_extractions(&self, workspace: &str, library: &str, file: &str) -> Result<Vec<String>> {
        let dir = self.layout.file_dir(workspace, library, file)?;
        Self::require_dir(&dir).await?;
        let mut methods = walk::subdirectories_or_empty(&dir.join(EXTRACTIONS_DIR)).await?;
        methods.retain(|name| !is_transient(name));
        Ok(methods)
    }

    pub async fn get_extraction_metadata(
        &self,
        workspace: &str,
        library: &str,
        file: &str,
        method: &str,
    ) -> Result<ExtractionMetadata> {
        manifest::read(&self.layout.extraction_dir(workspace, library, file, method)?.join(METADATA_FILE)).await
    }

    #[tracing::instrument(level = "debug", skip(self, content, options))]
    pub async fn write_extraction(
        &self,
        workspace: &str,
        library: &str,
        file: &str,
        method: &str,
        content: ContentReader,
        options: ExtractionOptions,
    ) -> Result<ExtractionMetadata> {
        self.write_payload(workspace, library, file, method, Payload::Single(content), options).await
    }

    #[tracing::instrument(level = "debug", skip(self, shards, options), fields(shards = shards.len()))]
    pub async fn write_sharded_extraction(
        &self,
        workspace: &str,
        library: &str,
        file: &str,
        method: &str,
        shards: Vec<ContentReader>,
        options: ExtractionOptions,
    ) -> Result<ExtractionMetadata> {
        if shards.is_empty() {
            exn::bail!(ErrorKind::InvalidArgument("a sharded extraction needs at least one shard".to_string()));
        }
        if u32::try_from(shards.len()).is_err() {
            exn::bail!(ErrorKind::InvalidArgument(format!("too many shards: {}", shards.len())));
        }
        self.write_payload(workspace, library, file, method, Payload::Sharded(shards), options).await
    }

    async fn write_payload(
        &self,
        workspace: &str,
        library: &str,
        file: &str,
        method: &str,
        payload: Payload,
        options: ExtractionOptions,
    ) -> Result<ExtractionMetadata> {
        let target = self.layout.extraction_dir(workspace, library, file, method)?;
        let file_dir = self.layout.file_dir(workspace, library, file)?;
        // The hash this extraction is bound to, captured before any content arrives.
        let file_manifest = self.get_file_manifest(workspace, library, file).await?;
        let reconciled = file_manifest.usage.stats.last_full_scan.is_some();
        let hash = file_manifest.current_source_hash;

        let parent = file_dir.join(EXTRACTIONS_DIR);
        fs::create_dir_all(&parent).await.map_err(|e| ErrorKind::from_io(e, &parent))?;
        let stamp = OffsetDateTime::now_utc().unix_timestamp_nanos();
        let temp = parent.join(format!("{method}{TEMP_MARKER}{stamp}"));
        fs::create_dir(&temp).await.map_err(|e| ErrorKind::from_io(e, &temp))?;

        let metadata = match build(&temp, method, &hash, payload, options).await {
            Ok(metadata) => metadata,
            Err(e) => {
                remove_best_effort(&temp).await;
                return Err(e);
            },
        };

        let previous = match fs::try_exists(&target).await {
            Ok(true) => Some(extraction_usage(&target, Some(&hash), self.concurrency).await),
            Ok(false) => None,
            Err(e) => {
                remove_best_effort(&temp).await;
                exn::bail!(ErrorKind::from_io(e, &target));
            },
        };
        let previous = match previous.transpose() {
            Ok(previous) => previous,
            Err(e) => {
                remove_best_effort(&temp).await;
                return Err(e);
            },
        };

        let aside = parent.join(format!("{method}{ASIDE_MARKER}{stamp}"));
        swap(&temp, &target, previous.is_some().then_some(aside.as_path())).await?;
        tracing::debug!(path = %target.display(), bytes = metadata.size_bytes, "Extraction swapped into place");

        let files = 1 + match metadata.output.is_sharded {
            true => u64::from(metadata.output.shard_count),
            false => 1,
        };
        let added = UsageDelta::uniform(metadata.size_bytes, files);
        self.ledger
            .apply_per_level(&self.layout, &file_dir, |level| replacement_delta(level, added, previous, reconciled))
            .await?;
        tracing::info!(
            workspace,
            library,
            file,
            method,
            bytes = metadata.size_bytes,
            replaced = previous.is_some(),
            "Extraction written"
        );
        Ok(metadata)
    }

    /// Stream an extraction's content.
    ///
    /// Unsharded extractions stream `output.mainFile`. Sharded extractions
    /// stream every shard in order of its recorded index; metadata without
    /// recorded shards falls back to the lexicographic order of the files in
    /// `shards/`.
    pub async fn read_extraction(
        &self,
        workspace: &str,
        library: &str,
        file: &str,
        method: &str,
    ) -> Result<ContentStream> {
        let dir = self.layout.extraction_dir(workspace, library, file, method)?;
        let metadata: ExtractionMetadata = manifest::read(&dir.join(METADATA_FILE)).await?;
        if !metadata.output.is_sharded {
            let path = dir.join(validate_path(&metadata.output.main_file)?);
            let handle = io::open(&path).await?;
            return Ok(Box::pin(io::file_chunks(handle, path)));
        }

        let shards_dir = dir.join(SHARDS_DIR);
        let paths = match metadata.output.shards.is_empty() {
            false => {
                let mut shards = metadata.output.shards;
                shards.sort_by_key(|shard| shard.index);
                shards
                    .iter()
                    .map(|shard| validate_identifier(&shard.file).map(|name| shards_dir.join(name)))
                    .collect::<Result<Vec<_>>>()?
            },
            true => sorted_files(&shards_dir).await?,
        };
        for path in &paths {
            fs::metadata(path).await.map_err(|e| ErrorKind::from_io(e, path))?;
        }
        Ok(Box::pin(io::concat_files(paths)))
    }
}

/// The change an extraction write makes at one level, given what the
/// replaced extraction (if any) measures now against the current hash.
///
/// A source write rebuilds the file manifest without its extractions, so a
/// stale previous extraction is only held by the file manifest once a
/// reconcile has counted it. Ancestors keep the previous extraction as it was
/// bubbled at write time (active) until a reconcile reclassifies it.
/// `reconciled` is true when the file has been reconciled since its last
/// source write.
fn replacement_delta(level: Level, added: UsageDelta, previous: Option<Tally>, reconciled: bool) -> UsageDelta {
    let Some(previous) = previous else {
        return added;
    };
    let bound = previous.active_files > 0;
    let held = match (level, bound || reconciled) {
        (_, true) => previous,
        (Level::File, false) => Tally::default(),
        (Level::Library | Level::Workspace, false) => Tally::active(previous.physical_bytes, previous.total_files),
    };
    added - UsageDelta::from(held)
}

/// Fill the temp directory: content first, `metadata.json` last.
async fn build(
    temp: &Path,
    method: &str,
    hash: &str,
    payload: Payload,
    options: ExtractionOptions,
) -> Result<ExtractionMetadata> {
    let (output, size_bytes) = match payload {
        Payload::Single(mut content) => {
            let written = io::stream_to_file(&mut content, &temp.join(OUTPUT_FILE)).await?;
            let output = ExtractionOutput {
                main_file: OUTPUT_FILE.to_string(),
                is_sharded: false,
                shard_count: 0,
                total_rows: options.total_rows,
                shards: Vec::new(),
            };
            (output, written.bytes)
        },
        Payload::Sharded(contents) => {
            let dir = temp.join(SHARDS_DIR);
            fs::create_dir(&dir).await.map_err(|e| ErrorKind::from_io(e, &dir))?;
            let mut shards = Vec::with_capacity(contents.len());
            for (index, mut content) in (0u32..).zip(contents) {
                let name = shard_file_name(index);
                let written = io::stream_to_file(&mut content, &dir.join(&name)).await?;
                shards.push(Shard {
                    index,
                    file: name,
                    size_bytes: written.bytes,
                });
            }
            let size = shards.iter().map(|shard| shard.size_bytes).sum();
            let output = ExtractionOutput {
                main_file: format!("{SHARDS_DIR}/{}", shard_file_name(0)),
                is_sharded: true,
                shard_count: shards.len() as u32,
                total_rows: options.total_rows,
                shards,
            };
            (output, size)
        },
    };
    let metadata = ExtractionMetadata {
        version: EXTRACTION_METADATA_VERSION,
        method_id: method.to_string(),
        source_hash_at_execution: hash.to_string(),
        status: ExtractionStatus::Completed,
        executed_at: OffsetDateTime::now_utc(),
        config: options.config,
        output,
        error: None,
        size_bytes,
    };
    manifest::write(&temp.join(METADATA_FILE), &metadata).await?;
    Ok(metadata)
}

/// Zero-padded so that lexicographic order matches index order for readers
/// that only look at file names.
pub(crate) fn shard_file_name(index: u32) -> String {
    format!("{index:05}.md")
}

/// What an extraction directory contributes to its file's usage.
///
/// Every regular file counts toward the totals; `metadata.json` counts as a
/// file but not as bytes. Counted as active only if the extraction's
/// metadata binds it to `current_hash`; unreadable metadata counts as stale.
pub(crate) async fn extraction_usage(dir: &Path, current_hash: Option<&str>, concurrency: usize) -> Result<Tally> {
    let stats = walk::folder_stats(dir, concurrency).await?;
    let metadata_path = dir.join(METADATA_FILE);
    let metadata_bytes = match fs::metadata(&metadata_path).await {
        Ok(m) if m.is_file() => m.len(),
        _ => 0,
    };
    let bytes = stats.bytes.saturating_sub(metadata_bytes);
    let active = match current_hash {
        Some(hash) => match manifest::read::<ExtractionMetadata>(&metadata_path).await {
            Ok(metadata) => metadata.is_active_for(hash),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Unreadable extraction metadata; counting as stale");
                false
            },
        },
        None => false,
    };
    Ok(match active {
        true => Tally::active(bytes, stats.files),
        false => Tally::physical(bytes, stats.files),
    })
}

/// Rename `temp` to `target`, moving an existing `target` to `aside` first.
async fn swap(temp: &Path, target: &Path, aside: Option<&Path>) -> Result<()> {
    if let Some(aside) = aside
        && let Err(e) = fs::rename(target, aside).await
    {
        remove_best_effort(temp).await;
        exn::bail!(ErrorKind::from_io(e, target));
    }
    if let Err(e) = fs::rename(temp, target).await {
        if let Some(aside) = aside
            && let Err(restore) = fs::rename(aside, target).await
        {
            tracing::warn!(aside = %aside.display(), error = %restore, "Could not restore previous extraction");
        }
        remove_best_effort(temp).await;
        exn::bail!(ErrorKind::from_io(e, target));
    }
    if let Some(aside) = aside {
        remove_best_effort(aside).await;
    }
    Ok(())
}

async fn remove_best_effort(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(dir = %dir.display(), error = %e, "Could not remove extraction directory");
    }
}

/// Regular files directly inside `dir`, sorted by name.
async fn sorted_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir).await.map_err(|e| ErrorKind::from_io(e, dir))?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| ErrorKind::from_io(e, dir))? {
        let file_type = entry.file_type().await.map_err(|e| ErrorKind::from_io(e, &entry.path()))?;
        if file_type.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}
