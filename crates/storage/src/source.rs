//! Source Writer and Reader.

use crate::error::{ErrorKind, Result};
use crate::io::{self, ContentReader, ContentStream};
use crate::layout::{MANIFEST_FILE, SOURCE_FILE};
use crate::manifest;
use crate::models::{FileManifest, FileState, FileTransition, LibraryManifest, SourceMeta, SourceWrite, UsageDelta};
use crate::service::LocalStorage;
use std::path::Path;
use tokio::fs;

const SOURCE_TEMP_FILE: &str = "source.tmp";

impl LocalStorage {
    pub async fn get_file_manifest(&self, workspace: &str, library: &str, file: &str) -> Result<FileManifest> {
        manifest::read(&self.layout.file_dir(workspace, library, file)?.join(MANIFEST_FILE)).await
    }

    /// A file is [`Active`](FileState::Active) once it has a manifest; a
    /// missing manifest means [`Absent`](FileState::Absent). A manifest that
    /// exists but cannot be parsed is an error.
    pub async fn file_state(&self, workspace: &str, library: &str, file: &str) -> Result<FileState> {
        match self.get_file_manifest(workspace, library, file).await {
            Ok(manifest) => Ok(FileState::Active(Box::new(manifest))),
            Err(e) if e.is_not_found() => Ok(FileState::Absent),
            Err(e) => Err(e),
        }
    }

    /// Stream `content` into the file's `source`, hashing and counting in the
    /// same pass, then write a fresh file manifest and bubble the source size
    /// up to the library and workspace.
    ///
    /// Content lands in a temporary file first; a failed upload leaves any
    /// previous source and manifest as they were. The file manifest is
    /// rebuilt from scratch, so usage from existing extractions stays out of
    /// it until the next [`reconcile()`](crate::StorageService::reconcile).
    #[tracing::instrument(level = "debug", skip(self, content, meta), fields(name = %meta.original_name))]
    pub async fn write_source(
        &self,
        workspace: &str,
        library: &str,
        file: &str,
        mut content: ContentReader,
        meta: SourceMeta,
    ) -> Result<SourceWrite> {
        let dir = self.layout.file_dir(workspace, library, file)?;
        let library_dir = self.layout.library_dir(workspace, library)?;
        manifest::read::<LibraryManifest>(&library_dir.join(MANIFEST_FILE)).await?;

        let transition = match self.file_state(workspace, library, file).await {
            Ok(FileState::Absent) => FileTransition::Created,
            Ok(FileState::Active(_)) => FileTransition::Replaced,
            Err(e) if matches!(&*e, ErrorKind::CorruptManifest(_)) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Overwriting corrupt file manifest");
                FileTransition::Replaced
            },
            Err(e) => return Err(e),
        };

        // A file manifest can be lost while its directory and extractions
        // remain; cleanup must only remove what this upload created.
        let created_dir = !fs::try_exists(&dir).await.map_err(|e| ErrorKind::from_io(e, &dir))?;
        fs::create_dir_all(&dir).await.map_err(|e| ErrorKind::from_io(e, &dir))?;
        let temp = dir.join(SOURCE_TEMP_FILE);
        let written = match io::stream_to_file(&mut content, &temp).await {
            Ok(written) => written,
            Err(e) => {
                discard(&dir, &temp, created_dir).await;
                return Err(e);
            },
        };
        let target = dir.join(SOURCE_FILE);
        if let Err(e) = fs::rename(&temp, &target).await {
            discard(&dir, &temp, created_dir).await;
            exn::bail!(ErrorKind::from_io(e, &target));
        }
        tracing::debug!(path = %target.display(), bytes = written.bytes, hash = %written.hash, "Source written");

        let manifest = FileManifest::fresh(file, meta, written.hash, written.bytes, Self::now());
        self.ledger.replace(&dir.join(MANIFEST_FILE), &manifest).await?;
        self.ledger.apply_delta(&self.layout, &library_dir, UsageDelta::uniform(written.bytes, 1)).await?;

        match transition {
            FileTransition::Created => tracing::info!(workspace, library, file, bytes = written.bytes, "File created"),
            FileTransition::Replaced => tracing::info!(workspace, library, file, bytes = written.bytes, "Source replaced"),
        }
        Ok(SourceWrite { manifest, transition })
    }

    /// Stream the file's source content.
    ///
    /// Fails up front with [`NotFound`](ErrorKind::NotFound) if there is no
    /// readable source; errors while streaming are logged and yielded.
    pub async fn read_source(&self, workspace: &str, library: &str, file: &str) -> Result<ContentStream> {
        let path = self.layout.file_dir(workspace, library, file)?.join(SOURCE_FILE);
        let handle = io::open(&path).await?;
        Ok(Box::pin(io::file_chunks(handle, path)))
    }
}

/// Best-effort cleanup after a failed upload. A directory created by the
/// upload goes away entirely; otherwise only the temporary file does.
async fn discard(dir: &Path, temp: &Path, created_dir: bool) {
    let result = match created_dir {
        true => fs::remove_dir_all(dir).await,
        false => fs::remove_file(temp).await,
    };
    if let Err(e) = result
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %temp.display(), error = %e, "Could not clean up failed source upload");
    }
}
