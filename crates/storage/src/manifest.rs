//! Typed, schema-checked manifest files.
//!
//! Writes go to `<path>.tmp` first and are renamed over the final path. The
//! rename is the durability boundary: a crash before it leaves the previous
//! manifest intact, never a half-written one.

use crate::error::{ErrorKind, Result};
use crate::models::Versioned;
use exn::ResultExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Load and parse a manifest.
///
/// Missing file: [`NotFound`](ErrorKind::NotFound). Anything that does not
/// parse against `T`, or carries another schema version:
/// [`CorruptManifest`](ErrorKind::CorruptManifest).
pub async fn read<T: DeserializeOwned + Versioned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).await.map_err(|e| ErrorKind::from_io(e, path))?;
    let manifest: T = serde_json::from_slice(&bytes).or_raise(|| ErrorKind::CorruptManifest(path.to_path_buf()))?;
    if manifest.version() != T::VERSION {
        tracing::warn!(path = %path.display(), found = manifest.version(), expected = T::VERSION, "Unsupported manifest version");
        exn::bail!(ErrorKind::CorruptManifest(path.to_path_buf()));
    }
    Ok(manifest)
}

/// Serialize and atomically replace a manifest.
///
/// A value that cannot be serialized fails with
/// [`Encode`](ErrorKind::Encode) before anything touches the disk.
pub async fn write<T: Serialize>(path: &Path, manifest: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(manifest).or_raise(|| ErrorKind::Encode(path.to_path_buf()))?;
    let temp = temp_path(path);
    if let Err(e) = write_synced(&temp, &json).await {
        discard(&temp).await;
        return Err(e);
    }
    if let Err(e) = fs::rename(&temp, path).await {
        discard(&temp).await;
        exn::bail!(ErrorKind::from_io(e, path));
    }
    tracing::trace!(path = %path.display(), bytes = json.len(), "Manifest written");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

async fn write_synced(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path).await.map_err(|e| ErrorKind::from_io(e, path))?;
    file.write_all(data).await.map_err(|e| ErrorKind::from_io(e, path))?;
    file.sync_all().await.map_err(|e| ErrorKind::from_io(e, path))?;
    Ok(())
}

/// Best-effort removal of a temp file after a failed write.
async fn discard(temp: &Path) {
    if let Err(e) = fs::remove_file(temp).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %temp.display(), error = %e, "Could not remove temporary manifest");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GroupManifest, MANIFEST_VERSION};
    use time::OffsetDateTime;

    fn manifest() -> GroupManifest {
        GroupManifest::new("w1", "Acme", None, OffsetDateTime::UNIX_EPOCH)
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        write(&path, &manifest()).await.unwrap();
        let loaded: GroupManifest = read(&path).await.unwrap();
        assert_eq!(loaded, manifest());
        assert!(!dir.path().join("manifest.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = read::<GroupManifest>(&dir.path().join("manifest.json")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        fs::write(&path, br#"{"id": "w1", "name": 12}"#).await.unwrap();
        let err = read::<GroupManifest>(&path).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::CorruptManifest(_)));
        fs::write(&path, b"{ truncated").await.unwrap();
        let err = read::<GroupManifest>(&path).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::CorruptManifest(_)));
    }

    #[tokio::test]
    async fn test_unknown_version_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let mut future = manifest();
        future.version = MANIFEST_VERSION + 1;
        write(&path, &future).await.unwrap();
        let err = read::<GroupManifest>(&path).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::CorruptManifest(_)));
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        write(&path, &manifest()).await.unwrap();
        // A directory squatting on the temp path makes the write fail.
        fs::create_dir(dir.path().join("manifest.json.tmp")).await.unwrap();
        let mut renamed = manifest();
        renamed.name = "Renamed".to_string();
        assert!(write(&path, &renamed).await.is_err());
        let loaded: GroupManifest = read(&path).await.unwrap();
        assert_eq!(loaded.name, "Acme");
    }

    struct Unencodable;
    impl Serialize for Unencodable {
        fn serialize<S: serde::Serializer>(&self, _serializer: S) -> std::result::Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("settings are not representable"))
        }
    }

    #[tokio::test]
    async fn test_unencodable_value_is_not_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        write(&path, &manifest()).await.unwrap();
        let err = write(&path, &Unencodable).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Encode(_)));
        assert!(!dir.path().join("manifest.json.tmp").exists());
        let loaded: GroupManifest = read(&path).await.unwrap();
        assert_eq!(loaded, manifest());
    }
}
