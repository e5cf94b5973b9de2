//! Workspace, library and file manifests.

use super::{Accountable, StorageStats, Versioned};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

pub const MANIFEST_VERSION: u32 = 1;

/// Manifest of a workspace or a library; both share one schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupManifest {
    pub version: u32,
    pub id: String,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(default = "empty_settings")]
    pub settings: Value,
    pub usage: StorageStats,
}
pub type WorkspaceManifest = GroupManifest;
pub type LibraryManifest = GroupManifest;

fn empty_settings() -> Value {
    Value::Object(Default::default())
}

impl GroupManifest {
    /// A freshly created entity with all-zero usage.
    pub fn new(id: impl Into<String>, name: impl Into<String>, settings: Option<Value>, now: OffsetDateTime) -> Self {
        Self {
            version: MANIFEST_VERSION,
            id: id.into(),
            name: name.into(),
            created_at: now,
            updated_at: now,
            settings: settings.unwrap_or_else(empty_settings),
            usage: StorageStats::empty(now),
        }
    }

    /// Apply a name/settings change; usage is never touched by an update.
    pub fn update(&mut self, update: GroupUpdate, now: OffsetDateTime) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(settings) = update.settings {
            self.settings = settings;
        }
        self.updated_at = now;
    }
}
impl Versioned for GroupManifest {
    const VERSION: u32 = MANIFEST_VERSION;
    fn version(&self) -> u32 {
        self.version
    }
}
impl Accountable for GroupManifest {
    fn usage(&self) -> &StorageStats {
        &self.usage
    }
    fn usage_mut(&mut self) -> &mut StorageStats {
        &mut self.usage
    }
}

/// Changes accepted by `update_workspace` and `update_library`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GroupUpdate {
    pub name: Option<String>,
    pub settings: Option<Value>,
}
pub type WorkspaceUpdate = GroupUpdate;
pub type LibraryUpdate = GroupUpdate;

/// File usage adds the size of the source blob to the shared counters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUsage {
    pub source_bytes: u64,
    #[serde(flatten)]
    pub stats: StorageStats,
}

/// Describes an uploaded source file; recorded on the file manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceMeta {
    pub original_name: String,
    pub original_updated_at: Option<OffsetDateTime>,
    pub mime_type: String,
}
impl SourceMeta {
    pub fn new(original_name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            original_name: original_name.into(),
            original_updated_at: None,
            mime_type: mime_type.into(),
        }
    }

    pub fn updated_at(mut self, at: OffsetDateTime) -> Self {
        self.original_updated_at = Some(at);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileManifest {
    pub version: u32,
    pub id: String,
    pub original_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
    pub original_updated_at: Option<OffsetDateTime>,
    pub mime_type: String,
    /// SHA-256 (lowercase hex) of the most recently written source content.
    /// The only field that decides whether an extraction is active or stale.
    pub current_source_hash: String,
    pub usage: FileUsage,
}
impl FileManifest {
    /// The manifest of a file whose only content is a freshly written source.
    pub fn fresh(id: impl Into<String>, meta: SourceMeta, hash: String, bytes: u64, now: OffsetDateTime) -> Self {
        let mut stats = StorageStats::empty(now);
        stats.apply(super::UsageDelta::uniform(bytes, 1), now);
        Self {
            version: MANIFEST_VERSION,
            id: id.into(),
            original_name: meta.original_name,
            original_updated_at: meta.original_updated_at,
            mime_type: meta.mime_type,
            current_source_hash: hash,
            usage: FileUsage { source_bytes: bytes, stats },
        }
    }
}
impl Versioned for FileManifest {
    const VERSION: u32 = MANIFEST_VERSION;
    fn version(&self) -> u32 {
        self.version
    }
}
impl Accountable for FileManifest {
    fn usage(&self) -> &StorageStats {
        &self.usage.stats
    }
    fn usage_mut(&mut self) -> &mut StorageStats {
        &mut self.usage.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fresh_file_manifest() {
        let meta = SourceMeta::new("report.pdf", "application/pdf");
        let manifest = FileManifest::fresh("f1", meta, "abc".to_string(), 100, OffsetDateTime::UNIX_EPOCH);
        assert_eq!(manifest.usage.source_bytes, 100);
        assert_eq!(manifest.usage.stats.active_bytes, 100);
        assert_eq!(manifest.usage.stats.physical_bytes, 100);
        assert_eq!(manifest.usage.stats.active_file_count, 1);
        assert_eq!(manifest.usage.stats.total_file_count, 1);
    }

    #[test]
    fn test_file_usage_is_flat_json() {
        let meta = SourceMeta::new("a.txt", "text/plain");
        let manifest = FileManifest::fresh("f1", meta, "abc".to_string(), 7, OffsetDateTime::UNIX_EPOCH);
        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["currentSourceHash"], "abc");
        assert_eq!(json["usage"]["sourceBytes"], 7);
        assert_eq!(json["usage"]["activeBytes"], 7);
        assert!(json.get("originalUpdatedAt").is_none());
    }

    #[test]
    fn test_group_update_keeps_usage() {
        let created = OffsetDateTime::UNIX_EPOCH;
        let mut manifest = GroupManifest::new("l1", "Contracts", None, created);
        let later = created + time::Duration::hours(1);
        manifest.update(
            GroupUpdate {
                name: Some("Legal".to_string()),
                settings: Some(json!({"ocr": true})),
            },
            later,
        );
        assert_eq!(manifest.name, "Legal");
        assert_eq!(manifest.settings, json!({"ocr": true}));
        assert_eq!(manifest.created_at, created);
        assert_eq!(manifest.updated_at, later);
        assert_eq!(manifest.usage, StorageStats::empty(created));
    }

    #[test]
    fn test_settings_default_to_empty_object() {
        let json = json!({
            "version": 1,
            "id": "w1",
            "name": "Acme",
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-01-01T00:00:00Z",
            "usage": {
                "activeBytes": 0,
                "physicalBytes": 0,
                "activeFileCount": 0,
                "totalFileCount": 0,
                "lastUpdated": "2024-01-01T00:00:00Z",
                "integrityState": "healthy"
            }
        });
        let manifest: GroupManifest = serde_json::from_value(json).unwrap();
        assert_eq!(manifest.settings, json!({}));
    }
}
