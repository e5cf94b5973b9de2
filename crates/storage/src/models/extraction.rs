//! Extraction `metadata.json`.

use super::Versioned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

pub const EXTRACTION_METADATA_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One shard of a sharded extraction. Reads order shards by `index`, never
/// by file name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shard {
    pub index: u32,
    /// File name inside the `shards/` directory.
    pub file: String,
    pub size_bytes: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionOutput {
    /// Path of the main output, relative to the extraction directory.
    pub main_file: String,
    pub is_sharded: bool,
    pub shard_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_rows: Option<u64>,
    /// Absent in metadata written before shard indices were recorded; such
    /// extractions fall back to file name order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shards: Vec<Shard>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionMetadata {
    pub version: u32,
    pub method_id: String,
    /// Source hash this extraction was produced from. Frozen at write time.
    pub source_hash_at_execution: String,
    pub status: ExtractionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub executed_at: OffsetDateTime,
    #[serde(default)]
    pub config: Value,
    pub output: ExtractionOutput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Content bytes (outputs and shards, not this metadata file).
    pub size_bytes: u64,
}
impl ExtractionMetadata {
    /// Active iff bound to the file's current source hash; otherwise stale.
    pub fn is_active_for(&self, current_source_hash: &str) -> bool {
        self.source_hash_at_execution == current_source_hash
    }
}
impl Versioned for ExtractionMetadata {
    const VERSION: u32 = EXTRACTION_METADATA_VERSION;
    fn version(&self) -> u32 {
        self.version
    }
}

/// Caller-provided details recorded alongside extracted content.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExtractionOptions {
    /// Method configuration, stored verbatim.
    pub config: Value,
    pub total_rows: Option<u64>,
}
