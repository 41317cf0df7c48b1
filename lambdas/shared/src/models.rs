//! Domain models for TableSync
//!
//! These types describe one export run and what the pipeline reports about it:
//! - Export locations: where a table export was written
//! - Record files: the individual chunks of an export
//! - Check outcomes: completeness and data sufficiency
//! - Migration results: the terminal outcome per table

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Suffix marking a gzip-compressed record file
pub const COMPRESSED_SUFFIX: &str = ".gz";

/// One export run for one source table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportLocation {
    /// Source table name (source stage naming)
    pub table_name: String,
    /// Object key prefix the export was written under
    pub s3_prefix: String,
    /// ARN of the export job
    #[serde(default)]
    pub export_arn: String,
    /// When the export was triggered
    pub timestamp: DateTime<Utc>,
}

/// One chunk of an export
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordFile {
    pub key: String,
    pub compressed: bool,
}

impl RecordFile {
    /// Compression is decided purely by the key suffix
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        let compressed = key.ends_with(COMPRESSED_SUFFIX);
        Self { key, compressed }
    }
}

/// Outcome of the completeness check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionCheck {
    pub is_complete: bool,
    pub message: String,
}

impl CompletionCheck {
    pub fn complete(message: impl Into<String>) -> Self {
        Self {
            is_complete: true,
            message: message.into(),
        }
    }

    pub fn incomplete(message: impl Into<String>) -> Self {
        Self {
            is_complete: false,
            message: message.into(),
        }
    }
}

/// Outcome of the data sufficiency estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataEstimate {
    pub has_data: bool,
    /// Extrapolated item count, approximate
    pub total_items: u64,
    pub message: String,
}

impl DataEstimate {
    pub fn empty(message: impl Into<String>) -> Self {
        Self {
            has_data: false,
            total_items: 0,
            message: message.into(),
        }
    }
}

/// Terminal status of one table migration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Success,
    Failed,
}

/// Result of migrating one table, produced once per invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationResult {
    pub table_name: String,
    pub status: MigrationStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_processed: Option<u64>,
}

impl MigrationResult {
    pub fn success(table_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            status: MigrationStatus::Success,
            message: message.into(),
            items_processed: None,
        }
    }

    pub fn failed(table_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            status: MigrationStatus::Failed,
            message: message.into(),
            items_processed: None,
        }
    }

    pub fn with_items(mut self, items: u64) -> Self {
        self.items_processed = Some(items);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == MigrationStatus::Success
    }
}

/// Detail of the `table-backup-initiated` event published by the export side
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEventDetail {
    #[serde(default)]
    pub total_tables: u32,
    #[serde(default)]
    pub successful: u32,
    #[serde(default)]
    pub failed: u32,
    /// One entry per exported table
    #[serde(default)]
    pub results: Vec<ExportLocation>,
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_stages: Option<Vec<String>>,
}

impl BackupEventDetail {
    /// Whether the event addresses the given deployment stage
    pub fn targets(&self, stage: &str) -> bool {
        match &self.target_stages {
            Some(stages) => stages.iter().any(|s| s == stage),
            None => true,
        }
    }
}
