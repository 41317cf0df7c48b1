//! Export completeness check
//!
//! The export process is not ours, so "complete" is inferred: the marker object
//! exists, at least one record file is listed, and the first files start with
//! parseable JSON. The answer is advisory and never an error.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::errors::Result;
use crate::export_store::{ExportStore, LineReader};
use crate::models::{CompletionCheck, ExportLocation, RecordFile};

/// Marker object written next to the export data
pub const COMPLETION_MARKER: &str = "_started";

/// Record files whose first line is checked
pub const FILES_TO_VERIFY: usize = 2;

/// Decoded bytes read while looking for a file's first line
pub const FIRST_LINE_BYTE_CAP: u64 = 1024 * 1024;

pub fn marker_key(prefix: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), COMPLETION_MARKER)
}

pub struct CompletionVerifier {
    store: Arc<dyn ExportStore>,
}

impl CompletionVerifier {
    pub fn new(store: Arc<dyn ExportStore>) -> Self {
        Self { store }
    }

    /// Check whether the export at `location` is finished and readable
    pub async fn verify(&self, location: &ExportLocation) -> CompletionCheck {
        info!(
            table = %location.table_name,
            prefix = %location.s3_prefix,
            "Checking backup completion"
        );

        match self.check(location).await {
            Ok(check) => check,
            Err(e) => {
                error!(table = %location.table_name, error = %e, "Error checking backup completion");
                CompletionCheck::incomplete(format!("Error verifying backup completion: {}", e))
            }
        }
    }

    async fn check(&self, location: &ExportLocation) -> Result<CompletionCheck> {
        let table = &location.table_name;

        if !self.store.object_exists(&marker_key(&location.s3_prefix)).await? {
            return Ok(CompletionCheck::incomplete(format!(
                "Backup not yet started or completed for {} - missing completion marker",
                table
            )));
        }
        info!(table = %table, "Found completion marker");

        let files = self.store.list_record_files(&location.s3_prefix).await?;
        if files.is_empty() {
            return Ok(CompletionCheck::incomplete(format!(
                "Backup files not found for {} - export may still be in progress",
                table
            )));
        }

        for file in files.iter().take(FILES_TO_VERIFY) {
            if let Some(problem) = self.check_file(file).await {
                warn!(table = %table, file = %file.key, problem = %problem, "Backup file failed verification");
                return Ok(CompletionCheck::incomplete(problem));
            }
        }

        info!(table = %table, "Backup verification completed successfully");
        Ok(CompletionCheck::complete(format!(
            "Backup is complete and valid for {}",
            table
        )))
    }

    /// Describes what is wrong with `file`, if anything
    async fn check_file(&self, file: &RecordFile) -> Option<String> {
        let first_line = match LineReader::open(self.store.as_ref(), file).await {
            Ok(reader) => reader.with_byte_cap(FIRST_LINE_BYTE_CAP).next_line().await,
            Err(e) => Err(e),
        };

        match first_line {
            Ok(Some(line)) => match serde_json::from_str::<serde_json::Value>(&line) {
                Ok(_) => None,
                Err(_) => Some(format!(
                    "Backup file {} contains invalid data - export may be corrupted or incomplete",
                    file.key
                )),
            },
            Ok(None) => Some(format!(
                "Backup file {} appears to be empty - export may still be in progress",
                file.key
            )),
            Err(e) => Some(format!("Backup file {} could not be read: {}", file.key, e)),
        }
    }
}
