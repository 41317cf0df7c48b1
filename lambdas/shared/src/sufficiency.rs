//! Data sufficiency estimate for a completed export
//!
//! A full scan of every file would cost as much as the load itself, so the
//! item count is extrapolated from a bounded prefix of the first few files.
//! The estimate only decides whether loading is skipped.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::codec::decode_line;
use crate::errors::Result;
use crate::export_store::{ExportStore, LineReader};
use crate::models::{DataEstimate, RecordFile};

/// Files sampled per export
pub const MAX_SAMPLED_FILES: usize = 3;

/// Decoded bytes sampled per file
pub const SAMPLE_BYTE_CAP: u64 = 50_000;

/// Floor for the sampled fraction of a file
pub const MIN_SAMPLE_RATIO: f64 = 0.01;

/// Items counted in one sampled file
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileSample {
    pub valid_items: u64,
    /// Fraction of the stored file covered by the sample
    pub ratio: f64,
}

impl FileSample {
    pub fn estimated_items(&self) -> u64 {
        (self.valid_items as f64 / self.ratio.max(MIN_SAMPLE_RATIO)).round() as u64
    }
}

/// Scale a sum over `sampled` files to `total` files
pub fn scale_to_all_files(sampled_sum: u64, sampled: usize, total: usize) -> u64 {
    if total <= sampled || sampled == 0 || sampled_sum == 0 {
        return sampled_sum;
    }
    let per_file = sampled_sum as f64 / sampled as f64;
    (per_file * total as f64).round() as u64
}

pub struct SufficiencyEstimator {
    store: Arc<dyn ExportStore>,
}

impl SufficiencyEstimator {
    pub fn new(store: Arc<dyn ExportStore>) -> Self {
        Self { store }
    }

    /// Estimate how many items the export holds
    pub async fn estimate(&self, table_name: &str, files: &[RecordFile]) -> DataEstimate {
        info!(table = %table_name, files = files.len(), "Checking backup data");

        if files.is_empty() {
            return DataEstimate::empty(format!("No backup files found for {}", table_name));
        }

        let sampled = files.len().min(MAX_SAMPLED_FILES);
        let mut sum = 0u64;

        for file in &files[..sampled] {
            match self.sample(file).await {
                Ok(sample) => {
                    let estimated = sample.estimated_items();
                    info!(
                        file = %file.key,
                        valid_items = sample.valid_items,
                        estimated,
                        "Sampled backup file"
                    );
                    sum += estimated;
                }
                Err(e) => error!(file = %file.key, error = %e, "Error checking data in file"),
            }
        }

        let total_items = scale_to_all_files(sum, sampled, files.len());
        if total_items == 0 {
            return DataEstimate::empty(format!(
                "No valid data items found in backup files for {}",
                table_name
            ));
        }

        info!(table = %table_name, total_items, "Backup data check completed");
        DataEstimate {
            has_data: true,
            total_items,
            message: format!(
                "Backup contains approximately {} data items for {}",
                total_items, table_name
            ),
        }
    }

    async fn sample(&self, file: &RecordFile) -> Result<FileSample> {
        let mut reader = LineReader::open(self.store.as_ref(), file)
            .await?
            .with_byte_cap(SAMPLE_BYTE_CAP);

        let mut lines = 0u64;
        let mut valid_items = 0u64;
        while let Some(line) = reader.next_line().await? {
            lines += 1;
            if decode_line(&line).is_ok_and(|record| !record.is_empty()) {
                valid_items += 1;
            }
        }

        if lines == 0 {
            warn!(file = %file.key, "File appears to be empty");
        }

        Ok(FileSample {
            valid_items,
            ratio: reader.consumed_ratio(),
        })
    }
}
