//! Bulk load of export records into the destination table
//!
//! Each record file is streamed line by line and written in batches of
//! [`BATCH_WRITE_LIMIT`]. Files load concurrently up to a fixed bound; a file
//! that fails is reported and does not stop the others.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::codec::decode_line;
use crate::errors::Result;
use crate::export_store::{ExportStore, LineReader};
use crate::models::RecordFile;
use crate::retry::RetryPolicy;
use crate::table_store::{write_batch, TableStore, WriteOp, BATCH_WRITE_LIMIT};

/// Record files loaded at the same time
pub const DEFAULT_LOAD_CONCURRENCY: usize = 4;

/// Totals for one table load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSummary {
    /// Items written by files that loaded completely
    pub items_processed: u64,
    pub files_loaded: usize,
    pub files_failed: usize,
}

pub struct BulkLoader {
    exports: Arc<dyn ExportStore>,
    tables: Arc<dyn TableStore>,
    concurrency: usize,
    retry: RetryPolicy,
}

impl BulkLoader {
    pub fn new(exports: Arc<dyn ExportStore>, tables: Arc<dyn TableStore>) -> Self {
        Self {
            exports,
            tables,
            concurrency: DEFAULT_LOAD_CONCURRENCY,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Load every file into `table`.
    ///
    /// A file that fails is counted and skipped. If any file failed because
    /// the destination was unreachable, that error is returned instead.
    pub async fn load_files(&self, files: &[RecordFile], table: &str) -> Result<LoadSummary> {
        info!(table = %table, files = files.len(), concurrency = self.concurrency, "Loading record files");

        let outcomes: Vec<(&RecordFile, Result<u64>)> = stream::iter(files)
            .map(|file| async move { (file, self.load_file(file, table).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut summary = LoadSummary::default();
        let mut unreachable = None;
        for (file, outcome) in outcomes {
            match outcome {
                Ok(items) => {
                    summary.items_processed += items;
                    summary.files_loaded += 1;
                }
                Err(e) => {
                    error!(file = %file.key, table = %table, error = %e, code = e.code(), "Error processing file");
                    summary.files_failed += 1;
                    if e.is_unreachable() && unreachable.is_none() {
                        unreachable = Some(e);
                    }
                }
            }
        }
        if let Some(e) = unreachable {
            return Err(e);
        }

        info!(
            table = %table,
            items = summary.items_processed,
            loaded = summary.files_loaded,
            failed = summary.files_failed,
            "Load finished"
        );
        Ok(summary)
    }

    /// Stream one file into `table`, returning the number of items written.
    ///
    /// Batches are written in file order. A decode or write failure aborts
    /// the file; batches already written stay in the table.
    pub async fn load_file(&self, file: &RecordFile, table: &str) -> Result<u64> {
        debug!(file = %file.key, table = %table, "Processing file");

        let mut reader = LineReader::open(self.exports.as_ref(), file).await?;
        let mut batch = Vec::with_capacity(BATCH_WRITE_LIMIT);
        let mut written = 0u64;

        while let Some(line) = reader.next_line().await? {
            let record = decode_line(&line)?;
            if record.is_empty() {
                debug!(file = %file.key, "Skipping record without attributes");
                continue;
            }
            batch.push(WriteOp::Put(record.into_item()));
            if batch.len() == BATCH_WRITE_LIMIT {
                written += self.flush(table, &mut batch).await?;
            }
        }
        if !batch.is_empty() {
            written += self.flush(table, &mut batch).await?;
        }

        debug!(file = %file.key, items = written, "File loaded");
        Ok(written)
    }

    async fn flush(&self, table: &str, batch: &mut Vec<WriteOp>) -> Result<u64> {
        let ops = std::mem::replace(batch, Vec::with_capacity(BATCH_WRITE_LIMIT));
        let count = ops.len() as u64;
        write_batch(self.tables.as_ref(), table, ops, &self.retry).await?;
        Ok(count)
    }
}
