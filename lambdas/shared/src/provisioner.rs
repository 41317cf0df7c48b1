//! Destination table provisioning
//!
//! Before a load the destination must exist and be empty:
//! - An existing table is cleared page by page, its key schema untouched
//! - A missing table is created from the inferred schema and polled until active
//!
//! Running provisioning twice on the same table leaves it in the same state.

use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{Stream, TryStreamExt};
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::errors::{Error, Result};
use crate::export_store::ExportStore;
use crate::models::RecordFile;
use crate::retry::RetryPolicy;
use crate::schema::{infer_from_file, SchemaInference};
use crate::table_store::{write_batch, Key, TableState, TableStore, WriteOp};

/// Keys fetched per scan page while clearing
pub const CLEAR_PAGE_SIZE: i32 = 25;

/// Upper bound on waiting for a new table to become active
pub const CREATION_TIMEOUT: Duration = Duration::from_secs(300);

pub const ACTIVE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// What provisioning did to the destination table
#[derive(Debug, Clone, PartialEq)]
pub enum Provisioned {
    /// Table existed and was emptied
    Cleared { deleted: u64 },
    /// Table was created from an inferred schema
    Created { inference: SchemaInference },
}

/// Lazy stream of key pages for `table`, starting after `start_key`.
///
/// Each page is fetched only when the previous one has been consumed, so a
/// caller that deletes as it goes never holds more than one page. A run that
/// failed part way can be resumed by passing the last key it saw.
pub fn key_pages<'a>(
    store: &'a dyn TableStore,
    table: &'a str,
    key_attributes: &'a [String],
    start_key: Option<Key>,
    page_size: i32,
) -> impl Stream<Item = Result<Vec<Key>>> + Send + 'a {
    // Outer None: no pages left. Inner None: first page.
    futures::stream::try_unfold(Some(start_key), move |cursor| async move {
        let Some(start_key) = cursor else {
            return Ok(None);
        };
        let page = store
            .scan_keys(table, key_attributes, start_key, page_size)
            .await?;
        let next = page.last_evaluated_key.map(Some);
        Ok(Some((page.keys, next)))
    })
}

/// Makes a destination table exist and hold no items
pub struct TableProvisioner {
    tables: Arc<dyn TableStore>,
    exports: Arc<dyn ExportStore>,
    retry: RetryPolicy,
    creation_timeout: Duration,
    poll_interval: Duration,
}

impl TableProvisioner {
    pub fn new(tables: Arc<dyn TableStore>, exports: Arc<dyn ExportStore>) -> Self {
        Self {
            tables,
            exports,
            retry: RetryPolicy::default(),
            creation_timeout: CREATION_TIMEOUT,
            poll_interval: ACTIVE_POLL_INTERVAL,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_creation_timeout(mut self, creation_timeout: Duration, poll_interval: Duration) -> Self {
        self.creation_timeout = creation_timeout;
        self.poll_interval = poll_interval;
        self
    }

    /// Clear `table` if it exists, otherwise create it from the first of `files`.
    ///
    /// Only a definite "table does not exist" leads to creation; any other
    /// describe failure is returned as is.
    pub async fn ensure_empty(&self, table: &str, files: &[RecordFile]) -> Result<Provisioned> {
        match self.tables.describe_table(table).await? {
            Some(description) => {
                info!(table = %table, "Table exists, clearing data");
                if description.key_attributes.is_empty() {
                    return Err(Error::MissingKeySchema(table.to_string()));
                }
                let deleted = self.clear(table, &description.key_attributes).await?;
                info!(table = %table, deleted, "Table cleared");
                Ok(Provisioned::Cleared { deleted })
            }
            None => {
                info!(table = %table, "Table does not exist, creating from backup structure");
                let inference = self.create(table, files).await?;
                Ok(Provisioned::Created { inference })
            }
        }
    }

    async fn clear(&self, table: &str, key_attributes: &[String]) -> Result<u64> {
        let mut pages = pin!(key_pages(
            self.tables.as_ref(),
            table,
            key_attributes,
            None,
            CLEAR_PAGE_SIZE
        ));

        let mut deleted = 0u64;
        while let Some(items) = pages.try_next().await? {
            if items.is_empty() {
                continue;
            }
            let ops: Vec<WriteOp> = items
                .into_iter()
                .map(|item| WriteOp::Delete(key_of(item, key_attributes)))
                .collect();
            let count = ops.len() as u64;
            write_batch(self.tables.as_ref(), table, ops, &self.retry).await?;
            deleted += count;
        }
        Ok(deleted)
    }

    async fn create(&self, table: &str, files: &[RecordFile]) -> Result<SchemaInference> {
        let first = files
            .first()
            .ok_or_else(|| Error::NoRecordFiles(format!("cannot infer schema for {}", table)))?;

        let inference = infer_from_file(self.exports.as_ref(), first).await;
        if let Some(fallback) = &inference.fallback {
            warn!(table = %table, fallback = ?fallback, "Schema inferred with fallback");
        }

        info!(
            table = %table,
            key = %inference.schema.partition_key_name,
            key_type = inference.schema.partition_key_type.as_str(),
            "Creating table"
        );
        self.tables.create_table(table, &inference.schema).await?;

        info!(table = %table, "Waiting for table to become active");
        timeout(self.creation_timeout, self.poll_until_active(table))
            .await
            .map_err(|_| Error::TableCreationTimeout {
                table: table.to_string(),
                waited_secs: self.creation_timeout.as_secs(),
            })??;

        info!(table = %table, "Table is active");
        Ok(inference)
    }

    async fn poll_until_active(&self, table: &str) -> Result<()> {
        loop {
            if let Some(description) = self.tables.describe_table(table).await? {
                if description.state == TableState::Active {
                    return Ok(());
                }
            }
            sleep(self.poll_interval).await;
        }
    }
}

/// Keep only the key attributes of a scanned item
fn key_of(mut item: Key, key_attributes: &[String]) -> Key {
    item.retain(|name, _| key_attributes.contains(name));
    item
}
