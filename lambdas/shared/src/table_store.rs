//! DynamoDB operations for the destination table
//!
//! The destination is addressed by table name only; every call names the
//! table explicitly so one client serves every migrated table.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, DeleteRequest, KeySchemaElement, KeyType, PutRequest, TableStatus,
    WriteRequest,
};
use aws_sdk_dynamodb::Client;
use tracing::warn;

use crate::codec::Item;
use crate::errors::{sdk_error, Error, Result};
use crate::retry::RetryPolicy;
use crate::schema::InferredSchema;

/// Maximum requests per batched write
pub const BATCH_WRITE_LIMIT: usize = 25;

/// Primary key of an item, key attributes only
pub type Key = Item;

/// Lifecycle state of a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableState {
    Creating,
    Active,
    Other(String),
}

/// Live description of an existing table
#[derive(Debug, Clone, PartialEq)]
pub struct TableDescription {
    pub name: String,
    /// Key attribute names, partition key first
    pub key_attributes: Vec<String>,
    pub state: TableState,
}

/// One page of a key-only scan
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub keys: Vec<Key>,
    /// Resume point; `None` on the last page
    pub last_evaluated_key: Option<Key>,
}

/// One request inside a batched write
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Put(Item),
    Delete(Key),
}

impl WriteOp {
    fn into_request(self) -> Result<WriteRequest> {
        let request = match self {
            WriteOp::Put(item) => WriteRequest::builder()
                .put_request(
                    PutRequest::builder()
                        .set_item(Some(item))
                        .build()
                        .map_err(|e| Error::Internal(e.to_string()))?,
                )
                .build(),
            WriteOp::Delete(key) => WriteRequest::builder()
                .delete_request(
                    DeleteRequest::builder()
                        .set_key(Some(key))
                        .build()
                        .map_err(|e| Error::Internal(e.to_string()))?,
                )
                .build(),
        };
        Ok(request)
    }

    fn from_request(request: WriteRequest) -> Option<Self> {
        match (request.put_request, request.delete_request) {
            (Some(put), _) => Some(WriteOp::Put(put.item)),
            (None, Some(delete)) => Some(WriteOp::Delete(delete.key)),
            (None, None) => None,
        }
    }
}

/// Destination table store
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Describe a table; `Ok(None)` only when it does not exist
    async fn describe_table(&self, table: &str) -> Result<Option<TableDescription>>;

    /// Create a table with a single partition key
    async fn create_table(&self, table: &str, schema: &InferredSchema) -> Result<()>;

    /// Scan one page projecting only `key_attributes`
    async fn scan_keys(
        &self,
        table: &str,
        key_attributes: &[String],
        start_key: Option<Key>,
        limit: i32,
    ) -> Result<ScanPage>;

    /// Issue one batched write of at most [`BATCH_WRITE_LIMIT`] requests.
    /// Returns the requests the store left unprocessed.
    async fn batch_write(&self, table: &str, ops: Vec<WriteOp>) -> Result<Vec<WriteOp>>;
}

/// Write one batch, re-submitting unprocessed requests with backoff
pub async fn write_batch(
    store: &dyn TableStore,
    table: &str,
    ops: Vec<WriteOp>,
    retry: &RetryPolicy,
) -> Result<()> {
    let mut pending = ops;
    let mut attempt = 0;

    loop {
        pending = store.batch_write(table, pending).await?;
        if pending.is_empty() {
            return Ok(());
        }
        if attempt >= retry.max_retries {
            return Err(Error::UnprocessedItems {
                table: table.to_string(),
                remaining: pending.len(),
            });
        }

        attempt += 1;
        let delay = retry.delay_for_attempt(attempt);
        warn!(
            table = %table,
            unprocessed = pending.len(),
            attempt,
            "Batch write left items unprocessed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// DynamoDB-backed table store
pub struct DynamoTableStore {
    client: Client,
}

impl DynamoTableStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TableStore for DynamoTableStore {
    async fn describe_table(&self, table: &str) -> Result<Option<TableDescription>> {
        let result = match self.client.describe_table().table_name(table).send().await {
            Ok(result) => result,
            Err(e)
                if e
                    .as_service_error()
                    .is_some_and(|se| se.is_resource_not_found_exception()) =>
            {
                return Ok(None)
            }
            Err(e) => return Err(sdk_error(e, Error::Database)),
        };

        let description = result
            .table
            .ok_or_else(|| Error::Database(format!("Table description not found for {}", table)))?;

        // Partition key first
        let mut key_schema: Vec<&KeySchemaElement> = description.key_schema().iter().collect();
        key_schema.sort_by_key(|element| element.key_type() != &KeyType::Hash);
        let key_attributes = key_schema
            .into_iter()
            .map(|element| element.attribute_name().to_string())
            .collect();

        let state = match description.table_status() {
            Some(TableStatus::Active) => TableState::Active,
            Some(TableStatus::Creating) => TableState::Creating,
            Some(other) => TableState::Other(other.as_str().to_string()),
            None => TableState::Other("UNKNOWN".to_string()),
        };

        Ok(Some(TableDescription {
            name: table.to_string(),
            key_attributes,
            state,
        }))
    }

    async fn create_table(&self, table: &str, schema: &InferredSchema) -> Result<()> {
        let attribute = AttributeDefinition::builder()
            .attribute_name(&schema.partition_key_name)
            .attribute_type(schema.partition_key_type.scalar_type())
            .build()
            .map_err(|e| Error::Internal(e.to_string()))?;

        let key = KeySchemaElement::builder()
            .attribute_name(&schema.partition_key_name)
            .key_type(KeyType::Hash)
            .build()
            .map_err(|e| Error::Internal(e.to_string()))?;

        self.client
            .create_table()
            .table_name(table)
            .attribute_definitions(attribute)
            .key_schema(key)
            .billing_mode(schema.billing_mode.clone())
            .send()
            .await
            .map_err(|e| sdk_error(e, Error::Database))?;

        Ok(())
    }

    async fn scan_keys(
        &self,
        table: &str,
        key_attributes: &[String],
        start_key: Option<Key>,
        limit: i32,
    ) -> Result<ScanPage> {
        // Key names can be reserved words ("key", "name"), so project through placeholders
        let placeholders: Vec<String> = (0..key_attributes.len())
            .map(|i| format!("#k{}", i))
            .collect();

        let mut request = self
            .client
            .scan()
            .table_name(table)
            .projection_expression(placeholders.join(", "))
            .set_exclusive_start_key(start_key)
            .limit(limit);
        for (placeholder, attribute) in placeholders.iter().zip(key_attributes) {
            request = request.expression_attribute_names(placeholder, attribute);
        }

        let result = request
            .send()
            .await
            .map_err(|e| sdk_error(e, Error::Database))?;

        Ok(ScanPage {
            keys: result.items.unwrap_or_default(),
            last_evaluated_key: result.last_evaluated_key.filter(|key| !key.is_empty()),
        })
    }

    async fn batch_write(&self, table: &str, ops: Vec<WriteOp>) -> Result<Vec<WriteOp>> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }

        let requests = ops
            .into_iter()
            .map(WriteOp::into_request)
            .collect::<Result<Vec<_>>>()?;

        let result = self
            .client
            .batch_write_item()
            .request_items(table, requests)
            .send()
            .await
            .map_err(|e| sdk_error(e, Error::Database))?;

        let unprocessed: Vec<WriteOp> = result
            .unprocessed_items
            .and_then(|mut items: HashMap<String, Vec<WriteRequest>>| items.remove(table))
            .unwrap_or_default()
            .into_iter()
            .filter_map(WriteOp::from_request)
            .collect();

        Ok(unprocessed)
    }
}
