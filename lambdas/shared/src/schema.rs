//! Key schema inference from export content
//!
//! The destination schema is never known up front. It is derived from the
//! first record of the first export file: a well-known identifier name if one
//! is present, otherwise the first field. Inference never fails; it degrades to
//! a default `id` string key and says so in [`SchemaInference::fallback`].

use aws_sdk_dynamodb::types::{AttributeValue, BillingMode, ScalarAttributeType};
use serde::Serialize;
use tracing::{info, warn};

use crate::codec::{decode_line, Record};
use crate::export_store::{ExportStore, LineReader};
use crate::models::RecordFile;

/// Field names tried as partition key, in priority order
pub const PARTITION_KEY_CANDIDATES: [&str; 7] =
    ["id", "refId", "pk", "userId", "itemId", "key", "hashKey"];

pub const DEFAULT_PARTITION_KEY: &str = "id";

/// Largest decoded prefix read while looking for the first record
pub const FIRST_RECORD_BYTE_CAP: u64 = 1024 * 1024;

/// Scalar type of a key attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KeyAttributeType {
    S,
    N,
    B,
}

impl KeyAttributeType {
    /// Type of the populated variant; anything but N or B counts as S
    pub fn of(value: &AttributeValue) -> Self {
        match value {
            AttributeValue::N(_) => KeyAttributeType::N,
            AttributeValue::B(_) => KeyAttributeType::B,
            _ => KeyAttributeType::S,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAttributeType::S => "S",
            KeyAttributeType::N => "N",
            KeyAttributeType::B => "B",
        }
    }

    pub fn scalar_type(&self) -> ScalarAttributeType {
        match self {
            KeyAttributeType::S => ScalarAttributeType::S,
            KeyAttributeType::N => ScalarAttributeType::N,
            KeyAttributeType::B => ScalarAttributeType::B,
        }
    }
}

/// Flat destination schema: one partition key, no sort key
#[derive(Debug, Clone, PartialEq)]
pub struct InferredSchema {
    pub partition_key_name: String,
    pub partition_key_type: KeyAttributeType,
    pub billing_mode: BillingMode,
}

impl InferredSchema {
    pub fn new(partition_key_name: impl Into<String>, partition_key_type: KeyAttributeType) -> Self {
        Self {
            partition_key_name: partition_key_name.into(),
            partition_key_type,
            billing_mode: BillingMode::PayPerRequest,
        }
    }
}

impl Default for InferredSchema {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITION_KEY, KeyAttributeType::S)
    }
}

/// Why inference did not use a well-known key name
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaFallback {
    /// No candidate name present, first field used
    FirstField,
    /// Nothing usable, default schema used
    Default { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaInference {
    pub schema: InferredSchema,
    pub fallback: Option<SchemaFallback>,
}

impl SchemaInference {
    pub fn used_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    fn default_with(reason: impl Into<String>) -> Self {
        Self {
            schema: InferredSchema::default(),
            fallback: Some(SchemaFallback::Default {
                reason: reason.into(),
            }),
        }
    }
}

/// Infer the key schema from one sample record
pub fn infer_schema(record: &Record) -> SchemaInference {
    if let Some(name) = PARTITION_KEY_CANDIDATES
        .iter()
        .find(|name| record.contains(name))
    {
        let key_type = record
            .get(name)
            .map(KeyAttributeType::of)
            .unwrap_or(KeyAttributeType::S);
        info!(key = %name, key_type = key_type.as_str(), "Detected partition key");
        return SchemaInference {
            schema: InferredSchema::new(*name, key_type),
            fallback: None,
        };
    }

    match record.first_field() {
        Some((name, value)) => {
            warn!(key = %name, "No common partition key found, using first attribute");
            SchemaInference {
                schema: InferredSchema::new(name, KeyAttributeType::of(value)),
                fallback: Some(SchemaFallback::FirstField),
            }
        }
        None => {
            warn!("Sample record has no attributes, using default 'id' key");
            SchemaInference::default_with("sample record has no attributes")
        }
    }
}

/// Infer the key schema from the first record of `file`.
///
/// Read and decode failures fall back to the default schema.
pub async fn infer_from_file(store: &dyn ExportStore, file: &RecordFile) -> SchemaInference {
    info!(file = %file.key, "Reading table structure");

    let first_line = match LineReader::open(store, file).await {
        Ok(reader) => {
            let mut reader = reader.with_byte_cap(FIRST_RECORD_BYTE_CAP);
            reader.next_line().await
        }
        Err(e) => Err(e),
    };

    let line = match first_line {
        Ok(Some(line)) => line,
        Ok(None) => {
            warn!(file = %file.key, "No data found in record file, using default 'id' key");
            return SchemaInference::default_with(format!("no data found in {}", file.key));
        }
        Err(e) => {
            warn!(file = %file.key, error = %e, "Error reading table structure, using default 'id' key");
            return SchemaInference::default_with(e.to_string());
        }
    };

    match decode_line(&line) {
        Ok(record) => infer_schema(&record),
        Err(e) => {
            warn!(file = %file.key, error = %e, "First record unreadable, using default 'id' key");
            SchemaInference::default_with(e.to_string())
        }
    }
}
