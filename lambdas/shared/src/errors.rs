//! Error types for TableSync

use aws_sdk_dynamodb::error::{DisplayErrorContext, SdkError};
use thiserror::Error;

/// Result type alias using TableSync Error
pub type Result<T> = std::result::Result<T, Error>;

/// TableSync error types
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid environment configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// S3 request failed
    #[error("Object store error: {0}")]
    ObjectStore(String),

    /// DynamoDB request failed
    #[error("Database error: {0}")]
    Database(String),

    /// Lambda event source mapping request failed
    #[error("Event source error: {0}")]
    EventSource(String),

    /// The remote service could not be reached at all
    #[error("Service unreachable: {0}")]
    Unreachable(String),

    /// A stored record line could not be decoded
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Gzip or UTF-8 decoding of an export file failed
    #[error("Decompression error: {0}")]
    Decompression(#[from] std::io::Error),

    /// No record files under an export prefix
    #[error("No record files found: {0}")]
    NoRecordFiles(String),

    /// Destination table reports no key schema
    #[error("No key attributes found for table {0}")]
    MissingKeySchema(String),

    /// Table did not become active in time
    #[error("Table {table} not active after {waited_secs}s")]
    TableCreationTimeout { table: String, waited_secs: u64 },

    /// Batch write left items unprocessed after all retries
    #[error("{remaining} items unprocessed for table {table}")]
    UnprocessedItems { table: String, remaining: usize },

    /// Operator notification could not be delivered
    #[error("Notification error: {0}")]
    Notification(String),

    /// JSON Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns a stable error code for results and logs
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "config_error",
            Error::ObjectStore(_) => "object_store_error",
            Error::Database(_) => "database_error",
            Error::EventSource(_) => "event_source_error",
            Error::Unreachable(_) => "unreachable",
            Error::InvalidRecord(_) => "invalid_record",
            Error::Decompression(_) => "decompression_error",
            Error::NoRecordFiles(_) => "no_record_files",
            Error::MissingKeySchema(_) => "missing_key_schema",
            Error::TableCreationTimeout { .. } => "table_creation_timeout",
            Error::UnprocessedItems { .. } => "unprocessed_items",
            Error::Notification(_) => "notification_error",
            Error::Serialization(_) => "serialization_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// True when the failure is transport-level rather than a rejected request.
    ///
    /// These escape the per-table result and reach the workflow driver.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Error::Unreachable(_))
    }
}

/// Converts an AWS SDK error, splitting transport faults from service errors.
///
/// `service` wraps the rendered message for the non-transport case.
pub(crate) fn sdk_error<E, R>(err: SdkError<E, R>, service: fn(String) -> Error) -> Error
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => Error::Unreachable(message),
        _ => service(message),
    }
}
