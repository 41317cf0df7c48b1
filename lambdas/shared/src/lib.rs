//! TableSync Core Library
//!
//! Shared functionality for the TableSync Lambda functions including:
//! - Domain models and the export record codec
//! - S3 export access and DynamoDB table operations
//! - The per-table migration pipeline and the sync workflow around it
//! - Stream consumer suspension and operator notifications
//! - Error types and configuration

pub mod codec;
pub mod completion;
pub mod config;
pub mod errors;
pub mod export_store;
pub mod loader;
pub mod models;
pub mod name_mapper;
pub mod notifier;
pub mod orchestrator;
pub mod provisioner;
pub mod retry;
pub mod schema;
pub mod stream_gate;
pub mod sufficiency;
pub mod table_store;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use config::{AwsClients, SyncConfig};
pub use errors::{Error, Result};
pub use export_store::{ExportStore, S3ExportStore};
pub use models::*;
pub use notifier::{notifier_for, notify_quietly, Notice, Notifier};
pub use orchestrator::MigrationOrchestrator;
pub use stream_gate::{GateAction, GateDispatcher, LambdaStreamGate, StreamGate};
pub use table_store::{DynamoTableStore, TableStore};
pub use workflow::{SyncOutcome, SyncWorkflow};
