//! TableSync Process Backup Lambda
//!
//! Invoked once per exported table by the sync workflow. Migrates the export
//! into the target stage's table and returns the per-table result.

use std::sync::Arc;

use lambda_runtime::{run, service_fn, Error as LambdaError, LambdaEvent};
use tablesync_core::{
    AwsClients, DynamoTableStore, ExportLocation, MigrationOrchestrator, MigrationResult,
    S3ExportStore, SyncConfig,
};
use tracing::{error, info};

async fn handler(event: LambdaEvent<ExportLocation>) -> Result<MigrationResult, LambdaError> {
    let (location, _context) = event.into_parts();

    info!(
        table = %location.table_name,
        prefix = %location.s3_prefix,
        export_arn = %location.export_arn,
        "Processing backup file"
    );

    let config = SyncConfig::from_env()?;

    // Initialize AWS clients
    let clients = AwsClients::load().await;
    let exports = S3ExportStore::new(clients.s3, &config.backup_bucket).with_max_keys(config.list_max_keys);
    let tables = DynamoTableStore::new(clients.dynamodb);

    let orchestrator = MigrationOrchestrator::new(Arc::new(exports), Arc::new(tables), &config);

    match orchestrator.migrate(&location).await {
        Ok(result) => {
            info!(
                table = %result.table_name,
                status = ?result.status,
                items = ?result.items_processed,
                "Backup processed"
            );
            Ok(result)
        }
        Err(e) => {
            error!(table = %location.table_name, error = %e, code = e.code(), "Backup processing aborted");
            Err(e.into())
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), LambdaError> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    run(service_fn(handler)).await
}
