//! TableSync Sync Driver Lambda
//!
//! Triggered by the `table-backup-initiated` EventBridge event. Suspends the
//! stage's stream triggers, migrates every exported table, re-enables the
//! triggers and reports the outcome.

use std::sync::Arc;

use aws_lambda_events::event::eventbridge::EventBridgeEvent;
use lambda_runtime::{run, service_fn, Error as LambdaError, LambdaEvent};
use tablesync_core::{
    notifier_for, AwsClients, BackupEventDetail, DynamoTableStore, LambdaStreamGate,
    MigrationOrchestrator, S3ExportStore, SyncConfig, SyncOutcome, SyncWorkflow,
};
use tracing::{info, warn};

async fn handler(event: LambdaEvent<EventBridgeEvent<BackupEventDetail>>) -> Result<SyncOutcome, LambdaError> {
    let (payload, _context) = event.into_parts();
    let detail = payload.detail;
    let config = SyncConfig::from_env()?;

    info!(
        detail_type = %payload.detail_type,
        source_stage = %detail.stage,
        tables = detail.results.len(),
        exported_ok = detail.successful,
        exported_failed = detail.failed,
        "Received backup event"
    );

    if !detail.targets(&config.target_stage) {
        info!(stage = %config.target_stage, "Backup event not addressed to this stage, ignoring");
        return Ok(SyncOutcome::default());
    }
    if detail.stage != config.source_stage {
        warn!(
            event_stage = %detail.stage,
            configured = %config.source_stage,
            "Backup event comes from a different source stage than configured"
        );
    }

    // Initialize AWS clients
    let clients = AwsClients::load().await;
    let exports = S3ExportStore::new(clients.s3, &config.backup_bucket).with_max_keys(config.list_max_keys);
    let tables = DynamoTableStore::new(clients.dynamodb);
    let gate = LambdaStreamGate::new(clients.lambda, &config.target_stage);
    let notifier = notifier_for(config.slack_webhook_url.as_deref(), &config.target_stage);

    let orchestrator = MigrationOrchestrator::new(Arc::new(exports), Arc::new(tables), &config);
    let workflow = SyncWorkflow::new(Arc::new(orchestrator), Arc::new(gate), notifier)
        .with_table_concurrency(config.table_concurrency);

    let outcome = workflow.run(&detail.results).await?;
    info!(
        succeeded = outcome.succeeded.len(),
        failed = outcome.failed.len(),
        "Sync completed"
    );
    Ok(outcome)
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
