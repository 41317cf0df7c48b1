//! TableSync Manage Event Sources Lambda
//!
//! Disables or re-enables the DynamoDB stream triggers of the current stage
//! around a data import. Input: `{"action": "disable" | "enable"}`.

use lambda_runtime::{run, service_fn, Error as LambdaError, LambdaEvent};
use tablesync_core::stream_gate::{GateReport, ManageEventSourcesInput};
use tablesync_core::{
    notifier_for, notify_quietly, AwsClients, GateDispatcher, LambdaStreamGate, Notice,
};
use tracing::{error, info};

const STAGE_ENV: &str = "STAGE";
const DEFAULT_STAGE: &str = "test";

async fn handler(event: LambdaEvent<ManageEventSourcesInput>) -> Result<GateReport, LambdaError> {
    let (input, _context) = event.into_parts();
    let stage = std::env::var(STAGE_ENV).unwrap_or_else(|_| DEFAULT_STAGE.to_string());

    info!(action = input.action.as_str(), stage = %stage, "Managing event sources");

    let webhook_url = std::env::var("SLACK_WEBHOOK_URL").ok();
    let notifier = notifier_for(webhook_url.as_deref(), &stage);
    notify_quietly(notifier.as_ref(), Notice::Streams(input.action)).await;

    // Initialize AWS clients
    let clients = AwsClients::load().await;
    let gate = LambdaStreamGate::new(clients.lambda, &stage);

    match GateDispatcher::new().dispatch(&gate, input.action).await {
        Ok(report) => {
            info!(
                action = report.action.as_str(),
                total = report.total_mappings,
                failed = report.failed_mappings,
                "Event sources updated"
            );
            Ok(report)
        }
        Err(e) => {
            error!(error = %e, code = e.code(), "Error managing event sources");
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
