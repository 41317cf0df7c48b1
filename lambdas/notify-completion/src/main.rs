//! TableSync Notify Completion Lambda
//!
//! Final step of the sync workflow. Posts the import outcome to the operator
//! channel; delivery problems are logged and never fail the workflow.

use lambda_runtime::{run, service_fn, Error as LambdaError, LambdaEvent};
use serde::Serialize;
use tablesync_core::notifier::{CompletionStatus, NotificationEvent};
use tablesync_core::{notifier_for, Notice};
use tracing::{error, info};

const STAGE_ENV: &str = "STAGE";
const DEFAULT_STAGE: &str = "test";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NotifyResponse {
    status: CompletionStatus,
    delivered: bool,
}

async fn handler(event: LambdaEvent<NotificationEvent>) -> Result<NotifyResponse, LambdaError> {
    let (payload, _context) = event.into_parts();
    let stage = std::env::var(STAGE_ENV).unwrap_or_else(|_| DEFAULT_STAGE.to_string());

    info!(
        status = ?payload.status,
        execution = payload.execution_arn.as_deref().unwrap_or("-"),
        "Sending completion notification"
    );
    if let Some(cause) = &payload.error {
        error!(cause = %cause, "Workflow reported an error");
    }

    let webhook_url = std::env::var("SLACK_WEBHOOK_URL").ok();
    let notifier = notifier_for(webhook_url.as_deref(), &stage);

    let delivered = match notifier.notify(Notice::Import(payload.status)).await {
        Ok(()) => true,
        Err(e) => {
            error!(error = %e, "Error sending notification");
            false
        }
    };

    Ok(NotifyResponse {
        status: payload.status,
        delivered,
    })
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
