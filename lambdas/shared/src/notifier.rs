//! Operator notifications
//!
//! Messages go to a Slack incoming webhook when one is configured and to the
//! log otherwise. A failed notification never fails a migration; callers log
//! the error and move on.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::{Error, Result};
use crate::stream_gate::GateAction;

/// Overall outcome reported by the notify-completion function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionStatus {
    Success,
    Failed,
}

/// Input of the notify-completion function
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub status: CompletionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

/// Something operators should hear about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    SyncStarted { tables: Vec<String> },
    SyncSucceeded { tables: Vec<String>, total: usize },
    SyncFailed { succeeded: Vec<String>, failed: Vec<String> },
    Streams(GateAction),
    Import(CompletionStatus),
}

/// Slack message payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlackMessage {
    pub text: String,
}

impl Notice {
    /// Render as a Slack message for `stage`
    pub fn to_slack(&self, stage: &str) -> SlackMessage {
        let text = match self {
            Notice::SyncStarted { tables } => format!(
                ":arrows_counterclockwise: *{}* table sync started for {} tables\n{}",
                stage,
                tables.len(),
                bullet_list(tables)
            ),
            Notice::SyncSucceeded { tables, total } => format!(
                ":white_check_mark: *{}* table sync finished: {}/{} tables imported\n{}",
                stage,
                tables.len(),
                total,
                bullet_list(tables)
            ),
            Notice::SyncFailed { succeeded, failed } => format!(
                ":x: *{}* table sync finished with failures\nSucceeded ({}):\n{}\nFailed ({}):\n{}",
                stage,
                succeeded.len(),
                bullet_list(succeeded),
                failed.len(),
                bullet_list(failed)
            ),
            Notice::Streams(GateAction::Disable) => format!(
                ":double_vertical_bar: Disabling DynamoDB stream triggers in *{}*",
                stage
            ),
            Notice::Streams(GateAction::Enable) => format!(
                ":arrow_forward: Re-enabling DynamoDB stream triggers in *{}*",
                stage
            ),
            Notice::Import(CompletionStatus::Success) => {
                format!(":tada: *{}* data import completed", stage)
            }
            Notice::Import(CompletionStatus::Failed) => {
                format!(":rotating_light: *{}* data import failed, check the workflow logs", stage)
            }
        };
        SlackMessage { text }
    }
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "• none".to_string();
    }
    items
        .iter()
        .map(|item| format!("• {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Delivers notices to operators
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: Notice) -> Result<()>;
}

/// Posts notices to a Slack incoming webhook
pub struct SlackNotifier {
    http: reqwest::Client,
    webhook_url: String,
    stage: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            webhook_url: webhook_url.into(),
            stage: stage.into(),
        }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, notice: Notice) -> Result<()> {
        let response = self
            .http
            .post(&self.webhook_url)
            .json(&notice.to_slack(&self.stage))
            .send()
            .await
            .map_err(|e| Error::Notification(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Notification(format!("webhook returned {}: {}", status, body)));
        }
        Ok(())
    }
}

/// Writes notices to the log only
pub struct LogNotifier {
    stage: String,
}

impl LogNotifier {
    pub fn new(stage: impl Into<String>) -> Self {
        Self { stage: stage.into() }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: Notice) -> Result<()> {
        info!(notice = %notice.to_slack(&self.stage).text, "Notification");
        Ok(())
    }
}

/// Slack when a webhook is configured, the log otherwise
pub fn notifier_for(webhook_url: Option<&str>, stage: &str) -> Arc<dyn Notifier> {
    match webhook_url {
        Some(url) => Arc::new(SlackNotifier::new(url, stage)),
        None => {
            warn!("SLACK_WEBHOOK_URL not set, notifications go to the log only");
            Arc::new(LogNotifier::new(stage))
        }
    }
}

/// Send a notice, logging instead of failing
pub async fn notify_quietly(notifier: &dyn Notifier, notice: Notice) {
    if let Err(e) = notifier.notify(notice).await {
        warn!(error = %e, "Failed to send notification");
    }
}
