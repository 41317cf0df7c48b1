//! Suspension of DynamoDB stream consumers during a load
//!
//! Bulk writes into a destination table would otherwise be replayed by every
//! Lambda consuming its stream. The gate disables the stage's DynamoDB event
//! source mappings before a run and re-enables them afterwards.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_lambda::types::EventSourceMappingConfiguration;
use aws_sdk_lambda::Client;
use futures::future::{join_all, BoxFuture};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::errors::{sdk_error, Error, Result};

const STATE_ENABLED: &str = "Enabled";
const STATE_DISABLED: &str = "Disabled";

/// Requested change to the event source mappings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateAction {
    Disable,
    Enable,
}

impl GateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateAction::Disable => "disable",
            GateAction::Enable => "enable",
        }
    }
}

/// Input of the manage-event-sources function
#[derive(Debug, Clone, Deserialize)]
pub struct ManageEventSourcesInput {
    pub action: GateAction,
}

/// State of one mapping after the action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingState {
    #[serde(rename = "UUID")]
    pub uuid: String,
    #[serde(rename = "State")]
    pub state: String,
}

/// Outcome of a suspend or resume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateReport {
    pub action: GateAction,
    pub processed_mappings: Vec<MappingState>,
    pub total_mappings: usize,
    /// Mappings whose update request failed
    #[serde(default)]
    pub failed_mappings: usize,
}

/// Suspends and resumes stream consumers of the target stage
#[async_trait]
pub trait StreamGate: Send + Sync {
    async fn suspend(&self) -> Result<GateReport>;

    async fn resume(&self) -> Result<GateReport>;
}

type GateHandler = for<'a> fn(&'a dyn StreamGate) -> BoxFuture<'a, Result<GateReport>>;

fn suspend_handler(gate: &dyn StreamGate) -> BoxFuture<'_, Result<GateReport>> {
    gate.suspend()
}

fn resume_handler(gate: &dyn StreamGate) -> BoxFuture<'_, Result<GateReport>> {
    gate.resume()
}

/// Routes a [`GateAction`] to the gate operation that performs it
pub struct GateDispatcher {
    handlers: HashMap<GateAction, GateHandler>,
}

impl GateDispatcher {
    pub fn new() -> Self {
        let mut handlers: HashMap<GateAction, GateHandler> = HashMap::new();
        handlers.insert(GateAction::Disable, suspend_handler);
        handlers.insert(GateAction::Enable, resume_handler);
        Self { handlers }
    }

    pub async fn dispatch(&self, gate: &dyn StreamGate, action: GateAction) -> Result<GateReport> {
        let handler = self
            .handlers
            .get(&action)
            .ok_or_else(|| Error::Internal(format!("No handler for action {}", action.as_str())))?;
        handler(gate).await
    }
}

impl Default for GateDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Gate over Lambda event source mappings
pub struct LambdaStreamGate {
    client: Client,
    stage: String,
}

impl LambdaStreamGate {
    pub fn new(client: Client, stage: impl Into<String>) -> Self {
        Self {
            client,
            stage: stage.into(),
        }
    }

    /// DynamoDB stream mappings belonging to this stage
    async fn stage_mappings(&self) -> Result<Vec<EventSourceMappingConfiguration>> {
        let mut mappings = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let page = self
                .client
                .list_event_source_mappings()
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| sdk_error(e, Error::EventSource))?;

            mappings.extend(
                page.event_source_mappings
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|mapping| is_stage_stream(mapping.event_source_arn(), &self.stage)),
            );

            match page.next_marker {
                Some(next) if !next.is_empty() => marker = Some(next),
                _ => break,
            }
        }

        info!(stage = %self.stage, count = mappings.len(), "Found DynamoDB event source mappings");
        Ok(mappings)
    }

    async fn set_enabled(&self, uuid: &str, enabled: bool) -> Result<()> {
        self.client
            .update_event_source_mapping()
            .uuid(uuid)
            .enabled(enabled)
            .send()
            .await
            .map_err(|e| sdk_error(e, Error::EventSource))?;
        Ok(())
    }

    async fn apply(&self, action: GateAction) -> Result<GateReport> {
        let mappings = self.stage_mappings().await?;
        let enabled = action == GateAction::Enable;
        let target_state = if enabled { STATE_ENABLED } else { STATE_DISABLED };

        let updates = mappings.iter().map(|mapping| async move {
            let uuid = mapping.uuid().unwrap_or_default().to_string();
            let current = mapping.state().unwrap_or(STATE_DISABLED).to_string();

            // Disabling only touches mappings that are currently on
            if !enabled && current != STATE_ENABLED {
                return (MappingState { uuid, state: current }, true);
            }

            match self.set_enabled(&uuid, enabled).await {
                Ok(()) => {
                    info!(uuid = %uuid, action = action.as_str(), "Updated event source mapping");
                    (MappingState { uuid, state: target_state.to_string() }, true)
                }
                Err(e) => {
                    error!(uuid = %uuid, action = action.as_str(), error = %e, "Error updating event source mapping");
                    (MappingState { uuid, state: current }, false)
                }
            }
        });

        let outcomes = join_all(updates).await;
        let failed_mappings = outcomes.iter().filter(|(_, ok)| !ok).count();

        Ok(GateReport {
            action,
            total_mappings: mappings.len(),
            processed_mappings: outcomes.into_iter().map(|(state, _)| state).collect(),
            failed_mappings,
        })
    }
}

#[async_trait]
impl StreamGate for LambdaStreamGate {
    async fn suspend(&self) -> Result<GateReport> {
        self.apply(GateAction::Disable).await
    }

    async fn resume(&self) -> Result<GateReport> {
        self.apply(GateAction::Enable).await
    }
}

/// Whether an event source ARN is a DynamoDB stream of `stage`
pub fn is_stage_stream(event_source_arn: Option<&str>, stage: &str) -> bool {
    event_source_arn.is_some_and(|arn| arn.contains("dynamodb") && arn.contains(stage))
}
