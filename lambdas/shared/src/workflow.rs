//! Sync workflow driver
//!
//! Runs one sync for every table named by a backup event:
//! 1. Announce the run and suspend the stage's stream consumers
//! 2. Migrate the tables, a few at a time
//! 3. Resume stream consumers, retrying with backoff, whatever happened in 2
//! 4. Report the outcome
//!
//! Stream consumers must never stay disabled after a run, so the resume step
//! also runs when suspension or migration failed.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info};

use crate::config::DEFAULT_TABLE_CONCURRENCY;
use crate::errors::{Error, Result};
use crate::models::{ExportLocation, MigrationResult};
use crate::notifier::{notify_quietly, CompletionStatus, Notice, Notifier};
use crate::orchestrator::MigrationOrchestrator;
use crate::retry::{with_retry, RetryPolicy};
use crate::stream_gate::{GateAction, GateReport, StreamGate};

/// Outcome of a full sync run
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub results: Vec<MigrationResult>,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

impl SyncOutcome {
    fn from_results(results: Vec<MigrationResult>) -> Self {
        let (succeeded, failed): (Vec<_>, Vec<_>) = results.iter().partition(|r| r.is_success());
        Self {
            succeeded: succeeded.into_iter().map(|r| r.table_name.clone()).collect(),
            failed: failed.into_iter().map(|r| r.table_name.clone()).collect(),
            results,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct SyncWorkflow {
    orchestrator: Arc<MigrationOrchestrator>,
    gate: Arc<dyn StreamGate>,
    notifier: Arc<dyn Notifier>,
    table_concurrency: usize,
    gate_retry: RetryPolicy,
}

impl SyncWorkflow {
    pub fn new(
        orchestrator: Arc<MigrationOrchestrator>,
        gate: Arc<dyn StreamGate>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            orchestrator,
            gate,
            notifier,
            table_concurrency: DEFAULT_TABLE_CONCURRENCY,
            gate_retry: RetryPolicy::for_stream_gate(),
        }
    }

    pub fn with_table_concurrency(mut self, table_concurrency: usize) -> Self {
        self.table_concurrency = table_concurrency.max(1);
        self
    }

    pub fn with_gate_retry(mut self, gate_retry: RetryPolicy) -> Self {
        self.gate_retry = gate_retry;
        self
    }

    pub async fn run(&self, exports: &[ExportLocation]) -> Result<SyncOutcome> {
        if exports.is_empty() {
            info!("No exported tables in event, nothing to sync");
            return Ok(SyncOutcome::default());
        }

        let tables: Vec<String> = exports.iter().map(|e| e.table_name.clone()).collect();
        info!(tables = tables.len(), "Starting table sync");
        notify_quietly(self.notifier.as_ref(), Notice::SyncStarted { tables }).await;

        notify_quietly(self.notifier.as_ref(), Notice::Streams(GateAction::Disable)).await;
        let migrated = match self.gate.suspend().await {
            Ok(report) => {
                info!(
                    mappings = report.total_mappings,
                    failed = report.failed_mappings,
                    "Stream consumers suspended"
                );
                self.migrate_all(exports).await
            }
            Err(e) => {
                error!(error = %e, "Failed to suspend stream consumers, skipping migration");
                Err(e)
            }
        };

        notify_quietly(self.notifier.as_ref(), Notice::Streams(GateAction::Enable)).await;
        let resumed = self.resume_streams().await;

        let results = match (migrated, resumed) {
            (Ok(results), Ok(_)) => results,
            (Err(e), _) | (Ok(_), Err(e)) => {
                error!(error = %e, code = e.code(), "Table sync failed");
                notify_quietly(self.notifier.as_ref(), Notice::Import(CompletionStatus::Failed)).await;
                return Err(e);
            }
        };

        let outcome = SyncOutcome::from_results(results);
        let notice = if outcome.all_succeeded() {
            Notice::SyncSucceeded {
                tables: outcome.succeeded.clone(),
                total: outcome.results.len(),
            }
        } else {
            Notice::SyncFailed {
                succeeded: outcome.succeeded.clone(),
                failed: outcome.failed.clone(),
            }
        };
        notify_quietly(self.notifier.as_ref(), notice).await;

        info!(
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            "Table sync finished"
        );
        Ok(outcome)
    }

    async fn migrate_all(&self, exports: &[ExportLocation]) -> Result<Vec<MigrationResult>> {
        let results: Vec<Result<MigrationResult>> = stream::iter(exports)
            .map(|location| self.orchestrator.migrate(location))
            .buffered(self.table_concurrency)
            .collect()
            .await;

        results.into_iter().collect()
    }

    /// Resume consumers; a mapping left disabled counts as a failed attempt
    async fn resume_streams(&self) -> Result<GateReport> {
        let report = with_retry(&self.gate_retry, "resume stream consumers", || async {
            let report = self.gate.resume().await?;
            if report.failed_mappings > 0 {
                return Err(Error::EventSource(format!(
                    "{} of {} mappings could not be enabled",
                    report.failed_mappings, report.total_mappings
                )));
            }
            Ok(report)
        })
        .await?;

        info!(mappings = report.total_mappings, "Stream consumers resumed");
        Ok(report)
    }
}
