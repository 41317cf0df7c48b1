//! Per-table migration pipeline
//!
//! One export moves through a fixed sequence of stages:
//! - Verifying: the export finished writing
//! - Listing: record files are enumerated
//! - Estimating: the export holds any data at all
//! - Provisioning: the destination exists and is empty
//! - Loading: records are written to the destination
//!
//! Every table ends in exactly one [`MigrationResult`]. Failures become failed
//! results, except transport faults, which are returned as errors so the
//! workflow driver can react to an unreachable service.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::completion::CompletionVerifier;
use crate::config::SyncConfig;
use crate::errors::{Error, Result};
use crate::export_store::ExportStore;
use crate::loader::BulkLoader;
use crate::models::{ExportLocation, MigrationResult};
use crate::name_mapper::NameMapper;
use crate::provisioner::{Provisioned, TableProvisioner};
use crate::schema::SchemaFallback;
use crate::sufficiency::SufficiencyEstimator;
use crate::table_store::TableStore;

/// Pipeline stage a table is in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStage {
    Verifying,
    Listing,
    Estimating,
    Provisioning,
    Loading,
}

impl fmt::Display for MigrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationStage::Verifying => "verifying",
            MigrationStage::Listing => "listing",
            MigrationStage::Estimating => "estimating",
            MigrationStage::Provisioning => "provisioning",
            MigrationStage::Loading => "loading",
        };
        f.write_str(name)
    }
}

pub struct MigrationOrchestrator {
    exports: Arc<dyn ExportStore>,
    verifier: CompletionVerifier,
    estimator: SufficiencyEstimator,
    mapper: NameMapper,
    provisioner: TableProvisioner,
    loader: BulkLoader,
}

impl MigrationOrchestrator {
    pub fn new(exports: Arc<dyn ExportStore>, tables: Arc<dyn TableStore>, config: &SyncConfig) -> Self {
        Self {
            verifier: CompletionVerifier::new(exports.clone()),
            estimator: SufficiencyEstimator::new(exports.clone()),
            mapper: NameMapper::new(&config.source_stage, &config.target_stage),
            provisioner: TableProvisioner::new(tables.clone(), exports.clone()),
            loader: BulkLoader::new(exports.clone(), tables).with_concurrency(config.load_concurrency),
            exports,
        }
    }

    /// Replace the provisioner, e.g. to shorten creation polling
    pub fn with_provisioner(mut self, provisioner: TableProvisioner) -> Self {
        self.provisioner = provisioner;
        self
    }

    pub fn with_loader(mut self, loader: BulkLoader) -> Self {
        self.loader = loader;
        self
    }

    /// Migrate one exported table into the target stage
    pub async fn migrate(&self, location: &ExportLocation) -> Result<MigrationResult> {
        let source = location.table_name.as_str();
        info!(table = %source, prefix = %location.s3_prefix, "Processing backup");

        let check = self.verifier.verify(location).await;
        if !check.is_complete {
            warn!(table = %source, stage = %MigrationStage::Verifying, "Backup not complete: {}", check.message);
            return Ok(MigrationResult::failed(source, check.message));
        }

        let files = match self.exports.list_record_files(&location.s3_prefix).await {
            Ok(files) => files,
            Err(e) => return fail_or_propagate(source, MigrationStage::Listing, e),
        };
        if files.is_empty() {
            return Ok(MigrationResult::failed(
                source,
                "No backup files found - this should not happen after completion check",
            ));
        }

        let estimate = self.estimator.estimate(source, &files).await;
        if !estimate.has_data {
            info!(table = %source, stage = %MigrationStage::Estimating, "Skipping import: {}", estimate.message);
            return Ok(MigrationResult::success(
                source,
                format!("Backup processing skipped - {}", estimate.message),
            ));
        }

        let mapping = self.mapper.map(source);
        let target = mapping.table_name;

        let provisioned = match self.provisioner.ensure_empty(&target, &files).await {
            Ok(provisioned) => provisioned,
            Err(e) => return fail_or_propagate(source, MigrationStage::Provisioning, e),
        };

        let summary = match self.loader.load_files(&files, &target).await {
            Ok(summary) => summary,
            Err(e) => return fail_or_propagate(source, MigrationStage::Loading, e),
        };
        if summary.files_loaded == 0 && summary.files_failed > 0 {
            error!(table = %source, target = %target, stage = %MigrationStage::Loading, "No record file could be loaded");
            return Ok(MigrationResult::failed(
                source,
                format!(
                    "Import failed: none of {} files could be loaded into {}",
                    summary.files_failed, target
                ),
            )
            .with_items(0));
        }

        let mut message = format!(
            "Successfully imported {} items: {} -> {}",
            summary.items_processed, source, target
        );
        if summary.files_failed > 0 {
            message.push_str(&format!(" ({} files failed)", summary.files_failed));
        }
        if !mapping.changed {
            message.push_str(" (table name had no stage token to map)");
        }
        if let Provisioned::Created { inference } = &provisioned {
            match &inference.fallback {
                Some(SchemaFallback::FirstField) => message.push_str(&format!(
                    " (table created keyed on first field '{}')",
                    inference.schema.partition_key_name
                )),
                Some(SchemaFallback::Default { reason }) => {
                    message.push_str(&format!(" (table created with default key: {})", reason))
                }
                None => {}
            }
        }

        info!(table = %source, target = %target, items = summary.items_processed, "Import completed");
        Ok(MigrationResult::success(source, message).with_items(summary.items_processed))
    }
}

fn fail_or_propagate(table: &str, stage: MigrationStage, err: Error) -> Result<MigrationResult> {
    if err.is_unreachable() {
        error!(table = %table, stage = %stage, error = %err, "Service unreachable");
        return Err(err);
    }
    error!(table = %table, stage = %stage, error = %err, code = err.code(), "Error processing table");
    Ok(MigrationResult::failed(table, err.to_string()))
}
