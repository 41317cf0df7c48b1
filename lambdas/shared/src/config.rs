//! Environment configuration shared by the TableSync Lambdas

use aws_config::BehaviorVersion;

use crate::errors::{Error, Result};
use crate::export_store::DEFAULT_MAX_KEYS;
use crate::loader::DEFAULT_LOAD_CONCURRENCY;

/// Tables migrated at the same time by the workflow driver
pub const DEFAULT_TABLE_CONCURRENCY: usize = 3;

pub const DEFAULT_SOURCE_STAGE: &str = "prod";
pub const DEFAULT_TARGET_STAGE: &str = "test";

/// Runtime configuration read from the Lambda environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Bucket holding the table exports (`BACKUP_BUCKET_NAME`)
    pub backup_bucket: String,
    /// Stage the exports were taken from (`SOURCE_STAGE`)
    pub source_stage: String,
    /// Stage this deployment loads into (`STAGE`)
    pub target_stage: String,
    /// Record files loaded concurrently per table (`LOAD_CONCURRENCY`)
    pub load_concurrency: usize,
    /// Tables migrated concurrently (`TABLE_CONCURRENCY`)
    pub table_concurrency: usize,
    /// Keys per export listing (`EXPORT_LIST_MAX_KEYS`)
    pub list_max_keys: i32,
    /// Incoming webhook for operator messages (`SLACK_WEBHOOK_URL`)
    pub slack_webhook_url: Option<String>,
}

impl SyncConfig {
    pub fn new(backup_bucket: impl Into<String>) -> Self {
        Self {
            backup_bucket: backup_bucket.into(),
            source_stage: DEFAULT_SOURCE_STAGE.to_string(),
            target_stage: DEFAULT_TARGET_STAGE.to_string(),
            load_concurrency: DEFAULT_LOAD_CONCURRENCY,
            table_concurrency: DEFAULT_TABLE_CONCURRENCY,
            list_max_keys: DEFAULT_MAX_KEYS,
            slack_webhook_url: None,
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let backup_bucket = get("BACKUP_BUCKET_NAME")
            .ok_or_else(|| Error::Config("BACKUP_BUCKET_NAME is not set".to_string()))?;

        let mut config = Self::new(backup_bucket);
        if let Some(stage) = get("SOURCE_STAGE") {
            config.source_stage = stage;
        }
        if let Some(stage) = get("STAGE") {
            config.target_stage = stage;
        }
        if let Some(value) = get("LOAD_CONCURRENCY") {
            config.load_concurrency = parse_positive("LOAD_CONCURRENCY", &value)?;
        }
        if let Some(value) = get("TABLE_CONCURRENCY") {
            config.table_concurrency = parse_positive("TABLE_CONCURRENCY", &value)?;
        }
        if let Some(value) = get("EXPORT_LIST_MAX_KEYS") {
            let keys = parse_positive("EXPORT_LIST_MAX_KEYS", &value)?;
            config.list_max_keys = i32::try_from(keys)
                .map_err(|_| Error::Config(format!("EXPORT_LIST_MAX_KEYS out of range: {}", value)))?;
        }
        config.slack_webhook_url = get("SLACK_WEBHOOK_URL");

        Ok(config)
    }
}

/// AWS service clients for one invocation
#[derive(Clone)]
pub struct AwsClients {
    pub dynamodb: aws_sdk_dynamodb::Client,
    pub s3: aws_sdk_s3::Client,
    pub lambda: aws_sdk_lambda::Client,
}

impl AwsClients {
    /// Load clients from the default credential and region chain
    pub async fn load() -> Self {
        let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Self {
            dynamodb: aws_sdk_dynamodb::Client::new(&config),
            s3: aws_sdk_s3::Client::new(&config),
            lambda: aws_sdk_lambda::Client::new(&config),
        }
    }
}

fn parse_positive(name: &str, value: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::Config(format!(
            "{} must be a positive integer, got {:?}",
            name, value
        ))),
    }
}
