//! Test fixtures and utilities

use std::collections::BTreeMap;
use std::io::Write;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::stream::{self, StreamExt};
use tablesync_core::export_store::{ExportStore, ObjectStream};
use tablesync_core::{Error, RecordFile, Result};
use uuid::Uuid;

/// Generate a unique table name for the given stage
pub fn unique_table_name(stage: &str) -> String {
    format!("it-orders-{}-{}", stage, &Uuid::new_v4().to_string()[..8])
}

/// Generate a unique export prefix
pub fn unique_prefix() -> String {
    format!("exports/it-{}", &Uuid::new_v4().to_string()[..8])
}

/// Check if a DynamoDB endpoint is configured
pub fn dynamodb_configured() -> bool {
    std::env::var("DYNAMODB_ENDPOINT").is_ok()
}

/// Skip test if no DynamoDB endpoint is configured
#[macro_export]
macro_rules! skip_if_no_dynamodb {
    () => {
        if !$crate::fixtures::dynamodb_configured() {
            eprintln!("Skipping test: DYNAMODB_ENDPOINT not set");
            return;
        }
    };
}

/// Export lines for `count` orders, `orderId` written first
pub fn order_lines(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| {
            format!(
                concat!(
                    r#"{{"Item":{{"orderId":{{"S":"order-{:05}"}},"total":{{"N":"{}.50"}},"#,
                    r#""tags":{{"SS":["it","export"]}},"#,
                    r#""lines":{{"L":[{{"M":{{"sku":{{"S":"SKU-1"}},"qty":{{"N":"2"}}}}}}]}},"#,
                    r#""paid":{{"BOOL":{}}}}}}}"#,
                    "\n"
                ),
                i,
                i,
                i % 2 == 0
            )
        })
        .collect()
}

pub fn gzip(content: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content.as_bytes()).expect("gzip write");
    encoder.finish().expect("gzip finish")
}

/// Export files served from memory
#[derive(Default)]
pub struct FixtureExports {
    objects: BTreeMap<String, Vec<u8>>,
}

impl FixtureExports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a completed export: marker plus one gzip file per content entry
    pub fn with_export(mut self, prefix: &str, files: &[String]) -> Self {
        self.objects.insert(format!("{}/_started", prefix), Vec::new());
        for (i, content) in files.iter().enumerate() {
            self.objects
                .insert(format!("{}/data/{:03}.json.gz", prefix, i), gzip(content));
        }
        self
    }
}

#[async_trait]
impl ExportStore for FixtureExports {
    async fn object_exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.contains_key(key))
    }

    async fn list_record_files(&self, prefix: &str) -> Result<Vec<RecordFile>> {
        Ok(self
            .objects
            .keys()
            .filter(|key| key.starts_with(prefix) && key.ends_with(".gz"))
            .map(|key| RecordFile::new(key.as_str()))
            .collect())
    }

    async fn open(&self, file: &RecordFile) -> Result<ObjectStream> {
        let content = self
            .objects
            .get(&file.key)
            .cloned()
            .ok_or_else(|| Error::ObjectStore(format!("NoSuchKey: {}", file.key)))?;
        let size = content.len() as u64;
        Ok(ObjectStream {
            chunks: stream::iter(vec![Ok(content)]).boxed(),
            size: Some(size),
        })
    }
}
