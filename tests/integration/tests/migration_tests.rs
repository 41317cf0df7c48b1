//! Integration tests for the migration pipeline against DynamoDB Local
//!
//! Run with: DYNAMODB_ENDPOINT=http://localhost:8000 cargo test
//!
//! Export files are served from memory; every table name is unique per test.

use std::sync::Arc;
use std::time::Duration;

use aws_sdk_dynamodb::types::AttributeValue;
use pretty_assertions::assert_eq;
use tablesync_core::provisioner::{Provisioned, TableProvisioner};
use tablesync_core::schema::{InferredSchema, KeyAttributeType};
use tablesync_core::table_store::{TableState, WriteOp};
use tablesync_core::{
    DynamoTableStore, ExportLocation, MigrationOrchestrator, MigrationStatus, SyncConfig, TableStore,
};
use tablesync_integration_tests::{
    fixtures::{order_lines, unique_prefix, unique_table_name, FixtureExports},
    skip_if_no_dynamodb, LocalDynamo,
};

/// Helper to get client or skip test
async fn get_client() -> Option<LocalDynamo> {
    LocalDynamo::from_env().await
}

fn location(table_name: &str, prefix: &str) -> ExportLocation {
    serde_json::from_value(serde_json::json!({
        "tableName": table_name,
        "s3Prefix": prefix,
        "exportArn": "arn:aws:dynamodb:us-east-1:000000000000:table/it/export/1",
        "timestamp": "2025-01-01T03:00:00Z"
    }))
    .expect("valid export location")
}

fn short_provisioner(tables: Arc<dyn TableStore>, exports: Arc<FixtureExports>) -> TableProvisioner {
    TableProvisioner::new(tables, exports)
        .with_creation_timeout(Duration::from_secs(60), Duration::from_millis(200))
}

// ============================================================================
// Table Store Tests
// ============================================================================

#[tokio::test]
async fn test_describe_missing_table() {
    skip_if_no_dynamodb!();
    let Some(local) = get_client().await else { return };

    let store = DynamoTableStore::new(local.client());
    let description = store
        .describe_table(&unique_table_name("test"))
        .await
        .expect("describe should succeed");

    assert!(description.is_none());
}

#[tokio::test]
async fn test_create_write_scan() {
    skip_if_no_dynamodb!();
    let Some(local) = get_client().await else { return };

    let table = unique_table_name("test");
    let store = DynamoTableStore::new(local.client());

    store
        .create_table(&table, &InferredSchema::new("key", KeyAttributeType::S))
        .await
        .expect("Failed to create table");

    let description = store.describe_table(&table).await.unwrap().expect("table exists");
    assert_eq!(description.key_attributes, vec!["key".to_string()]);
    assert!(matches!(description.state, TableState::Active | TableState::Creating));

    let ops: Vec<WriteOp> = (0..25)
        .map(|i| {
            WriteOp::Put(
                [
                    ("key".to_string(), AttributeValue::S(format!("k-{:02}", i))),
                    ("name".to_string(), AttributeValue::S("reserved words".to_string())),
                ]
                .into_iter()
                .collect(),
            )
        })
        .collect();
    let unprocessed = store.batch_write(&table, ops).await.expect("batch write");
    assert!(unprocessed.is_empty());

    // "key" is a reserved word; the projection must still work
    let keys = vec!["key".to_string()];
    let page = store.scan_keys(&table, &keys, None, 10).await.expect("scan");
    assert_eq!(page.keys.len(), 10);
    assert!(page.keys.iter().all(|item| item.len() == 1 && item.contains_key("key")));
    assert!(page.last_evaluated_key.is_some());

    local.delete_table(&table).await;
}

// ============================================================================
// Provisioning Tests
// ============================================================================

#[tokio::test]
async fn test_provision_creates_then_clears() {
    skip_if_no_dynamodb!();
    let Some(local) = get_client().await else { return };

    let table = unique_table_name("test");
    let prefix = unique_prefix();
    let exports = Arc::new(FixtureExports::new().with_export(&prefix, &[order_lines(0, 3)]));
    let files = tablesync_core::ExportStore::list_record_files(exports.as_ref(), &prefix)
        .await
        .unwrap();
    let tables: Arc<dyn TableStore> = Arc::new(DynamoTableStore::new(local.client()));
    let provisioner = short_provisioner(tables.clone(), exports);

    let created = provisioner.ensure_empty(&table, &files).await.expect("create");
    let Provisioned::Created { inference } = created else {
        panic!("expected creation, got {:?}", created);
    };
    assert_eq!(inference.schema.partition_key_name, "orderId");
    assert!(inference.used_fallback());

    let ops: Vec<WriteOp> = (0..40)
        .map(|i| {
            WriteOp::Put(
                [("orderId".to_string(), AttributeValue::S(format!("stale-{}", i)))]
                    .into_iter()
                    .collect(),
            )
        })
        .collect();
    for chunk in ops.chunks(25) {
        tables.batch_write(&table, chunk.to_vec()).await.unwrap();
    }
    assert_eq!(local.count_items(&table).await, 40);

    let cleared = provisioner.ensure_empty(&table, &files).await.expect("clear");
    assert_eq!(cleared, Provisioned::Cleared { deleted: 40 });
    assert_eq!(local.count_items(&table).await, 0);

    local.delete_table(&table).await;
}

// ============================================================================
// Full Migration Tests
// ============================================================================

#[tokio::test]
async fn test_migrate_export_into_new_table() {
    skip_if_no_dynamodb!();
    let Some(local) = get_client().await else { return };

    let source = unique_table_name("prod");
    let target = source.replace("-prod-", "-test-");
    let prefix = unique_prefix();
    let exports = Arc::new(
        FixtureExports::new().with_export(&prefix, &[order_lines(0, 30), order_lines(30, 23)]),
    );
    let tables: Arc<dyn TableStore> = Arc::new(DynamoTableStore::new(local.client()));
    let orchestrator = MigrationOrchestrator::new(exports.clone(), tables.clone(), &SyncConfig::new("it-bucket"))
        .with_provisioner(short_provisioner(tables, exports));

    let result = orchestrator
        .migrate(&location(&source, &prefix))
        .await
        .expect("migration should not abort");

    assert_eq!(result.status, MigrationStatus::Success, "{}", result.message);
    assert_eq!(result.items_processed, Some(53));
    assert_eq!(local.count_items(&target).await, 53);

    let item = local
        .get_item(&target, "orderId", "order-00007")
        .await
        .expect("order-00007 loaded");
    assert_eq!(item.get("total"), Some(&AttributeValue::N("7.50".to_string())));
    assert_eq!(item.get("paid"), Some(&AttributeValue::Bool(false)));
    assert!(matches!(item.get("lines"), Some(AttributeValue::L(lines)) if lines.len() == 1));

    // A second run replaces, not appends
    let result = orchestrator.migrate(&location(&source, &prefix)).await.unwrap();
    assert_eq!(result.items_processed, Some(53));
    assert_eq!(local.count_items(&target).await, 53);

    local.delete_table(&target).await;
    local.wait_deleted(&target).await;
}

#[tokio::test]
async fn test_incomplete_export_leaves_destination_alone() {
    skip_if_no_dynamodb!();
    let Some(local) = get_client().await else { return };

    let source = unique_table_name("prod");
    let target = source.replace("-prod-", "-test-");
    let exports = Arc::new(FixtureExports::new());
    let tables: Arc<dyn TableStore> = Arc::new(DynamoTableStore::new(local.client()));
    let orchestrator = MigrationOrchestrator::new(exports, tables.clone(), &SyncConfig::new("it-bucket"));

    let result = orchestrator
        .migrate(&location(&source, &unique_prefix()))
        .await
        .unwrap();

    assert_eq!(result.status, MigrationStatus::Failed);
    assert!(tables.describe_table(&target).await.unwrap().is_none());
}
