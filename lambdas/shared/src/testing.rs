//! In-memory stand-ins for S3, DynamoDB, Lambda and Slack used by unit tests

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::ops::{Bound, Range};
use std::sync::Mutex;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::stream::{self, StreamExt};

use crate::codec::Item;
use crate::errors::{Error, Result};
use crate::export_store::{ExportStore, ObjectStream, DEFAULT_MAX_KEYS};
use crate::models::{ExportLocation, RecordFile, COMPRESSED_SUFFIX};
use crate::notifier::{Notice, Notifier};
use crate::schema::InferredSchema;
use crate::stream_gate::{GateAction, GateReport, MappingState, StreamGate};
use crate::table_store::{Key, ScanPage, TableDescription, TableState, TableStore, WriteOp};

/// Stored objects are served in chunks this small so line splitting and
/// inflation are exercised across chunk boundaries
const CHUNK_SIZE: usize = 7;

const UNREACHABLE: &str = "dispatch failure: io error: Connection refused (os error 111)";

pub fn gzip(content: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content).unwrap();
    encoder.finish().unwrap()
}

/// Export lines for items `item-NNNN` over `ids`
pub fn record_lines(ids: Range<u32>) -> String {
    ids.map(|i| {
        format!(
            "{{\"Item\":{{\"id\":{{\"S\":\"item-{:04}\"}},\"seq\":{{\"N\":\"{}\"}},\"name\":{{\"S\":\"Item {}\"}}}}}}\n",
            i, i, i
        )
    })
    .collect()
}

/// Item with string attributes
pub fn item(attributes: &[(&str, &str)]) -> Item {
    attributes
        .iter()
        .map(|(name, value)| (name.to_string(), AttributeValue::S(value.to_string())))
        .collect()
}

pub fn export_location(table_name: &str, s3_prefix: &str) -> ExportLocation {
    ExportLocation {
        table_name: table_name.to_string(),
        s3_prefix: s3_prefix.to_string(),
        export_arn: format!("arn:aws:dynamodb:eu-central-1:000000000000:table/{}/export/1", table_name),
        timestamp: Utc::now(),
    }
}

pub struct MemoryExportStore {
    objects: BTreeMap<String, Vec<u8>>,
    max_keys: usize,
    failing_open: HashSet<String>,
    head_error: Option<String>,
}

impl MemoryExportStore {
    pub fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
            max_keys: DEFAULT_MAX_KEYS as usize,
            failing_open: HashSet::new(),
            head_error: None,
        }
    }

    pub fn with_object(mut self, key: impl Into<String>, content: Vec<u8>) -> Self {
        self.objects.insert(key.into(), content);
        self
    }

    pub fn failing_open(mut self, key: &str) -> Self {
        self.failing_open.insert(key.to_string());
        self
    }

    pub fn failing_head(mut self, message: &str) -> Self {
        self.head_error = Some(message.to_string());
        self
    }

    /// What a listing of `prefix` returns
    pub fn files(&self, prefix: &str) -> Vec<RecordFile> {
        self.objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .take(self.max_keys)
            .filter(|key| key.ends_with(COMPRESSED_SUFFIX))
            .map(|key| RecordFile::new(key.as_str()))
            .collect()
    }
}

#[async_trait]
impl ExportStore for MemoryExportStore {
    async fn object_exists(&self, key: &str) -> Result<bool> {
        if let Some(message) = &self.head_error {
            return Err(Error::ObjectStore(message.clone()));
        }
        Ok(self.objects.contains_key(key))
    }

    async fn list_record_files(&self, prefix: &str) -> Result<Vec<RecordFile>> {
        Ok(self.files(prefix))
    }

    async fn open(&self, file: &RecordFile) -> Result<ObjectStream> {
        if self.failing_open.contains(&file.key) {
            return Err(Error::ObjectStore(format!("AccessDenied: {}", file.key)));
        }
        let content = self
            .objects
            .get(&file.key)
            .ok_or_else(|| Error::ObjectStore(format!("NoSuchKey: {}", file.key)))?;

        let chunks: Vec<Result<Vec<u8>>> = content
            .chunks(CHUNK_SIZE)
            .map(|chunk| Ok(chunk.to_vec()))
            .collect();

        Ok(ObjectStream {
            chunks: stream::iter(chunks).boxed(),
            size: Some(content.len() as u64),
        })
    }
}

#[derive(Default)]
struct MemoryTable {
    key_attributes: Vec<String>,
    items: BTreeMap<String, Item>,
    batch_sizes: Vec<usize>,
    polls_until_active: usize,
}

impl MemoryTable {
    fn key_of(&self, item: &Item) -> Result<String> {
        self.key_attributes
            .iter()
            .map(|name| {
                item.get(name)
                    .map(|value| format!("{:?}", value))
                    .ok_or_else(|| {
                        Error::Database(format!("ValidationException: missing key attribute {}", name))
                    })
            })
            .collect::<Result<Vec<_>>>()
            .map(|parts| parts.join("|"))
    }

    fn project(&self, item: &Item) -> Key {
        item.iter()
            .filter(|(name, _)| self.key_attributes.contains(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

#[derive(Default)]
struct TableStoreState {
    tables: HashMap<String, MemoryTable>,
    created: Vec<(String, InferredSchema)>,
    creation_polls: usize,
    unprocessed_budget: usize,
    describe_error: Option<String>,
    failing_value: Option<String>,
    unreachable: bool,
    unreachable_writes: bool,
    in_flight: usize,
    max_in_flight: usize,
}

pub struct MemoryTableStore {
    state: Mutex<TableStoreState>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TableStoreState::default()),
        }
    }

    pub fn with_table(self, name: &str, key_attributes: &[&str]) -> Self {
        self.state.lock().unwrap().tables.insert(
            name.to_string(),
            MemoryTable {
                key_attributes: key_attributes.iter().map(|k| k.to_string()).collect(),
                ..Default::default()
            },
        );
        self
    }

    /// Describe calls that report a new table as still creating
    pub fn with_creation_polls(self, polls: usize) -> Self {
        self.state.lock().unwrap().creation_polls = polls;
        self
    }

    pub fn failing_describe(self, message: &str) -> Self {
        self.state.lock().unwrap().describe_error = Some(message.to_string());
        self
    }

    /// Batches containing a put with this string value are rejected
    pub fn failing_writes_for(self, value: &str) -> Self {
        self.state.lock().unwrap().failing_value = Some(value.to_string());
        self
    }

    /// Every call fails as if the endpoint could not be reached
    pub fn unreachable(self) -> Self {
        self.state.lock().unwrap().unreachable = true;
        self
    }

    /// Batch writes fail as unreachable; every other call succeeds
    pub fn unreachable_writes(self) -> Self {
        self.state.lock().unwrap().unreachable_writes = true;
        self
    }

    /// Leave the last `count` requests of upcoming batches unprocessed;
    /// `usize::MAX` never processes anything
    pub fn leave_unprocessed(&self, count: usize) {
        self.state.lock().unwrap().unprocessed_budget = count;
    }

    pub fn insert(&self, table: &str, item: Item) {
        let mut state = self.state.lock().unwrap();
        let table = state.tables.get_mut(table).unwrap();
        let key = table.key_of(&item).unwrap();
        table.items.insert(key, item);
    }

    pub fn contains(&self, table: &str, key: &Key) -> bool {
        let state = self.state.lock().unwrap();
        state.tables.get(table).is_some_and(|t| {
            t.key_of(key)
                .map(|k| t.items.contains_key(&k))
                .unwrap_or(false)
        })
    }

    pub fn item_count(&self, table: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.tables.get(table).map_or(0, |t| t.items.len())
    }

    pub fn batch_sizes(&self, table: &str) -> Vec<usize> {
        let state = self.state.lock().unwrap();
        state
            .tables
            .get(table)
            .map(|t| t.batch_sizes.clone())
            .unwrap_or_default()
    }

    pub fn key_attributes(&self, table: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .tables
            .get(table)
            .map(|t| t.key_attributes.clone())
            .unwrap_or_default()
    }

    pub fn created_tables(&self) -> Vec<(String, InferredSchema)> {
        self.state.lock().unwrap().created.clone()
    }

    /// Most batch writes observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }

    fn check_reachable(&self) -> Result<()> {
        if self.state.lock().unwrap().unreachable {
            return Err(Error::Unreachable(UNREACHABLE.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn describe_table(&self, table: &str) -> Result<Option<TableDescription>> {
        self.check_reachable()?;
        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.describe_error {
            return Err(Error::Database(message.clone()));
        }

        let Some(entry) = state.tables.get_mut(table) else {
            return Ok(None);
        };
        let status = if entry.polls_until_active > 0 {
            entry.polls_until_active -= 1;
            TableState::Creating
        } else {
            TableState::Active
        };

        Ok(Some(TableDescription {
            name: table.to_string(),
            key_attributes: entry.key_attributes.clone(),
            state: status,
        }))
    }

    async fn create_table(&self, table: &str, schema: &InferredSchema) -> Result<()> {
        self.check_reachable()?;
        let mut state = self.state.lock().unwrap();
        if state.tables.contains_key(table) {
            return Err(Error::Database(format!("ResourceInUseException: {}", table)));
        }

        let polls_until_active = state.creation_polls;
        state.tables.insert(
            table.to_string(),
            MemoryTable {
                key_attributes: vec![schema.partition_key_name.clone()],
                polls_until_active,
                ..Default::default()
            },
        );
        state.created.push((table.to_string(), schema.clone()));
        Ok(())
    }

    async fn scan_keys(
        &self,
        table: &str,
        key_attributes: &[String],
        start_key: Option<Key>,
        limit: i32,
    ) -> Result<ScanPage> {
        self.check_reachable()?;
        let state = self.state.lock().unwrap();
        let entry = state
            .tables
            .get(table)
            .ok_or_else(|| Error::Database(format!("ResourceNotFoundException: {}", table)))?;
        assert_eq!(entry.key_attributes, key_attributes);

        let lower = match &start_key {
            Some(key) => Bound::Excluded(entry.key_of(key)?),
            None => Bound::Unbounded,
        };
        let limit = limit as usize;
        let keys: Vec<Key> = entry
            .items
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, item)| entry.project(item))
            .collect();

        let last_evaluated_key = if keys.len() == limit {
            keys.last().cloned()
        } else {
            None
        };
        Ok(ScanPage {
            keys,
            last_evaluated_key,
        })
    }

    async fn batch_write(&self, table: &str, ops: Vec<WriteOp>) -> Result<Vec<WriteOp>> {
        self.check_reachable()?;
        if self.state.lock().unwrap().unreachable_writes {
            return Err(Error::Unreachable(UNREACHABLE.to_string()));
        }
        {
            let mut state = self.state.lock().unwrap();
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
        }

        // Let other loads run while this write is "on the wire"
        tokio::task::yield_now().await;

        let mut state = self.state.lock().unwrap();
        state.in_flight -= 1;

        let rejected = state.failing_value.as_ref().is_some_and(|value| {
            let needle = AttributeValue::S(value.clone());
            ops.iter().any(|op| match op {
                WriteOp::Put(item) => item.values().any(|v| *v == needle),
                WriteOp::Delete(_) => false,
            })
        });

        let leave = state.unprocessed_budget.min(ops.len());
        if state.unprocessed_budget != usize::MAX {
            state.unprocessed_budget -= leave;
        }

        let entry = state
            .tables
            .get_mut(table)
            .ok_or_else(|| Error::Database(format!("ResourceNotFoundException: {}", table)))?;
        entry.batch_sizes.push(ops.len());
        if rejected {
            return Err(Error::Database("ValidationException: item rejected".to_string()));
        }

        let mut ops = ops;
        let unprocessed = ops.split_off(ops.len() - leave);
        for op in ops {
            match op {
                WriteOp::Put(item) => {
                    let key = entry.key_of(&item)?;
                    entry.items.insert(key, item);
                }
                WriteOp::Delete(key) => {
                    let key = entry.key_of(&key)?;
                    entry.items.remove(&key);
                }
            }
        }
        Ok(unprocessed)
    }
}

pub struct RecordingGate {
    actions: Mutex<Vec<GateAction>>,
    failing_resumes: Mutex<usize>,
    fail_suspend: bool,
}

impl RecordingGate {
    pub fn new() -> Self {
        Self {
            actions: Mutex::new(Vec::new()),
            failing_resumes: Mutex::new(0),
            fail_suspend: false,
        }
    }

    /// The next `count` resumes fail
    pub fn failing_resumes(self, count: usize) -> Self {
        *self.failing_resumes.lock().unwrap() = count;
        self
    }

    pub fn failing_suspend(mut self) -> Self {
        self.fail_suspend = true;
        self
    }

    pub fn actions(&self) -> Vec<GateAction> {
        self.actions.lock().unwrap().clone()
    }

    fn report(action: GateAction, state: &str) -> GateReport {
        GateReport {
            action,
            processed_mappings: vec![MappingState {
                uuid: "0f6d2b5c-mapping".to_string(),
                state: state.to_string(),
            }],
            total_mappings: 1,
            failed_mappings: 0,
        }
    }
}

#[async_trait]
impl StreamGate for RecordingGate {
    async fn suspend(&self) -> Result<GateReport> {
        self.actions.lock().unwrap().push(GateAction::Disable);
        if self.fail_suspend {
            return Err(Error::EventSource("AccessDeniedException".to_string()));
        }
        Ok(Self::report(GateAction::Disable, "Disabled"))
    }

    async fn resume(&self) -> Result<GateReport> {
        self.actions.lock().unwrap().push(GateAction::Enable);
        let mut failing = self.failing_resumes.lock().unwrap();
        if *failing > 0 {
            *failing -= 1;
            return Err(Error::EventSource("ResourceConflictException".to_string()));
        }
        Ok(Self::report(GateAction::Enable, "Enabled"))
    }
}

pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            notices: Mutex::new(Vec::new()),
        }
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notice: Notice) -> Result<()> {
        self.notices.lock().unwrap().push(notice);
        Ok(())
    }
}
