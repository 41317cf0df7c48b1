//! Read access to table exports in S3
//!
//! An export is a set of record files under one key prefix. Files are read as
//! a stream of stored chunks and turned into lines by [`LineReader`], which
//! inflates gzip content incrementally so a file is never held in memory whole.

use std::io::Write;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use flate2::write::GzDecoder;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use tracing::debug;

use crate::errors::{sdk_error, Error, Result};
use crate::models::{RecordFile, COMPRESSED_SUFFIX};

/// Default number of keys requested per listing
pub const DEFAULT_MAX_KEYS: i32 = 10;

/// Stored bytes of one object, chunk by chunk
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>>>;

/// An opened record file
pub struct ObjectStream {
    pub chunks: ChunkStream,
    /// Stored (possibly compressed) size, when the store reports it
    pub size: Option<u64>,
}

/// Object store holding table exports
#[async_trait]
pub trait ExportStore: Send + Sync {
    /// Whether an object exists. A missing object is `Ok(false)`.
    async fn object_exists(&self, key: &str) -> Result<bool>;

    /// Record files under a prefix, one listing page, `.gz` keys only
    async fn list_record_files(&self, prefix: &str) -> Result<Vec<RecordFile>>;

    /// Open a record file for streaming
    async fn open(&self, file: &RecordFile) -> Result<ObjectStream>;
}

/// S3-backed export store
pub struct S3ExportStore {
    client: Client,
    bucket: String,
    max_keys: i32,
}

impl S3ExportStore {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            max_keys: DEFAULT_MAX_KEYS,
        }
    }

    pub fn with_max_keys(mut self, max_keys: i32) -> Self {
        self.max_keys = max_keys;
        self
    }
}

#[async_trait]
impl ExportStore for S3ExportStore {
    async fn object_exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(sdk_error(e, Error::ObjectStore)),
        }
    }

    async fn list_record_files(&self, prefix: &str) -> Result<Vec<RecordFile>> {
        let result = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .max_keys(self.max_keys)
            .send()
            .await
            .map_err(|e| sdk_error(e, Error::ObjectStore))?;

        let files: Vec<RecordFile> = result
            .contents
            .unwrap_or_default()
            .into_iter()
            .filter_map(|object| object.key)
            .filter(|key| key.ends_with(COMPRESSED_SUFFIX))
            .map(RecordFile::new)
            .collect();

        debug!(prefix = %prefix, files = files.len(), "Listed record files");
        Ok(files)
    }

    async fn open(&self, file: &RecordFile) -> Result<ObjectStream> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&file.key)
            .send()
            .await
            .map_err(|e| sdk_error(e, Error::ObjectStore))?;

        let size = result.content_length.and_then(|len| u64::try_from(len).ok());
        let chunks = futures::stream::try_unfold(result.body, |mut body| async move {
            match body.try_next().await {
                Ok(Some(bytes)) => Ok(Some((bytes.to_vec(), body))),
                Ok(None) => Ok(None),
                Err(e) => Err(Error::ObjectStore(e.to_string())),
            }
        })
        .boxed();

        Ok(ObjectStream { chunks, size })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Reading,
    /// Whole object consumed
    Finished,
    /// Byte cap exceeded, no further chunks pulled
    Truncated,
}

/// Splits a record file into trimmed, non-empty lines
pub struct LineReader {
    chunks: ChunkStream,
    inflater: Option<GzDecoder<Vec<u8>>>,
    pending: Vec<u8>,
    /// Start of the first unconsumed line in `pending`
    line_start: usize,
    /// Where the next newline search resumes in `pending`
    scan_from: usize,
    byte_cap: Option<u64>,
    decoded_bytes: u64,
    stored_bytes: u64,
    object_size: Option<u64>,
    state: ReadState,
}

impl LineReader {
    pub fn new(object: ObjectStream, compressed: bool) -> Self {
        Self {
            chunks: object.chunks,
            inflater: compressed.then(|| GzDecoder::new(Vec::new())),
            pending: Vec::new(),
            line_start: 0,
            scan_from: 0,
            byte_cap: None,
            decoded_bytes: 0,
            stored_bytes: 0,
            object_size: object.size,
            state: ReadState::Reading,
        }
    }

    /// Open `file` on `store` and wrap it in a reader
    pub async fn open(store: &dyn ExportStore, file: &RecordFile) -> Result<Self> {
        let object = store.open(file).await?;
        Ok(Self::new(object, file.compressed))
    }

    /// Stop pulling chunks once more than `cap` decoded bytes were produced.
    /// A partial line left at that point is discarded.
    pub fn with_byte_cap(mut self, cap: u64) -> Self {
        self.byte_cap = Some(cap);
        self
    }

    /// Next non-empty line, `None` at end of file or cap
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(line) = self.take_line()? {
                return Ok(Some(line));
            }

            match self.state {
                ReadState::Reading => {
                    if self.byte_cap.is_some_and(|cap| self.decoded_bytes > cap) {
                        self.state = ReadState::Truncated;
                        continue;
                    }
                    match self.chunks.try_next().await? {
                        Some(chunk) => self.feed(&chunk)?,
                        None => {
                            self.finish()?;
                            self.state = ReadState::Finished;
                        }
                    }
                }
                ReadState::Finished => {
                    let line = to_line(&self.pending[self.line_start..]);
                    self.reset_pending();
                    return line;
                }
                ReadState::Truncated => {
                    self.reset_pending();
                    return Ok(None);
                }
            }
        }
    }

    /// Decoded bytes produced so far
    pub fn decoded_bytes(&self) -> u64 {
        self.decoded_bytes
    }

    /// Stored bytes consumed so far
    pub fn stored_bytes(&self) -> u64 {
        self.stored_bytes
    }

    pub fn object_size(&self) -> Option<u64> {
        self.object_size
    }

    pub fn reached_end(&self) -> bool {
        self.state == ReadState::Finished
    }

    /// Fraction of the stored object consumed, 1.0 once fully read or when
    /// the size is unknown
    pub fn consumed_ratio(&self) -> f64 {
        if self.reached_end() {
            return 1.0;
        }
        match self.object_size {
            Some(size) if size > 0 => (self.stored_bytes as f64 / size as f64).min(1.0),
            _ => 1.0,
        }
    }

    fn feed(&mut self, chunk: &[u8]) -> Result<()> {
        self.compact();
        self.stored_bytes += chunk.len() as u64;
        match self.inflater.as_mut() {
            Some(inflater) => {
                inflater.write_all(chunk)?;
                let decoded = inflater.get_mut();
                self.decoded_bytes += decoded.len() as u64;
                self.pending.append(decoded);
            }
            None => {
                self.decoded_bytes += chunk.len() as u64;
                self.pending.extend_from_slice(chunk);
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(inflater) = self.inflater.take() {
            self.compact();
            let mut decoded = inflater.finish()?;
            self.decoded_bytes += decoded.len() as u64;
            self.pending.append(&mut decoded);
        }
        Ok(())
    }

    fn take_line(&mut self) -> Result<Option<String>> {
        while let Some(offset) = self.pending[self.scan_from..]
            .iter()
            .position(|b| *b == b'\n')
        {
            let end = self.scan_from + offset;
            let raw = &self.pending[self.line_start..end];
            self.line_start = end + 1;
            self.scan_from = self.line_start;
            if let Some(line) = to_line(raw)? {
                return Ok(Some(line));
            }
        }
        self.scan_from = self.pending.len();
        Ok(None)
    }

    /// Drop consumed lines, once per chunk
    fn compact(&mut self) {
        if self.line_start > 0 {
            self.pending.drain(..self.line_start);
            self.scan_from -= self.line_start;
            self.line_start = 0;
        }
    }

    fn reset_pending(&mut self) {
        self.pending.clear();
        self.line_start = 0;
        self.scan_from = 0;
    }
}

fn to_line(raw: &[u8]) -> Result<Option<String>> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Ok(None)
    } else {
        Ok(Some(trimmed.to_string()))
    }
}
