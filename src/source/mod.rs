//! Payload sources and ingestion properties.
//!
//! Callers hand the clients a [`FileSource`], [`StreamSource`] or
//! [`BlobSource`] together with [`IngestionProperties`]. The router never
//! assumes a caller-supplied stream is seekable; it buffers bounded payloads
//! into a [`ReplayableSource`] so retries can replay them byte-identically.

use crate::error::{ConfigError, IngestError, SourceError};
use bytes::Bytes;
use serde::Serialize;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

/// Data format of an ingestion payload.
///
/// Binary column formats carry their own framing and are not compressed
/// again on upload; text formats are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    /// Comma-separated values.
    Csv,
    /// Tab-separated values.
    Tsv,
    /// Pipe-separated values.
    Psv,
    /// Plain text, one record per line.
    Txt,
    /// A single JSON document per record.
    Json,
    /// One JSON array or whitespace-separated documents.
    MultiJson,
    /// Avro container file.
    Avro,
    /// Parquet file.
    Parquet,
    /// ORC file.
    Orc,
}

impl DataFormat {
    /// Canonical lowercase name, as the backend expects it.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataFormat::Csv => "csv",
            DataFormat::Tsv => "tsv",
            DataFormat::Psv => "psv",
            DataFormat::Txt => "txt",
            DataFormat::Json => "json",
            DataFormat::MultiJson => "multijson",
            DataFormat::Avro => "avro",
            DataFormat::Parquet => "parquet",
            DataFormat::Orc => "orc",
        }
    }

    /// Binary formats are uploaded as-is and sized as-is by the queuing
    /// policy.
    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            DataFormat::Avro | DataFormat::Parquet | DataFormat::Orc
        )
    }
}

impl std::fmt::Display for DataFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compression applied to a payload before it reached the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// gzip / .gz
    Gzip,
    /// zip archive
    Zip,
}

/// Per-request ingestion settings.
#[derive(Debug, Clone)]
pub struct IngestionProperties {
    /// Target database.
    pub database: String,
    /// Target table.
    pub table: String,
    /// Payload format.
    pub format: DataFormat,
    /// Ask the backend to flush the batch immediately.
    pub flush_immediately: bool,
}

impl IngestionProperties {
    /// Create properties for a database/table pair with the given format.
    pub fn new(
        database: impl Into<String>,
        table: impl Into<String>,
        format: DataFormat,
    ) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            format,
            flush_immediately: false,
        }
    }

    /// Ask the backend to flush the batch immediately.
    pub fn with_flush_immediately(mut self, flush: bool) -> Self {
        self.flush_immediately = flush;
        self
    }

    /// Fails with a configuration error before any resource is touched.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.database.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "database".into(),
            }
            .into());
        }
        if self.table.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "table".into(),
            }
            .into());
        }
        Ok(())
    }
}

/// A payload on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileSource {
    /// Path to the file.
    pub path: PathBuf,
    /// Caller-supplied estimate of the raw (decompressed) size, if known.
    pub raw_size: Option<u64>,
    /// Identity of this payload across retries and fallback.
    pub source_id: Uuid,
}

impl FileSource {
    /// Create a file source with a fresh source id.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            raw_size: None,
            source_id: Uuid::new_v4(),
        }
    }

    /// Set the known raw (decompressed) size.
    pub fn with_raw_size(mut self, size: u64) -> Self {
        self.raw_size = Some(size);
        self
    }

    /// Use a caller-chosen source id.
    pub fn with_source_id(mut self, id: Uuid) -> Self {
        self.source_id = id;
        self
    }

    /// Compression inferred from the file extension.
    pub fn compression(&self) -> Option<Compression> {
        compression_from_extension(&self.path)
    }

    /// Fails if the file does not exist.
    pub fn validate(&self) -> Result<(), IngestError> {
        if !self.path.exists() {
            return Err(SourceError::NotFound {
                path: self.path.display().to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// A payload already sitting in blob storage.
#[derive(Debug, Clone)]
pub struct BlobSource {
    /// Blob URL, possibly credentialed. Never logged verbatim.
    pub blob_uri: String,
    /// Exact blob size from blob metadata, if known up front.
    pub exact_size: Option<u64>,
    /// Compression of the stored blob.
    pub compression: Option<Compression>,
    /// Identity of this payload across retries and fallback.
    pub source_id: Uuid,
}

impl BlobSource {
    /// Create a blob source with a fresh source id.
    pub fn new(blob_uri: impl Into<String>) -> Self {
        Self {
            blob_uri: blob_uri.into(),
            exact_size: None,
            compression: None,
            source_id: Uuid::new_v4(),
        }
    }

    /// Set the exact size from blob metadata.
    pub fn with_exact_size(mut self, size: u64) -> Self {
        self.exact_size = Some(size);
        self
    }

    /// Mark the stored blob as compressed.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = Some(compression);
        self
    }

    /// Use a caller-chosen source id.
    pub fn with_source_id(mut self, id: Uuid) -> Self {
        self.source_id = id;
        self
    }

    /// Fails with a configuration error on a blank URI.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.blob_uri.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "blob_uri".into(),
            }
            .into());
        }
        Ok(())
    }
}

/// A payload read from an arbitrary async byte stream.
///
/// The stream is not assumed to be seekable. Size, when unknown, is
/// discovered by bounded buffering (see [`buffer_prefix`]).
pub struct StreamSource {
    /// The byte stream.
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Caller-supplied size hint, if known.
    pub size_hint: Option<u64>,
    /// Compression of the stream contents.
    pub compression: Option<Compression>,
    /// Identity of this payload across retries and fallback.
    pub source_id: Uuid,
}

impl StreamSource {
    /// Wrap an async reader with a fresh source id.
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            size_hint: None,
            compression: None,
            source_id: Uuid::new_v4(),
        }
    }

    /// Build a stream source over an in-memory buffer; the size hint is the
    /// buffer length.
    pub fn from_bytes(bytes: Bytes) -> Self {
        let len = bytes.len() as u64;
        let mut source = Self::new(Cursor::new(bytes));
        source.size_hint = Some(len);
        source
    }

    /// Set the known payload size.
    pub fn with_size_hint(mut self, size: u64) -> Self {
        self.size_hint = Some(size);
        self
    }

    /// Mark the stream contents as compressed.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = Some(compression);
        self
    }

    /// Use a caller-chosen source id.
    pub fn with_source_id(mut self, id: Uuid) -> Self {
        self.source_id = id;
        self
    }
}

impl std::fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSource")
            .field("size_hint", &self.size_hint)
            .field("compression", &self.compression)
            .field("source_id", &self.source_id)
            .finish_non_exhaustive()
    }
}

/// A fully materialized payload that can be replayed across retries.
#[derive(Debug, Clone)]
pub struct ReplayableSource {
    buf: Bytes,
    pos: usize,
}

impl ReplayableSource {
    /// Wrap a materialized buffer.
    pub fn new(buf: Bytes) -> Self {
        Self { buf, pos: 0 }
    }

    /// Reset the read position to the start of the buffer.
    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    /// Consume from the current position to the end of the buffer.
    pub fn read_remaining(&mut self) -> Bytes {
        let out = self.buf.slice(self.pos..);
        self.pos = self.buf.len();
        out
    }

    /// The full buffer, regardless of read position.
    pub fn bytes(&self) -> Bytes {
        self.buf.clone()
    }

    /// Total buffered length.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Result of bounded prefix buffering on an unknown-size stream.
pub struct PrefixBuffer {
    /// Bytes read from the head of the stream (at most `limit + 1`).
    pub prefix: Bytes,
    /// True if the stream ended within the prefix.
    pub exhausted: bool,
    rest: Option<Box<dyn AsyncRead + Send + Unpin>>,
}

impl PrefixBuffer {
    /// Re-stitch the consumed prefix with the remainder of the stream.
    ///
    /// The returned reader yields exactly the original stream's bytes.
    pub fn into_chained(self) -> Box<dyn AsyncRead + Send + Unpin> {
        let cursor = Cursor::new(self.prefix);
        match self.rest {
            Some(rest) => Box::new(cursor.chain(rest)),
            None => Box::new(cursor),
        }
    }
}

impl std::fmt::Debug for PrefixBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefixBuffer")
            .field("prefix_len", &self.prefix.len())
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

/// Read up to `limit + 1` bytes from a stream of unknown size.
///
/// Reading one byte past the limit is enough to learn whether the payload
/// fits under `limit` without buffering it entirely.
pub async fn buffer_prefix(
    mut reader: Box<dyn AsyncRead + Send + Unpin>,
    limit: u64,
) -> Result<PrefixBuffer, IngestError> {
    let cap = (limit + 1) as usize;
    let mut buf = Vec::with_capacity(cap.min(64 * 1024));
    let mut chunk = [0u8; 16 * 1024];
    let mut exhausted = false;

    while buf.len() < cap {
        let want = (cap - buf.len()).min(chunk.len());
        let n = reader
            .read(&mut chunk[..want])
            .await
            .map_err(SourceError::Io)?;
        if n == 0 {
            exhausted = true;
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Ok(PrefixBuffer {
        prefix: Bytes::from(buf),
        exhausted,
        rest: if exhausted { None } else { Some(reader) },
    })
}

/// Read a whole stream into memory.
pub async fn read_to_bytes(
    mut reader: Box<dyn AsyncRead + Send + Unpin>,
) -> Result<Bytes, IngestError> {
    let mut buf = Vec::new();
    reader
        .read_to_end(&mut buf)
        .await
        .map_err(SourceError::Io)?;
    Ok(Bytes::from(buf))
}

/// Infer compression from a file extension.
pub fn compression_from_extension(path: &Path) -> Option<Compression> {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("gz") | Some("gzip") => Some(Compression::Gzip),
        Some("zip") => Some(Compression::Zip),
        _ => None,
    }
}

/// Sniff compression from the first bytes of a payload.
pub fn sniff_compression(prefix: &[u8]) -> Option<Compression> {
    if prefix.starts_with(&[0x1f, 0x8b]) {
        Some(Compression::Gzip)
    } else if prefix.starts_with(b"PK\x03\x04") {
        Some(Compression::Zip)
    } else {
        None
    }
}
