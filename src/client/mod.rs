//! Ingestion clients.
//!
//! Three clients implement [`IngestClient`]. [`QueuedIngestClient`] uploads
//! the payload to temporary storage and enqueues an ingestion message; it is
//! durable and handles any size. [`StreamingIngestClient`] pushes the
//! payload straight into the table for low latency, bounded by the
//! streaming size ceiling. [`ManagedStreamingIngestClient`] routes between
//! the two: small payloads stream with bounded retries, large or repeatedly
//! failing ones fall back to the queued path with byte-identical content.

mod managed;
mod queued;
mod streaming;

pub use managed::ManagedStreamingIngestClient;
pub use queued::QueuedIngestClient;
pub use streaming::StreamingIngestClient;

use crate::error::IngestError;
use crate::source::{BlobSource, FileSource, IngestionProperties, StreamSource};
use async_trait::async_trait;
use uuid::Uuid;

/// How an ingestion was ultimately delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestionOutcome {
    /// The payload was streamed directly into the table.
    Streamed {
        /// Number of streaming attempts made, including the successful one.
        attempts: u32,
    },
    /// The payload was uploaded to temporary storage and enqueued.
    Queued {
        /// Credential-free path of the uploaded blob, empty for blob
        /// sources that were enqueued in place.
        blob_path: String,
    },
}

/// Outcome of a completed ingestion request.
#[derive(Debug, Clone)]
pub struct IngestionResult {
    /// Identifier of the ingested source, for correlation.
    pub source_id: Uuid,
    /// The path the payload took.
    pub outcome: IngestionOutcome,
}

/// Common surface of every ingestion client.
#[async_trait]
pub trait IngestClient: Send + Sync {
    /// Ingest a local file.
    async fn ingest_from_file(
        &self,
        source: FileSource,
        properties: &IngestionProperties,
    ) -> Result<IngestionResult, IngestError>;

    /// Ingest from an in-memory or streaming reader.
    async fn ingest_from_stream(
        &self,
        source: StreamSource,
        properties: &IngestionProperties,
    ) -> Result<IngestionResult, IngestError>;

    /// Ingest a blob already sitting in accessible storage.
    async fn ingest_from_blob(
        &self,
        source: BlobSource,
        properties: &IngestionProperties,
    ) -> Result<IngestionResult, IngestError>;
}
