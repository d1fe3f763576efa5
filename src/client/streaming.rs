//! Direct streaming ingestion.

use super::{IngestClient, IngestionOutcome, IngestionResult};
use crate::backend::StreamingBackend;
use crate::error::{ConfigError, IngestError};
use crate::policy::MAX_STREAMING_SIZE;
use crate::source::{
    read_to_bytes, BlobSource, FileSource, IngestionProperties, StreamSource,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Ingests straight into the target table with no intermediate storage.
///
/// Payloads above the streaming ceiling are rejected up front; callers who
/// need unbounded sizes use the queued or managed clients instead.
pub struct StreamingIngestClient {
    backend: Arc<dyn StreamingBackend>,
}

impl StreamingIngestClient {
    /// Create a client over the given streaming backend.
    pub fn new(backend: Arc<dyn StreamingBackend>) -> Self {
        Self { backend }
    }

    /// One streaming attempt with a correlatable request id.
    pub(crate) async fn stream_once(
        &self,
        payload: Bytes,
        properties: &IngestionProperties,
        source_id: Uuid,
        attempt: u32,
    ) -> Result<(), IngestError> {
        let request_id = request_id("ingest_from_stream", source_id, attempt);
        debug!(
            source_id = %source_id,
            attempt,
            size = payload.len(),
            "streaming payload"
        );
        self.backend
            .ingest_stream(properties, payload, &request_id)
            .await
    }

    /// One blob streaming attempt with a correlatable request id.
    pub(crate) async fn blob_once(
        &self,
        blob_uri: &str,
        properties: &IngestionProperties,
        source_id: Uuid,
        attempt: u32,
    ) -> Result<(), IngestError> {
        let request_id = request_id("ingest_from_blob", source_id, attempt);
        self.backend
            .ingest_blob(properties, blob_uri, &request_id)
            .await
    }

    async fn ingest_bytes(
        &self,
        payload: Bytes,
        properties: &IngestionProperties,
        source_id: Uuid,
    ) -> Result<IngestionResult, IngestError> {
        properties.validate()?;
        let size = payload.len() as u64;
        if size > MAX_STREAMING_SIZE {
            return Err(ConfigError::PayloadTooLarge {
                size,
                max: MAX_STREAMING_SIZE,
            }
            .into());
        }
        self.stream_once(payload, properties, source_id, 1).await?;
        Ok(IngestionResult {
            source_id,
            outcome: IngestionOutcome::Streamed { attempts: 1 },
        })
    }
}

fn request_id(operation: &str, source_id: Uuid, attempt: u32) -> String {
    format!("RIC.{operation};{source_id};{attempt}")
}

#[async_trait]
impl IngestClient for StreamingIngestClient {
    async fn ingest_from_file(
        &self,
        source: FileSource,
        properties: &IngestionProperties,
    ) -> Result<IngestionResult, IngestError> {
        source.validate()?;
        let payload = Bytes::from(
            tokio::fs::read(&source.path)
                .await
                .map_err(crate::error::SourceError::Io)?,
        );
        self.ingest_bytes(payload, properties, source.source_id)
            .await
    }

    async fn ingest_from_stream(
        &self,
        source: StreamSource,
        properties: &IngestionProperties,
    ) -> Result<IngestionResult, IngestError> {
        let payload = read_to_bytes(source.reader).await?;
        self.ingest_bytes(payload, properties, source.source_id)
            .await
    }

    async fn ingest_from_blob(
        &self,
        source: BlobSource,
        properties: &IngestionProperties,
    ) -> Result<IngestionResult, IngestError> {
        source.validate()?;
        properties.validate()?;
        self.blob_once(&source.blob_uri, properties, source.source_id, 1)
            .await?;
        Ok(IngestionResult {
            source_id: source.source_id,
            outcome: IngestionOutcome::Streamed { attempts: 1 },
        })
    }
}
