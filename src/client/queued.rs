//! Durable queued ingestion.

use super::{IngestClient, IngestionOutcome, IngestionResult};
use crate::backend::StorageClient;
use crate::error::IngestError;
use crate::manager::ResourceManager;
use crate::retry::resource_action_with_retries;
use crate::source::{
    read_to_bytes, BlobSource, Compression, DataFormat, FileSource, IngestionProperties,
    StreamSource,
};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Message enqueued for the ingestion service, one per uploaded blob.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestionMessage<'a> {
    id: Uuid,
    blob_path: &'a str,
    raw_data_size: u64,
    database_name: &'a str,
    table_name: &'a str,
    retain_blob_on_success: bool,
    flush_immediately: bool,
    additional_properties: AdditionalProperties<'a>,
}

#[derive(Debug, Serialize)]
struct AdditionalProperties<'a> {
    format: &'a str,
}

/// Ingests through temporary storage and the ingestion queue.
///
/// Uploads and queue posts each rotate through the ranked resource lists
/// published by the [`ResourceManager`], reporting per-account outcomes
/// back to it.
pub struct QueuedIngestClient {
    manager: Arc<ResourceManager>,
    storage: Arc<dyn StorageClient>,
    attempts: u32,
}

impl QueuedIngestClient {
    /// Create a client over the given broker and storage backend.
    pub fn new(
        manager: Arc<ResourceManager>,
        storage: Arc<dyn StorageClient>,
        attempts: u32,
    ) -> Self {
        Self {
            manager,
            storage,
            attempts,
        }
    }

    /// Upload a materialized payload and enqueue it for ingestion.
    ///
    /// `declared_raw_size` is the caller's uncompressed size, reported to
    /// the ingestion service in place of the payload byte count when given.
    pub(crate) async fn ingest_payload(
        &self,
        payload: Bytes,
        compression: Option<Compression>,
        source_id: Uuid,
        declared_raw_size: Option<u64>,
        properties: &IngestionProperties,
    ) -> Result<IngestionResult, IngestError> {
        properties.validate()?;

        let raw_size = declared_raw_size.unwrap_or(payload.len() as u64);
        let compress = should_compress(compression, properties.format);
        let blob_name = blob_name(properties, source_id, compression, compress);

        let containers = self.manager.shuffled_containers()?;
        let storage = self.storage.clone();
        let (blob_uri, blob_path) = resource_action_with_retries(
            self.manager.as_ref(),
            &containers,
            self.attempts,
            "upload payload to storage",
            |container| {
                let storage = storage.clone();
                let payload = payload.clone();
                let blob_name = blob_name.clone();
                let blob_uri = container.uri().blob_url(&blob_name);
                let blob_path = format!("{}/{}", container.uri().endpoint(), blob_name);
                async move {
                    storage
                        .upload_stream(&container, &blob_name, payload, compress)
                        .await?;
                    Ok((blob_uri, blob_path))
                }
            },
        )
        .await?;
        debug!(blob = %blob_path, size = raw_size, "payload uploaded");

        self.enqueue(&blob_uri, raw_size, source_id, properties)
            .await?;

        Ok(IngestionResult {
            source_id,
            outcome: IngestionOutcome::Queued { blob_path },
        })
    }

    /// Enqueue an ingestion message referencing an already uploaded blob.
    pub(crate) async fn enqueue(
        &self,
        blob_uri: &str,
        raw_size: u64,
        source_id: Uuid,
        properties: &IngestionProperties,
    ) -> Result<(), IngestError> {
        let message = IngestionMessage {
            id: source_id,
            blob_path: blob_uri,
            raw_data_size: raw_size,
            database_name: &properties.database,
            table_name: &properties.table,
            retain_blob_on_success: true,
            flush_immediately: properties.flush_immediately,
            additional_properties: AdditionalProperties {
                format: properties.format.as_str(),
            },
        };
        let body = serde_json::to_string(&message).map_err(|e| {
            crate::error::BackendError::Permanent {
                code: None,
                message: format!("failed to encode ingestion message: {e}"),
            }
        })?;

        let queues = self.manager.shuffled_queues()?;
        let storage = self.storage.clone();
        resource_action_with_retries(
            self.manager.as_ref(),
            &queues,
            self.attempts,
            "post ingestion message",
            |queue| {
                let storage = storage.clone();
                let body = body.clone();
                async move { storage.post_queue_message(&queue, &body).await }
            },
        )
        .await?;
        debug!(source_id = %source_id, "ingestion message enqueued");
        Ok(())
    }
}

fn should_compress(compression: Option<Compression>, format: DataFormat) -> bool {
    compression.is_none() && !format.is_binary()
}

fn blob_name(
    properties: &IngestionProperties,
    source_id: Uuid,
    compression: Option<Compression>,
    compress: bool,
) -> String {
    let mut name = format!(
        "{}__{}__{}.{}",
        properties.database,
        properties.table,
        source_id,
        properties.format.as_str()
    );
    match compression {
        Some(Compression::Gzip) => name.push_str(".gz"),
        Some(Compression::Zip) => name.push_str(".zip"),
        None if compress => name.push_str(".gz"),
        None => {}
    }
    name
}

#[async_trait]
impl IngestClient for QueuedIngestClient {
    async fn ingest_from_file(
        &self,
        source: FileSource,
        properties: &IngestionProperties,
    ) -> Result<IngestionResult, IngestError> {
        source.validate()?;
        let compression = source.compression();
        let payload = Bytes::from(
            tokio::fs::read(&source.path)
                .await
                .map_err(crate::error::SourceError::Io)?,
        );
        self.ingest_payload(
            payload,
            compression,
            source.source_id,
            source.raw_size,
            properties,
        )
        .await
    }

    async fn ingest_from_stream(
        &self,
        source: StreamSource,
        properties: &IngestionProperties,
    ) -> Result<IngestionResult, IngestError> {
        let StreamSource {
            reader,
            compression,
            source_id,
            ..
        } = source;
        let payload = read_to_bytes(reader).await?;
        self.ingest_payload(payload, compression, source_id, None, properties)
            .await
    }

    async fn ingest_from_blob(
        &self,
        source: BlobSource,
        properties: &IngestionProperties,
    ) -> Result<IngestionResult, IngestError> {
        source.validate()?;
        properties.validate()?;
        let raw_size = source.exact_size.unwrap_or(0);
        self.enqueue(&source.blob_uri, raw_size, source.source_id, properties)
            .await?;
        let blob_path = source
            .blob_uri
            .split('?')
            .next()
            .unwrap_or_default()
            .to_string();
        Ok(IngestionResult {
            source_id: source.source_id,
            outcome: IngestionOutcome::Queued { blob_path },
        })
    }
}
