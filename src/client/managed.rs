//! Managed routing between streaming and queued ingestion.

use super::{IngestClient, IngestionOutcome, IngestionResult, QueuedIngestClient, StreamingIngestClient};
use crate::backend::{StorageClient, StreamingBackend};
use crate::config::BrokerConfig;
use crate::error::IngestError;
use crate::manager::ResourceManager;
use crate::policy::{QueuingPolicy, MAX_STREAMING_SIZE};
use crate::retry::ExponentialRetry;
use crate::source::{
    buffer_prefix, read_to_bytes, sniff_compression, BlobSource, Compression, DataFormat,
    FileSource, IngestionProperties, ReplayableSource, StreamSource,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Routes each payload to streaming or queued ingestion.
///
/// Payloads the policy admits are streamed with bounded retries; when the
/// attempts are exhausted on transient failures, the identical bytes are
/// handed to the queued path. Payloads the policy rejects, and streams that
/// turn out larger than the streaming ceiling, go straight to the queue.
/// Permanent streaming errors propagate without fallback.
pub struct ManagedStreamingIngestClient {
    streaming: StreamingIngestClient,
    queued: QueuedIngestClient,
    policy: QueuingPolicy,
    retry: ExponentialRetry,
}

impl ManagedStreamingIngestClient {
    /// Create a managed client over the given broker and backends.
    pub fn new(
        manager: Arc<ResourceManager>,
        storage: Arc<dyn StorageClient>,
        streaming: Arc<dyn StreamingBackend>,
        config: &BrokerConfig,
    ) -> Self {
        Self {
            streaming: StreamingIngestClient::new(streaming),
            queued: QueuedIngestClient::new(manager, storage, config.resource_attempts),
            policy: config.queuing_policy.clone(),
            retry: config.streaming_retry.clone(),
        }
    }

    /// Replace the routing policy with one scaled by `factor`.
    ///
    /// Values above 1 admit larger payloads to the direct path, values
    /// below 1 send more traffic to the queue.
    pub fn set_queuing_policy_factor(&mut self, factor: f64) {
        self.policy = QueuingPolicy::with_factor(factor);
    }

    fn wants_queued(&self, size: u64, compression: Option<Compression>, format: DataFormat) -> bool {
        self.policy
            .should_use_queued(size, compression.is_some(), format)
            .use_queued
    }

    /// Stream a replayable payload with bounded retries.
    ///
    /// Returns the attempt count on success and `None` when every attempt
    /// failed transiently. Permanent errors propagate immediately.
    async fn stream_with_retries(
        &self,
        source: &mut ReplayableSource,
        properties: &IngestionProperties,
        source_id: Uuid,
    ) -> Result<Option<u32>, IngestError> {
        self.retry
            .execute(|attempt| {
                source.rewind();
                let payload = source.bytes();
                async move {
                    match self
                        .streaming
                        .stream_once(payload, properties, source_id, attempt)
                        .await
                    {
                        Ok(()) => Ok(Some(attempt)),
                        Err(err) if err.is_permanent() => Err(err),
                        Err(err) => {
                            info!(
                                source_id = %source_id,
                                attempt,
                                error = %err,
                                "streaming attempt failed"
                            );
                            Ok(None)
                        }
                    }
                }
            })
            .await
    }

    async fn route_payload(
        &self,
        payload: Bytes,
        compression: Option<Compression>,
        source_id: Uuid,
        declared_raw_size: Option<u64>,
        properties: &IngestionProperties,
    ) -> Result<IngestionResult, IngestError> {
        properties.validate()?;

        let size = payload.len() as u64;
        if size > MAX_STREAMING_SIZE || self.wants_queued(size, compression, properties.format) {
            info!(
                source_id = %source_id,
                size,
                "payload exceeds the streaming policy, routing to the queue"
            );
            return self
                .queued
                .ingest_payload(payload, compression, source_id, declared_raw_size, properties)
                .await;
        }

        let mut source = ReplayableSource::new(payload);
        match self
            .stream_with_retries(&mut source, properties, source_id)
            .await?
        {
            Some(attempts) => Ok(IngestionResult {
                source_id,
                outcome: IngestionOutcome::Streamed { attempts },
            }),
            None => {
                warn!(
                    source_id = %source_id,
                    "streaming attempts exhausted, falling back to the queue"
                );
                source.rewind();
                self.queued
                    .ingest_payload(
                        source.bytes(),
                        compression,
                        source_id,
                        declared_raw_size,
                        properties,
                    )
                    .await
            }
        }
    }
}

#[async_trait]
impl IngestClient for ManagedStreamingIngestClient {
    async fn ingest_from_file(
        &self,
        source: FileSource,
        properties: &IngestionProperties,
    ) -> Result<IngestionResult, IngestError> {
        source.validate()?;
        properties.validate()?;
        let compression = source.compression();

        // The declared raw size, or failing that the on-disk byte count,
        // settles admission before the file contents are touched.
        let known_size = match source.raw_size {
            Some(size) => size,
            None => tokio::fs::metadata(&source.path)
                .await
                .map_err(crate::error::SourceError::Io)?
                .len(),
        };
        if self.wants_queued(known_size, compression, properties.format) {
            info!(
                source_id = %source.source_id,
                size = known_size,
                "file size exceeds the streaming policy, routing to the queue"
            );
            let payload = Bytes::from(
                tokio::fs::read(&source.path)
                    .await
                    .map_err(crate::error::SourceError::Io)?,
            );
            return self
                .queued
                .ingest_payload(
                    payload,
                    compression,
                    source.source_id,
                    source.raw_size,
                    properties,
                )
                .await;
        }

        let payload = Bytes::from(
            tokio::fs::read(&source.path)
                .await
                .map_err(crate::error::SourceError::Io)?,
        );
        self.route_payload(
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
        properties.validate()?;
        let StreamSource {
            reader,
            size_hint,
            compression,
            source_id,
        } = source;

        // A trusted size hint over the policy routes to the queue without
        // touching the stream.
        if let Some(size) = size_hint {
            if self.wants_queued(size, compression, properties.format) {
                info!(
                    source_id = %source_id,
                    size,
                    "size hint exceeds the streaming policy, routing to the queue"
                );
                let payload = read_to_bytes(reader).await?;
                return self
                    .queued
                    .ingest_payload(payload, compression, source_id, None, properties)
                    .await;
            }
        }

        // Unknown or admitted size: buffer one byte past the streaming
        // ceiling to learn whether the stream fits.
        let buffered = buffer_prefix(reader, MAX_STREAMING_SIZE).await?;
        // Callers often hand over opaque streams without declaring their
        // compression; the magic bytes settle it.
        let compression = compression.or_else(|| sniff_compression(&buffered.prefix));
        if buffered.exhausted {
            let payload = buffered.prefix.clone();
            self.route_payload(payload, compression, source_id, None, properties)
                .await
        } else {
            // Larger than the ceiling. Re-stitch the consumed prefix with
            // the remainder so the queued path sees the original bytes.
            info!(
                source_id = %source_id,
                "stream exceeds the streaming ceiling, routing to the queue"
            );
            let payload = read_to_bytes(buffered.into_chained()).await?;
            self.queued
                .ingest_payload(payload, compression, source_id, None, properties)
                .await
        }
    }

    async fn ingest_from_blob(
        &self,
        source: BlobSource,
        properties: &IngestionProperties,
    ) -> Result<IngestionResult, IngestError> {
        source.validate()?;
        properties.validate()?;

        if let Some(size) = source.exact_size {
            if self.wants_queued(size, source.compression, properties.format) {
                info!(
                    source_id = %source.source_id,
                    size,
                    "blob exceeds the streaming policy, routing to the queue"
                );
                return self.queued.ingest_from_blob(source, properties).await;
            }
        }

        let outcome = self
            .retry
            .execute(|attempt| {
                let blob_uri = source.blob_uri.clone();
                async move {
                    match self
                        .streaming
                        .blob_once(&blob_uri, properties, source.source_id, attempt)
                        .await
                    {
                        Ok(()) => Ok(Some(attempt)),
                        Err(err) if err.is_permanent() => Err(err),
                        Err(err) => {
                            info!(
                                source_id = %source.source_id,
                                attempt,
                                error = %err,
                                "blob streaming attempt failed"
                            );
                            Ok(None)
                        }
                    }
                }
            })
            .await?;

        match outcome {
            Some(attempts) => Ok(IngestionResult {
                source_id: source.source_id,
                outcome: IngestionOutcome::Streamed { attempts },
            }),
            None => {
                warn!(
                    source_id = %source.source_id,
                    "blob streaming attempts exhausted, falling back to the queue"
                );
                self.queued.ingest_from_blob(source, properties).await
            }
        }
    }
}
