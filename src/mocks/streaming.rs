use crate::backend::StreamingBackend;
use crate::error::{BackendError, IngestError};
use crate::source::IngestionProperties;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// A recorded streaming attempt.
#[derive(Debug, Clone)]
pub struct StreamingCall {
    /// Target database.
    pub database: String,
    /// Target table.
    pub table: String,
    /// The streamed bytes, or `None` for blob calls.
    pub payload: Option<Bytes>,
    /// The blob URI, or `None` for payload calls.
    pub blob_uri: Option<String>,
    /// Correlation id sent with the attempt.
    pub client_request_id: String,
}

/// Recording streaming double with a scripted outcome per attempt.
///
/// Scripted outcomes are consumed in order across both payload and blob
/// calls; once the script is empty every attempt succeeds.
#[derive(Default)]
pub struct MockStreamingBackend {
    calls: Mutex<Vec<StreamingCall>>,
    outcomes: Mutex<VecDeque<Result<(), BackendError>>>,
}

impl MockStreamingBackend {
    /// Create a double that succeeds on every attempt.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the outcome of the next attempt.
    pub fn enqueue(&self, outcome: Result<(), BackendError>) {
        self.outcomes.lock().push_back(outcome);
    }

    /// Script `n` transient failures.
    pub fn enqueue_transient_failures(&self, n: usize) {
        let mut outcomes = self.outcomes.lock();
        for _ in 0..n {
            outcomes.push_back(Err(BackendError::Transient {
                message: "streaming endpoint unavailable".to_string(),
            }));
        }
    }

    /// Recorded attempts, in order.
    pub fn calls(&self) -> Vec<StreamingCall> {
        self.calls.lock().clone()
    }

    fn next_outcome(&self) -> Result<(), BackendError> {
        self.outcomes.lock().pop_front().unwrap_or(Ok(()))
    }
}

#[async_trait]
impl StreamingBackend for MockStreamingBackend {
    async fn ingest_stream(
        &self,
        properties: &IngestionProperties,
        payload: Bytes,
        client_request_id: &str,
    ) -> Result<(), IngestError> {
        self.calls.lock().push(StreamingCall {
            database: properties.database.clone(),
            table: properties.table.clone(),
            payload: Some(payload),
            blob_uri: None,
            client_request_id: client_request_id.to_string(),
        });
        self.next_outcome().map_err(IngestError::from)
    }

    async fn ingest_blob(
        &self,
        properties: &IngestionProperties,
        blob_uri: &str,
        client_request_id: &str,
    ) -> Result<(), IngestError> {
        self.calls.lock().push(StreamingCall {
            database: properties.database.clone(),
            table: properties.table.clone(),
            payload: None,
            blob_uri: Some(blob_uri.to_string()),
            client_request_id: client_request_id.to_string(),
        });
        self.next_outcome().map_err(IngestError::from)
    }
}
