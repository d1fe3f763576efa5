//! Opaque backend collaborators.
//!
//! The broker owns no wire format. It talks to the backend through three
//! object-safe traits: a management command executor (resource and token
//! discovery), a storage operation set (queues and blob containers), and
//! the direct streaming endpoint. Implementations classify their failures
//! as transient or permanent via [`crate::error::BackendError`]; the broker
//! only inspects that classification.

use crate::error::IngestError;
use crate::resources::{ContainerResource, QueueResource};
use crate::source::IngestionProperties;
use async_trait::async_trait;
use bytes::Bytes;

/// Management command to list the current ingestion resources.
pub const SHOW_INGESTION_RESOURCES: &str = ".show ingestion resources";

/// Management command to fetch the ingestion authorization token.
pub const GET_INGESTION_AUTH_TOKEN: &str = ".get ingestion auth token";

/// Column holding the resource kind in a resource listing.
pub const COLUMN_RESOURCE_TYPE: &str = "ResourceTypeName";
/// Column holding the credentialed resource URI in a resource listing.
pub const COLUMN_STORAGE_ROOT: &str = "StorageRoot";
/// Column holding the token in an auth token result.
pub const COLUMN_AUTH_CONTEXT: &str = "AuthorizationContext";

/// Resource kind marking an ingestion queue row.
pub const RESOURCE_KIND_QUEUE: &str = "SecuredReadyForAggregationQueue";
/// Resource kind marking a temporary storage container row.
pub const RESOURCE_KIND_CONTAINER: &str = "TempStorage";

/// Structured rows returned by a management command.
#[derive(Debug, Clone, Default)]
pub struct TableResult {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl TableResult {
    /// Create an empty result with the given column names.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row; extra cells are ignored, missing cells read as absent.
    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    /// Append a row, builder style.
    pub fn with_row(mut self, row: Vec<String>) -> Self {
        self.push_row(row);
        self
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterate over rows with by-name cell access.
    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(move |values| Row {
            columns: &self.columns,
            values,
        })
    }
}

/// One row of a [`TableResult`].
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [String],
    values: &'a [String],
}

impl<'a> Row<'a> {
    /// Cell value by column name.
    pub fn get(&self, column: &str) -> Option<&'a str> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.values.get(index).map(String::as_str)
    }
}

/// Executes management commands against the backend.
#[async_trait]
pub trait ManagementClient: Send + Sync {
    /// Execute a management command and return its rows.
    async fn execute(&self, command: &str) -> Result<TableResult, IngestError>;
}

/// Storage operations against queues and blob containers.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Enqueue an ingestion message on the given queue.
    async fn post_queue_message(
        &self,
        queue: &QueueResource,
        message: &str,
    ) -> Result<(), IngestError>;

    /// Upload a payload as a blob into the given container, optionally
    /// compressing it in transit. Returns the uploaded (original) size.
    async fn upload_stream(
        &self,
        container: &ContainerResource,
        blob_name: &str,
        payload: Bytes,
        compress: bool,
    ) -> Result<u64, IngestError>;
}

/// The low-latency direct ingestion endpoint.
#[async_trait]
pub trait StreamingBackend: Send + Sync {
    /// Stream a materialized payload straight into the target table.
    async fn ingest_stream(
        &self,
        properties: &IngestionProperties,
        payload: Bytes,
        client_request_id: &str,
    ) -> Result<(), IngestError>;

    /// Ask the backend to pull a blob straight into the target table.
    async fn ingest_blob(
        &self,
        properties: &IngestionProperties,
        blob_uri: &str,
        client_request_id: &str,
    ) -> Result<(), IngestError>;
}
