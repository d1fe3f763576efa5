//! Client-side resource brokerage and managed ingestion routing.
//!
//! The broker keeps two backend artifacts warm in the background: the list
//! of storage resources (ingestion queues and temporary containers) and the
//! ingestion authorization token, each refreshed on its own cadence by
//! [`manager::ResourceManager`]. Consumers read ranked, shuffled resource
//! lists from the latest published snapshot and never wait on a fetch.
//!
//! On top of the broker sit three ingestion clients:
//!
//! - [`client::QueuedIngestClient`] uploads payloads to temporary storage
//!   and enqueues ingestion messages, rotating through ranked resources
//!   with bounded retries.
//! - [`client::StreamingIngestClient`] pushes payloads straight into the
//!   target table for low latency.
//! - [`client::ManagedStreamingIngestClient`] routes between the two: a
//!   size and format policy decides which payloads may stream, streaming
//!   failures are retried with exponential backoff, and exhausted payloads
//!   fall back to the queued path byte for byte.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ingest_broker::client::{IngestClient, ManagedStreamingIngestClient};
//! use ingest_broker::config::BrokerConfig;
//! use ingest_broker::manager::ResourceManager;
//! use ingest_broker::source::{DataFormat, IngestionProperties, StreamSource};
//! # use ingest_broker::backend::{ManagementClient, StorageClient, StreamingBackend};
//! # async fn run(
//! #     management: Arc<dyn ManagementClient>,
//! #     storage: Arc<dyn StorageClient>,
//! #     streaming: Arc<dyn StreamingBackend>,
//! # ) -> Result<(), ingest_broker::IngestError> {
//! let config = BrokerConfig::builder()
//!     .cluster_url("https://mycluster.region.example.net")
//!     .build()?;
//! let manager = Arc::new(ResourceManager::start(management, &config));
//! manager.wait_until_ready(std::time::Duration::from_secs(30)).await?;
//!
//! let client = ManagedStreamingIngestClient::new(manager, storage, streaming, &config);
//! let properties = IngestionProperties::new("telemetry", "events", DataFormat::Csv);
//! let source = StreamSource::from_bytes("a,b\n1,2\n".into());
//! let result = client.ingest_from_stream(source, &properties).await?;
//! println!("{:?}", result.outcome);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod backend;
pub mod client;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod manager;
pub mod mocks;
pub mod policy;
pub mod resources;
pub mod retry;
pub mod source;

pub use client::{IngestClient, IngestionOutcome, IngestionResult};
pub use config::BrokerConfig;
pub use error::{ErrorKind, IngestError};
pub use manager::ResourceManager;

/// Convenience alias for broker results.
pub type Result<T> = std::result::Result<T, IngestError>;
