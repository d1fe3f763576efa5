//! Error types for the ingest broker.
//!
//! Failures are grouped by where they originate (configuration, resource
//! brokerage, backend calls, payload sources) and every error maps onto a
//! single [`ErrorKind`] that callers check instead of matching on variants.

use std::time::Duration;
use thiserror::Error;

/// Coarse classification of an error, used by retry and routing decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid or missing required input; fails before any resource access.
    Configuration,
    /// Throttling, connectivity or timeout; retrying may help.
    Transient,
    /// The backend asserted that retrying cannot help.
    Permanent,
    /// No usable resources, or the retry bound was exceeded.
    ResourceExhausted,
}

/// One resource attempt made by the retry layer, kept for diagnostics.
///
/// The endpoint never contains the embedded credential.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    /// Endpoint of the resource that was tried, without its credential.
    pub endpoint: String,
    /// Storage account the resource belongs to.
    pub account: String,
    /// 1-based attempt number.
    pub attempt: u32,
}

impl std::fmt::Display for AttemptRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}, attempt {})", self.endpoint, self.account, self.attempt)
    }
}

/// Top-level error type for the ingest broker.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Configuration and validation errors.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Resource brokerage errors.
    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),

    /// Errors returned by a backend collaborator.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Errors reading a payload source.
    #[error("source error: {0}")]
    Source(#[from] SourceError),
}

impl IngestError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Config(_) => ErrorKind::Configuration,
            IngestError::Resource(_) => ErrorKind::ResourceExhausted,
            IngestError::Backend(e) => {
                if e.is_permanent() {
                    ErrorKind::Permanent
                } else {
                    ErrorKind::Transient
                }
            }
            IngestError::Source(SourceError::NotFound { .. }) => ErrorKind::Configuration,
            IngestError::Source(_) => ErrorKind::Permanent,
        }
    }

    /// Returns true if retrying this operation may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Returns true if the backend marked this failure as non-retryable.
    pub fn is_permanent(&self) -> bool {
        self.kind() == ErrorKind::Permanent
    }

    /// Returns the retry delay hint if the backend provided one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            IngestError::Backend(BackendError::Throttled { retry_after }) => *retry_after,
            _ => None,
        }
    }
}

/// Configuration and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field was empty or absent.
    #[error("missing required field '{field}'")]
    MissingField {
        /// Name of the field.
        field: String,
    },

    /// A field held an invalid value.
    #[error("invalid value for '{field}': {message}")]
    InvalidValue {
        /// Name of the field.
        field: String,
        /// Why the value was rejected.
        message: String,
    },

    /// An endpoint URL could not be parsed.
    #[error("invalid endpoint URL '{url}': {details}")]
    InvalidEndpoint {
        /// The rejected URL, credential stripped.
        url: String,
        /// Parser diagnostics.
        details: String,
    },

    /// An operation was handed an empty resource list; no rotation is
    /// possible, so this is not retried.
    #[error("{action}: no resources were provided")]
    EmptyResourceList {
        /// The operation that needed resources.
        action: String,
    },

    /// The payload exceeds the direct-path size ceiling.
    #[error("payload of {size} bytes exceeds the streaming ceiling of {max} bytes")]
    PayloadTooLarge {
        /// Observed payload size.
        size: u64,
        /// Configured ceiling.
        max: u64,
    },
}

/// Resource brokerage errors.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// No snapshot has ever been published and the initial fetch failed.
    #[error("no {kind} available: {message}")]
    Unavailable {
        /// What was requested (queues, containers, token).
        kind: &'static str,
        /// Details of the underlying failure.
        message: String,
    },

    /// The published snapshot is older than the configured ceiling.
    #[error("published {kind} snapshot is {age:?} old, exceeding the ceiling of {max:?}")]
    Stale {
        /// What was requested (queues, containers, token).
        kind: &'static str,
        /// Age of the snapshot.
        age: Duration,
        /// Configured staleness ceiling.
        max: Duration,
    },

    /// The retry bound was exhausted with only transient underlying causes.
    #[error("{action}: all {attempts} attempts failed, last error: {source}. Used resources: {}",
            format_history(history))]
    Exhausted {
        /// The operation that was retried.
        action: String,
        /// Configured attempt bound.
        attempts: u32,
        /// Every resource tried, in order.
        history: Vec<AttemptRecord>,
        /// The last underlying error.
        #[source]
        source: Box<IngestError>,
    },
}

fn format_history(history: &[AttemptRecord]) -> String {
    history
        .iter()
        .map(AttemptRecord::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors produced by a backend collaborator.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Connectivity or other transient fault.
    #[error("transient backend failure: {message}")]
    Transient {
        /// Details of the failure.
        message: String,
    },

    /// The backend asked the caller to slow down.
    #[error("backend is throttling requests")]
    Throttled {
        /// Retry delay hint, if provided.
        retry_after: Option<Duration>,
    },

    /// A network attempt exceeded its timeout; treated as transient.
    #[error("backend call timed out after {duration:?}")]
    Timeout {
        /// The timeout that was exceeded.
        duration: Duration,
    },

    /// The backend explicitly marked the failure as non-retryable.
    #[error("permanent backend failure: {message}")]
    Permanent {
        /// Backend error code, if one was returned.
        code: Option<String>,
        /// Details of the failure.
        message: String,
    },

    /// Authorization was denied; non-retryable.
    #[error("authorization denied: {message}")]
    AuthorizationDenied {
        /// Details of the denial.
        message: String,
    },
}

impl BackendError {
    /// Returns true if the backend asserted that retrying cannot help.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            BackendError::Permanent { .. } | BackendError::AuthorizationDenied { .. }
        )
    }
}

/// Errors reading a payload source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source file does not exist.
    #[error("source file not found: {path}")]
    NotFound {
        /// Path that was checked.
        path: String,
    },

    /// Reading the source failed.
    #[error("failed to read source: {0}")]
    Io(#[from] std::io::Error),
}
