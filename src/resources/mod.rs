//! Ingestion resource types.
//!
//! A resource is a credentialed handle to a queue or blob container on a
//! specific backend storage account. Credentials are embedded in the
//! resource URI; they are held as secrets and never appear in logs,
//! attempt records or `Debug` output.

mod ranking;
mod shuffle;

pub use ranking::AccountRanker;
pub use shuffle::{group_by_account, interleave_by_rank, round_robin_nested};

use crate::error::{ConfigError, IngestError};
use secrecy::{ExposeSecret, SecretString};
use tokio::time::Instant;
use url::Url;

/// Identity shared by every rotation-eligible resource.
pub trait IngestResource: Send + Sync {
    /// Storage account the resource lives on.
    fn account_name(&self) -> &str;

    /// Endpoint URL with the credential stripped; safe to log.
    fn endpoint(&self) -> &str;
}

/// An endpoint URL with an embedded credential.
#[derive(Clone)]
pub struct ResourceUri {
    full: SecretString,
    redacted: String,
    account: String,
}

impl ResourceUri {
    /// Parse a credentialed URI.
    ///
    /// The account name is the first label of the host; the redacted form
    /// drops the query string, which is where the credential lives.
    pub fn parse(raw: &str) -> Result<Self, IngestError> {
        let url = Url::parse(raw).map_err(|e| ConfigError::InvalidEndpoint {
            url: strip_query(raw),
            details: e.to_string(),
        })?;

        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::InvalidEndpoint {
                url: strip_query(raw),
                details: "missing host".into(),
            })?
            .to_string();

        let account = host
            .split('.')
            .next()
            .unwrap_or(&host)
            .to_string();

        let redacted = match url.port() {
            Some(port) => format!("{}://{}:{}{}", url.scheme(), host, port, url.path()),
            None => format!("{}://{}{}", url.scheme(), host, url.path()),
        };

        Ok(Self {
            full: SecretString::new(raw.to_string()),
            redacted,
            account,
        })
    }

    /// Endpoint without the credential; safe to log.
    pub fn endpoint(&self) -> &str {
        &self.redacted
    }

    /// Storage account name derived from the host.
    pub fn account_name(&self) -> &str {
        &self.account
    }

    /// The full credentialed URI.
    ///
    /// Only hand this to a storage collaborator; never log it.
    pub fn credentialed(&self) -> &str {
        self.full.expose_secret()
    }

    /// Credentialed URL of a blob under this container URI.
    pub fn blob_url(&self, blob_name: &str) -> String {
        let raw = self.full.expose_secret();
        match raw.split_once('?') {
            Some((base, query)) => {
                format!("{}/{}?{}", base.trim_end_matches('/'), blob_name, query)
            }
            None => format!("{}/{}", raw.trim_end_matches('/'), blob_name),
        }
    }
}

fn strip_query(raw: &str) -> String {
    raw.split('?').next().unwrap_or(raw).to_string()
}

impl std::fmt::Debug for ResourceUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceUri")
            .field("endpoint", &self.redacted)
            .field("account", &self.account)
            .field("credential", &"[REDACTED]")
            .finish()
    }
}

impl std::fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.redacted)
    }
}

/// A ranked, credentialed ingestion queue.
#[derive(Debug, Clone)]
pub struct QueueResource {
    uri: ResourceUri,
}

impl QueueResource {
    /// Wrap a parsed resource URI.
    pub fn new(uri: ResourceUri) -> Self {
        Self { uri }
    }

    /// The underlying credentialed URI.
    pub fn uri(&self) -> &ResourceUri {
        &self.uri
    }
}

impl IngestResource for QueueResource {
    fn account_name(&self) -> &str {
        self.uri.account_name()
    }

    fn endpoint(&self) -> &str {
        self.uri.endpoint()
    }
}

/// A ranked, credentialed blob container.
#[derive(Debug, Clone)]
pub struct ContainerResource {
    uri: ResourceUri,
}

impl ContainerResource {
    /// Wrap a parsed resource URI.
    pub fn new(uri: ResourceUri) -> Self {
        Self { uri }
    }

    /// The underlying credentialed URI.
    pub fn uri(&self) -> &ResourceUri {
        &self.uri
    }
}

impl IngestResource for ContainerResource {
    fn account_name(&self) -> &str {
        self.uri.account_name()
    }

    fn endpoint(&self) -> &str {
        self.uri.endpoint()
    }
}

/// A cached ingestion authorization token.
#[derive(Clone)]
pub struct AuthToken {
    token: SecretString,
    fetched_at: Instant,
}

impl AuthToken {
    /// Wrap a freshly fetched token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::new(token.into()),
            fetched_at: Instant::now(),
        }
    }

    /// The token value. Never log it.
    pub fn secret(&self) -> &str {
        self.token.expose_secret()
    }

    /// Age of the token since it was fetched.
    pub fn age(&self) -> std::time::Duration {
        self.fetched_at.elapsed()
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("token", &"[REDACTED]")
            .field("fetched_at", &self.fetched_at)
            .finish()
    }
}

/// Point-in-time view of all usable ingestion resources.
///
/// Immutable once published; the resource manager replaces it atomically
/// and never mutates it in place. Each account's sublist order is
/// randomized once, here, so callers within one snapshot's lifetime do not
/// hot-spot a single resource inside an account.
#[derive(Debug)]
pub struct ResourceSnapshot {
    queues_by_account: Vec<(String, Vec<QueueResource>)>,
    containers_by_account: Vec<(String, Vec<ContainerResource>)>,
    fetched_at: Instant,
}

impl ResourceSnapshot {
    /// Build a snapshot from freshly fetched resources.
    pub fn new(queues: Vec<QueueResource>, containers: Vec<ContainerResource>) -> Self {
        Self {
            queues_by_account: group_by_account(queues),
            containers_by_account: group_by_account(containers),
            fetched_at: Instant::now(),
        }
    }

    /// Every account that appears in this snapshot.
    pub fn account_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .queues_by_account
            .iter()
            .map(|(name, _)| name.clone())
            .chain(
                self.containers_by_account
                    .iter()
                    .map(|(name, _)| name.clone()),
            )
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Queues interleaved across accounts in the given rank order.
    pub fn shuffled_queues(&self, account_order: &[String]) -> Vec<QueueResource> {
        interleave_by_rank(&self.queues_by_account, account_order)
    }

    /// Containers interleaved across accounts in the given rank order.
    pub fn shuffled_containers(&self, account_order: &[String]) -> Vec<ContainerResource> {
        interleave_by_rank(&self.containers_by_account, account_order)
    }

    /// Age of the snapshot since it was fetched.
    pub fn age(&self) -> std::time::Duration {
        self.fetched_at.elapsed()
    }
}
