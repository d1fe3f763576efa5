//! Broker configuration.
//!
//! [`BrokerConfig`] gathers every tunable in one validated struct: the two
//! refresh cadences, the staleness ceiling, retry budgets and backoff
//! shape, and the queuing policy knobs. Build one with
//! [`BrokerConfig::builder`] or load overrides from `INGEST_BROKER_*`
//! environment variables with [`BrokerConfig::from_env`].

use crate::endpoints;
use crate::error::{ConfigError, IngestError};
use crate::policy::QueuingPolicy;
use crate::retry::{ExponentialRetry, DEFAULT_RESOURCE_ATTEMPTS};
use std::time::Duration;

/// Default interval between storage resource refreshes.
pub const DEFAULT_RESOURCE_REFRESH: Duration = Duration::from_secs(60 * 60);

/// Default interval between authorization token refreshes.
pub const DEFAULT_TOKEN_REFRESH: Duration = Duration::from_secs(40 * 60);

/// Validated broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Ingestion endpoint URL, if the broker addresses a cluster directly.
    pub cluster_url: Option<String>,
    /// Interval between storage resource refreshes.
    pub resource_refresh_interval: Duration,
    /// Interval between authorization token refreshes.
    pub token_refresh_interval: Duration,
    /// Oldest snapshot age accessors will still serve.
    pub max_staleness: Duration,
    /// Attempt bound for resource-scoped actions.
    pub resource_attempts: u32,
    /// Backoff shape for streaming attempts.
    pub streaming_retry: ExponentialRetry,
    /// Size and format based routing policy.
    pub queuing_policy: QueuingPolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::builder().build_unchecked()
    }
}

impl BrokerConfig {
    /// Start building a configuration from defaults.
    pub fn builder() -> BrokerConfigBuilder {
        BrokerConfigBuilder::default()
    }

    /// Build from defaults plus `INGEST_BROKER_*` environment overrides.
    ///
    /// Recognized variables: `INGEST_BROKER_CLUSTER_URL`,
    /// `INGEST_BROKER_RESOURCE_REFRESH_SECS`,
    /// `INGEST_BROKER_TOKEN_REFRESH_SECS`,
    /// `INGEST_BROKER_MAX_STALENESS_SECS`,
    /// `INGEST_BROKER_RESOURCE_ATTEMPTS`,
    /// `INGEST_BROKER_QUEUING_FACTOR`.
    pub fn from_env() -> Result<Self, IngestError> {
        let mut builder = Self::builder();

        if let Ok(url) = std::env::var("INGEST_BROKER_CLUSTER_URL") {
            builder = builder.cluster_url(url);
        }
        if let Some(secs) = env_u64("INGEST_BROKER_RESOURCE_REFRESH_SECS")? {
            builder = builder.resource_refresh_interval(Duration::from_secs(secs));
        }
        if let Some(secs) = env_u64("INGEST_BROKER_TOKEN_REFRESH_SECS")? {
            builder = builder.token_refresh_interval(Duration::from_secs(secs));
        }
        if let Some(secs) = env_u64("INGEST_BROKER_MAX_STALENESS_SECS")? {
            builder = builder.max_staleness(Duration::from_secs(secs));
        }
        if let Some(attempts) = env_u64("INGEST_BROKER_RESOURCE_ATTEMPTS")? {
            builder = builder.resource_attempts(attempts as u32);
        }
        if let Some(factor) = env_f64("INGEST_BROKER_QUEUING_FACTOR")? {
            builder = builder.queuing_policy(QueuingPolicy::with_factor(factor));
        }

        builder.build()
    }

    /// The ingestion endpoint derived from the cluster URL, if set.
    pub fn ingestion_endpoint(&self) -> Option<String> {
        self.cluster_url
            .as_deref()
            .map(endpoints::ingestion_endpoint)
    }
}

/// Builder for [`BrokerConfig`].
#[derive(Debug, Clone)]
pub struct BrokerConfigBuilder {
    cluster_url: Option<String>,
    resource_refresh_interval: Duration,
    token_refresh_interval: Duration,
    max_staleness: Option<Duration>,
    resource_attempts: u32,
    streaming_retry: ExponentialRetry,
    queuing_policy: QueuingPolicy,
}

impl Default for BrokerConfigBuilder {
    fn default() -> Self {
        Self {
            cluster_url: None,
            resource_refresh_interval: DEFAULT_RESOURCE_REFRESH,
            token_refresh_interval: DEFAULT_TOKEN_REFRESH,
            max_staleness: None,
            resource_attempts: DEFAULT_RESOURCE_ATTEMPTS,
            streaming_retry: ExponentialRetry::default(),
            queuing_policy: QueuingPolicy::default(),
        }
    }
}

impl BrokerConfigBuilder {
    /// Target cluster URL; the ingestion endpoint is derived from it.
    pub fn cluster_url(mut self, url: impl Into<String>) -> Self {
        self.cluster_url = Some(url.into());
        self
    }

    /// Interval between storage resource refreshes.
    pub fn resource_refresh_interval(mut self, interval: Duration) -> Self {
        self.resource_refresh_interval = interval;
        self
    }

    /// Interval between authorization token refreshes.
    pub fn token_refresh_interval(mut self, interval: Duration) -> Self {
        self.token_refresh_interval = interval;
        self
    }

    /// Oldest snapshot age accessors will still serve. Defaults to three
    /// resource refresh intervals.
    pub fn max_staleness(mut self, ceiling: Duration) -> Self {
        self.max_staleness = Some(ceiling);
        self
    }

    /// Attempt bound for resource-scoped actions.
    pub fn resource_attempts(mut self, attempts: u32) -> Self {
        self.resource_attempts = attempts;
        self
    }

    /// Backoff shape for streaming attempts.
    pub fn streaming_retry(mut self, retry: ExponentialRetry) -> Self {
        self.streaming_retry = retry;
        self
    }

    /// Size and format based routing policy.
    pub fn queuing_policy(mut self, policy: QueuingPolicy) -> Self {
        self.queuing_policy = policy;
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<BrokerConfig, IngestError> {
        if let Some(url) = &self.cluster_url {
            url::Url::parse(url).map_err(|e| ConfigError::InvalidEndpoint {
                url: url.clone(),
                details: e.to_string(),
            })?;
        }
        if self.resource_refresh_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "resource_refresh_interval".to_string(),
                message: "must be greater than zero".to_string(),
            }
            .into());
        }
        if self.token_refresh_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "token_refresh_interval".to_string(),
                message: "must be greater than zero".to_string(),
            }
            .into());
        }
        if self.resource_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "resource_attempts".to_string(),
                message: "must be at least 1".to_string(),
            }
            .into());
        }
        if self.queuing_policy.factor() <= 0.0 || !self.queuing_policy.factor().is_finite() {
            return Err(ConfigError::InvalidValue {
                field: "queuing_policy.factor".to_string(),
                message: "must be a positive finite number".to_string(),
            }
            .into());
        }
        Ok(self.build_unchecked())
    }

    fn build_unchecked(self) -> BrokerConfig {
        let max_staleness = self
            .max_staleness
            .unwrap_or(self.resource_refresh_interval * 3);
        BrokerConfig {
            cluster_url: self.cluster_url,
            resource_refresh_interval: self.resource_refresh_interval,
            token_refresh_interval: self.token_refresh_interval,
            max_staleness,
            resource_attempts: self.resource_attempts,
            streaming_retry: self.streaming_retry,
            queuing_policy: self.queuing_policy,
        }
    }
}

fn env_u64(name: &str) -> Result<Option<u64>, IngestError> {
    match std::env::var(name) {
        Ok(raw) => {
            let value = raw.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                field: name.to_string(),
                message: format!("'{raw}' is not a valid integer"),
            })?;
            Ok(Some(value))
        }
        Err(_) => Ok(None),
    }
}

fn env_f64(name: &str) -> Result<Option<f64>, IngestError> {
    match std::env::var(name) {
        Ok(raw) => {
            let value = raw.parse::<f64>().map_err(|_| ConfigError::InvalidValue {
                field: name.to_string(),
                message: format!("'{raw}' is not a valid number"),
            })?;
            Ok(Some(value))
        }
        Err(_) => Ok(None),
    }
}
