//! Background resource brokerage.
//!
//! [`ResourceManager`] owns two refresh loops: one fetching the storage
//! resource listing (ingestion queues and temporary storage containers) and
//! one fetching the ingestion authorization token, each on its own cadence.
//! Consumers never trigger fetches; accessors serve the most recently
//! published snapshot, fail with `Unavailable` before the first successful
//! refresh, and fail with `Stale` once a snapshot outlives the configured
//! ceiling. Each published snapshot is immutable and swapped in atomically,
//! so readers are never blocked by a refresh in flight.

mod refresh;

use crate::backend::{
    ManagementClient, TableResult, COLUMN_AUTH_CONTEXT, COLUMN_RESOURCE_TYPE, COLUMN_STORAGE_ROOT,
    GET_INGESTION_AUTH_TOKEN, RESOURCE_KIND_CONTAINER, RESOURCE_KIND_QUEUE,
    SHOW_INGESTION_RESOURCES,
};
use crate::config::BrokerConfig;
use crate::error::{BackendError, IngestError, ResourceError};
use crate::resources::{
    AccountRanker, AuthToken, ContainerResource, QueueResource, ResourceSnapshot, ResourceUri,
};
use crate::retry::ReliabilitySink;
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use refresh::{RefreshState, RefreshTask};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

struct ManagerInner {
    management: Arc<dyn ManagementClient>,
    snapshot: ArcSwapOption<ResourceSnapshot>,
    token: ArcSwapOption<AuthToken>,
    ranker: AccountRanker,
}

impl ManagerInner {
    async fn refresh_resources(&self) -> Result<(), IngestError> {
        let result = self.management.execute(SHOW_INGESTION_RESOURCES).await?;
        let (queues, containers) = parse_resource_listing(&result)?;
        info!(
            queues = queues.len(),
            containers = containers.len(),
            "publishing storage resource snapshot"
        );
        let snapshot = ResourceSnapshot::new(queues, containers);
        self.ranker.sync_accounts(&snapshot.account_names());
        self.snapshot.store(Some(Arc::new(snapshot)));
        Ok(())
    }

    async fn refresh_token(&self) -> Result<(), IngestError> {
        let result = self.management.execute(GET_INGESTION_AUTH_TOKEN).await?;
        let token = result
            .rows()
            .next()
            .and_then(|row| row.get(COLUMN_AUTH_CONTEXT))
            .filter(|t| !t.is_empty())
            .ok_or_else(|| BackendError::Permanent {
                code: None,
                message: "auth token response held no authorization context".to_string(),
            })?;
        self.token.store(Some(Arc::new(AuthToken::new(token))));
        Ok(())
    }
}

fn parse_resource_listing(
    result: &TableResult,
) -> Result<(Vec<QueueResource>, Vec<ContainerResource>), IngestError> {
    let mut queues = Vec::new();
    let mut containers = Vec::new();
    for row in result.rows() {
        let kind = row.get(COLUMN_RESOURCE_TYPE).unwrap_or_default();
        let root = match row.get(COLUMN_STORAGE_ROOT) {
            Some(root) if !root.is_empty() => root,
            _ => continue,
        };
        match kind {
            RESOURCE_KIND_QUEUE => queues.push(QueueResource::new(ResourceUri::parse(root)?)),
            RESOURCE_KIND_CONTAINER => {
                containers.push(ContainerResource::new(ResourceUri::parse(root)?))
            }
            // Other resource kinds (status tables and the like) are not
            // brokered here.
            _ => {}
        }
    }
    Ok((queues, containers))
}

/// Brokers ingestion resources and the authorization token, refreshing each
/// in the background on its own cadence.
pub struct ResourceManager {
    inner: Arc<ManagerInner>,
    resource_state: Arc<RefreshState>,
    token_state: Arc<RefreshState>,
    tasks: Mutex<Vec<RefreshTask>>,
    max_staleness: Duration,
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager")
            .field("resources_refreshed", &self.resource_state.refreshed_once())
            .field("token_refreshed", &self.token_state.refreshed_once())
            .field("max_staleness", &self.max_staleness)
            .finish()
    }
}

impl ResourceManager {
    /// Start the manager and its two refresh loops. The first refresh of
    /// each loop begins immediately.
    pub fn start(management: Arc<dyn ManagementClient>, config: &BrokerConfig) -> Self {
        let inner = Arc::new(ManagerInner {
            management,
            snapshot: ArcSwapOption::empty(),
            token: ArcSwapOption::empty(),
            ranker: AccountRanker::new(),
        });

        let resource_inner = inner.clone();
        let resource_task = RefreshTask::spawn(
            "ingestion-resources",
            config.resource_refresh_interval,
            move || {
                let inner = resource_inner.clone();
                async move { inner.refresh_resources().await }
            },
        );

        let token_inner = inner.clone();
        let token_task = RefreshTask::spawn(
            "ingestion-auth-token",
            config.token_refresh_interval,
            move || {
                let inner = token_inner.clone();
                async move { inner.refresh_token().await }
            },
        );

        Self {
            inner,
            resource_state: resource_task.state(),
            token_state: token_task.state(),
            tasks: Mutex::new(vec![resource_task, token_task]),
            max_staleness: config.max_staleness,
        }
    }

    /// Wait until both the resource snapshot and the token have been
    /// published at least once.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<(), IngestError> {
        let ready = tokio::join!(
            self.resource_state.wait_refreshed(timeout),
            self.token_state.wait_refreshed(timeout)
        );
        match ready {
            (true, true) => Ok(()),
            (resources_ok, _) => Err(ResourceError::Unavailable {
                kind: if resources_ok {
                    "auth token"
                } else {
                    "storage resources"
                },
                message: format!("no successful refresh within {timeout:?}"),
            }
            .into()),
        }
    }

    fn snapshot(&self, kind: &'static str) -> Result<Arc<ResourceSnapshot>, IngestError> {
        let snapshot = self.inner.snapshot.load_full().ok_or_else(|| {
            ResourceError::Unavailable {
                kind,
                message: "no snapshot has been published yet".to_string(),
            }
        })?;
        let age = snapshot.age();
        if age > self.max_staleness {
            return Err(ResourceError::Stale {
                kind,
                age,
                max: self.max_staleness,
            }
            .into());
        }
        Ok(snapshot)
    }

    /// Ingestion queues, shuffled within accounts and interleaved across
    /// accounts in descending reliability order.
    pub fn shuffled_queues(&self) -> Result<Vec<QueueResource>, IngestError> {
        let snapshot = self.snapshot("ingestion queues")?;
        let order = self.inner.ranker.order_by_rank(&snapshot.account_names());
        Ok(snapshot.shuffled_queues(&order))
    }

    /// Temporary storage containers, shuffled within accounts and
    /// interleaved across accounts in descending reliability order.
    pub fn shuffled_containers(&self) -> Result<Vec<ContainerResource>, IngestError> {
        let snapshot = self.snapshot("storage containers")?;
        let order = self.inner.ranker.order_by_rank(&snapshot.account_names());
        Ok(snapshot.shuffled_containers(&order))
    }

    /// The most recently published ingestion authorization token.
    pub fn ingestion_token(&self) -> Result<Arc<AuthToken>, IngestError> {
        let token = self
            .inner
            .token
            .load_full()
            .ok_or_else(|| ResourceError::Unavailable {
                kind: "auth token",
                message: "no token has been published yet".to_string(),
            })?;
        if token.age() > self.max_staleness {
            return Err(ResourceError::Stale {
                kind: "auth token",
                age: token.age(),
                max: self.max_staleness,
            }
            .into());
        }
        Ok(token)
    }

    /// Feed the outcome of one ingestion attempt into the account ranking.
    ///
    /// Non-blocking; safe to call from concurrent ingestion paths.
    pub fn report_ingestion_result(&self, account: &str, success: bool) {
        self.inner.ranker.report(account, success);
    }

    /// Current reliability score of an account, in `[0.01, 1.0]`.
    pub fn account_score(&self, account: &str) -> f64 {
        self.inner.ranker.score(account)
    }

    /// Stop both refresh loops and wait for them to finish. Idempotent.
    pub async fn close(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.close().await;
        }
    }
}

impl ReliabilitySink for ResourceManager {
    fn report(&self, account: &str, success: bool) {
        self.inner.ranker.report(account, success);
    }
}
