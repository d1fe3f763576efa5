use crate::backend::{
    ManagementClient, TableResult, COLUMN_AUTH_CONTEXT, COLUMN_RESOURCE_TYPE, COLUMN_STORAGE_ROOT,
    GET_INGESTION_AUTH_TOKEN, RESOURCE_KIND_CONTAINER, RESOURCE_KIND_QUEUE,
    SHOW_INGESTION_RESOURCES,
};
use crate::error::{BackendError, IngestError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Scripted management command executor.
///
/// Responses are consumed per command in the order they were enqueued.
/// After a successful response is consumed it becomes the replay value for
/// that command, so periodic refresh loops keep receiving data without an
/// endless script.
#[derive(Default)]
pub struct MockManagementClient {
    resources: Mutex<Script>,
    tokens: Mutex<Script>,
    commands: Mutex<Vec<String>>,
}

#[derive(Default)]
struct Script {
    queued: VecDeque<Result<TableResult, BackendError>>,
    replay: Option<TableResult>,
}

impl Script {
    fn next(&mut self) -> Result<TableResult, BackendError> {
        match self.queued.pop_front() {
            Some(Ok(result)) => {
                self.replay = Some(result.clone());
                Ok(result)
            }
            Some(Err(err)) => Err(err),
            None => match &self.replay {
                Some(result) => Ok(result.clone()),
                None => Err(BackendError::Transient {
                    message: "no scripted response".to_string(),
                }),
            },
        }
    }
}

impl MockManagementClient {
    /// Create a client with empty scripts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a resource listing response.
    pub fn enqueue_resources(&self, response: Result<TableResult, BackendError>) {
        self.resources.lock().queued.push_back(response);
    }

    /// Enqueue an auth token response.
    pub fn enqueue_token(&self, response: Result<TableResult, BackendError>) {
        self.tokens.lock().queued.push_back(response);
    }

    /// Every command executed so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    /// Build a resource listing from `(kind, uri)` pairs.
    pub fn resource_listing(rows: &[(&str, &str)]) -> TableResult {
        let mut result = TableResult::new(vec![
            COLUMN_RESOURCE_TYPE.to_string(),
            COLUMN_STORAGE_ROOT.to_string(),
        ]);
        for (kind, uri) in rows {
            result.push_row(vec![kind.to_string(), uri.to_string()]);
        }
        result
    }

    /// Build a listing with one queue and one container per account name.
    pub fn listing_for_accounts(accounts: &[&str]) -> TableResult {
        let mut rows = Vec::new();
        for account in accounts {
            rows.push((
                RESOURCE_KIND_QUEUE,
                format!("https://{account}.queue.example.net/ready-{account}?sig=qsecret"),
            ));
            rows.push((
                RESOURCE_KIND_CONTAINER,
                format!("https://{account}.blob.example.net/temp-{account}?sig=csecret"),
            ));
        }
        let pairs: Vec<(&str, &str)> = rows.iter().map(|(k, v)| (*k, v.as_str())).collect();
        Self::resource_listing(&pairs)
    }

    /// Build an auth token response.
    pub fn token_result(token: &str) -> TableResult {
        TableResult::new(vec![COLUMN_AUTH_CONTEXT.to_string()])
            .with_row(vec![token.to_string()])
    }
}

#[async_trait]
impl ManagementClient for MockManagementClient {
    async fn execute(&self, command: &str) -> Result<TableResult, IngestError> {
        self.commands.lock().push(command.to_string());
        let response = match command {
            SHOW_INGESTION_RESOURCES => self.resources.lock().next(),
            GET_INGESTION_AUTH_TOKEN => self.tokens.lock().next(),
            other => Err(BackendError::Permanent {
                code: None,
                message: format!("unscripted command '{other}'"),
            }),
        };
        response.map_err(IngestError::from)
    }
}
