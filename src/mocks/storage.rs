use crate::backend::StorageClient;
use crate::error::{BackendError, IngestError};
use crate::resources::{ContainerResource, IngestResource, QueueResource};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};

/// A recorded queue post.
#[derive(Debug, Clone)]
pub struct QueuePost {
    /// Account the queue belongs to.
    pub account: String,
    /// The message body.
    pub message: String,
}

/// A recorded blob upload.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Account the container belongs to.
    pub account: String,
    /// Name of the uploaded blob.
    pub blob_name: String,
    /// The uploaded bytes.
    pub payload: Bytes,
    /// Whether in-transit compression was requested.
    pub compress: bool,
}

/// Recording storage double with scripted failures.
///
/// One-shot errors enqueued with the `push_*_error` methods are consumed in
/// order before any success. Accounts added to the failing set reject every
/// call with a transient error, which is how tests steer the rotation.
#[derive(Default)]
pub struct MockStorageClient {
    posts: Mutex<Vec<QueuePost>>,
    uploads: Mutex<Vec<Upload>>,
    post_errors: Mutex<VecDeque<BackendError>>,
    upload_errors: Mutex<VecDeque<BackendError>>,
    failing_accounts: Mutex<HashSet<String>>,
}

impl MockStorageClient {
    /// Create a double that succeeds on every call.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next queue post with `err`.
    pub fn push_post_error(&self, err: BackendError) {
        self.post_errors.lock().push_back(err);
    }

    /// Fail the next upload with `err`.
    pub fn push_upload_error(&self, err: BackendError) {
        self.upload_errors.lock().push_back(err);
    }

    /// Make every call against `account` fail transiently.
    pub fn fail_account(&self, account: &str) {
        self.failing_accounts.lock().insert(account.to_string());
    }

    /// Recorded queue posts, in order.
    pub fn posts(&self) -> Vec<QueuePost> {
        self.posts.lock().clone()
    }

    /// Recorded uploads, in order.
    pub fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().clone()
    }

    fn check_account(&self, account: &str) -> Result<(), BackendError> {
        if self.failing_accounts.lock().contains(account) {
            return Err(BackendError::Transient {
                message: format!("account '{account}' is down"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl StorageClient for MockStorageClient {
    async fn post_queue_message(
        &self,
        queue: &QueueResource,
        message: &str,
    ) -> Result<(), IngestError> {
        if let Some(err) = self.post_errors.lock().pop_front() {
            return Err(err.into());
        }
        self.check_account(queue.account_name())?;
        self.posts.lock().push(QueuePost {
            account: queue.account_name().to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    async fn upload_stream(
        &self,
        container: &ContainerResource,
        blob_name: &str,
        payload: Bytes,
        compress: bool,
    ) -> Result<u64, IngestError> {
        if let Some(err) = self.upload_errors.lock().pop_front() {
            return Err(err.into());
        }
        self.check_account(container.account_name())?;
        let size = payload.len() as u64;
        self.uploads.lock().push(Upload {
            account: container.account_name().to_string(),
            blob_name: blob_name.to_string(),
            payload,
            compress,
        });
        Ok(size)
    }
}
