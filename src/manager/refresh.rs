//! Periodic refresh task.
//!
//! Each cached artifact (the storage resource snapshot, the authorization
//! token) is kept warm by its own [`RefreshTask`]: a spawned loop that runs
//! the refresh operation immediately on start and then on a fixed cadence.
//! Failed ticks are logged and skipped; whatever was published before stays
//! in place until a later tick succeeds.

use crate::error::IngestError;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Observable state of a refresh loop.
#[derive(Debug, Default)]
pub(crate) struct RefreshState {
    refreshed_once: AtomicBool,
    notify: Notify,
}

impl RefreshState {
    fn mark_refreshed(&self) {
        self.refreshed_once.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// True once at least one tick has succeeded.
    pub(crate) fn refreshed_once(&self) -> bool {
        self.refreshed_once.load(Ordering::Acquire)
    }

    /// Wait until the first successful tick, bounded by `timeout`.
    pub(crate) async fn wait_refreshed(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.refreshed_once() {
                return true;
            }
            let notified = self.notify.notified();
            // Re-check after arming the waiter so a concurrent success is
            // never missed.
            if self.refreshed_once() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.refreshed_once();
            }
        }
    }
}

/// Handle to a spawned refresh loop.
pub(crate) struct RefreshTask {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
    state: Arc<RefreshState>,
}

impl std::fmt::Debug for RefreshTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshTask")
            .field("refreshed_once", &self.state.refreshed_once())
            .finish()
    }
}

impl RefreshTask {
    /// Spawn a loop that runs `operation` now and then every `interval`.
    pub(crate) fn spawn<F, Fut>(name: &'static str, interval: Duration, operation: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), IngestError>> + Send,
    {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let state = Arc::new(RefreshState::default());
        let task_state = state.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // A slow refresh must not cause a burst of catch-up ticks.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match operation().await {
                            Ok(()) => {
                                debug!(task = name, "refresh succeeded");
                                task_state.mark_refreshed();
                            }
                            Err(err) => {
                                warn!(task = name, error = %err, "refresh failed, keeping previous data");
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!(task = name, "refresh task stopping");
                        return;
                    }
                }
            }
        });

        Self {
            handle,
            shutdown,
            state,
        }
    }

    /// Observable state shared with the loop.
    pub(crate) fn state(&self) -> Arc<RefreshState> {
        self.state.clone()
    }

    /// Stop the loop and wait for it to finish.
    pub(crate) async fn close(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}
