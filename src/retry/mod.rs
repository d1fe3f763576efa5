//! Retry primitives.
//!
//! Two layers live here. [`resource_action_with_retries`] retries an action
//! across a ranked list of storage resources, rotating through the list and
//! feeding each outcome back to a [`ReliabilitySink`]. [`ExponentialRetry`]
//! is a plain attempt loop with exponential backoff and optional jitter,
//! used by the managed client for streaming attempts.

use crate::error::{AttemptRecord, ConfigError, IngestError, ResourceError};
use crate::resources::IngestResource;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Default number of attempts for resource-scoped actions.
pub const DEFAULT_RESOURCE_ATTEMPTS: u32 = 3;

/// Receives per-account success and failure signals.
///
/// The resource manager implements this to feed its account ranking; tests
/// substitute a recorder.
pub trait ReliabilitySink: Send + Sync {
    /// Record the outcome of one attempt against one storage account.
    fn report(&self, account: &str, success: bool);
}

/// No-op sink for callers that do not track reliability.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ReliabilitySink for NullSink {
    fn report(&self, _account: &str, _success: bool) {}
}

/// Run `action` against resources from `resources`, retrying on transient
/// failure and rotating to the next resource each attempt.
///
/// Attempt `n` (1-based) uses `resources[(n - 1) % resources.len()]`, so a
/// single resource is simply retried in place while a longer list spreads
/// attempts across accounts. The action receives its own clone of the
/// resource so its future can own it. Every outcome is reported to `sink`
/// under the resource's account name. A permanent error stops the loop
/// immediately; exhausting all attempts yields [`ResourceError::Exhausted`]
/// carrying the full attempt history and the final error.
pub async fn resource_action_with_retries<R, T, F, Fut>(
    sink: &dyn ReliabilitySink,
    resources: &[R],
    attempts: u32,
    action_name: &str,
    mut action: F,
) -> Result<T, IngestError>
where
    R: IngestResource + Clone,
    F: FnMut(R) -> Fut,
    Fut: Future<Output = Result<T, IngestError>>,
{
    if resources.is_empty() {
        return Err(ConfigError::EmptyResourceList {
            action: action_name.to_string(),
        }
        .into());
    }

    let mut history = Vec::with_capacity(attempts as usize);
    let mut last_error: Option<IngestError> = None;

    for attempt in 1..=attempts.max(1) {
        let resource = &resources[(attempt as usize - 1) % resources.len()];
        let account = resource.account_name().to_string();

        match action(resource.clone()).await {
            Ok(value) => {
                sink.report(&account, true);
                debug!(action = action_name, account = %account, attempt, "resource action succeeded");
                return Ok(value);
            }
            Err(err) => {
                sink.report(&account, false);
                warn!(
                    action = action_name,
                    account = %account,
                    attempt,
                    error = %err,
                    "resource action failed"
                );
                history.push(AttemptRecord {
                    endpoint: resource.endpoint().to_string(),
                    account,
                    attempt,
                });
                let permanent = err.is_permanent();
                last_error = Some(err);
                if permanent {
                    break;
                }
            }
        }
    }

    let source = match last_error {
        Some(err) => Box::new(err),
        // Unreachable with attempts >= 1, kept total for safety.
        None => Box::new(IngestError::from(ConfigError::InvalidValue {
            field: "attempts".to_string(),
            message: "must be at least 1".to_string(),
        })),
    };

    Err(ResourceError::Exhausted {
        action: action_name.to_string(),
        attempts: history.len() as u32,
        history,
        source,
    }
    .into())
}

/// Exponential backoff attempt loop.
///
/// The operation decides its own fate per attempt: `Ok(Some(v))` finishes,
/// `Ok(None)` asks for another attempt after a backoff wait, `Err` aborts
/// without further attempts. Delays grow by `multiplier` from `initial` up
/// to `max`; with jitter enabled each wait is scaled by a random factor in
/// `[0.5, 1.0)`.
#[derive(Debug, Clone)]
pub struct ExponentialRetry {
    /// Maximum number of attempts, including the first.
    pub attempts: u32,
    /// Delay before the second attempt.
    pub initial: Duration,
    /// Ceiling applied to the computed delay.
    pub max: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Randomize each wait to avoid synchronized retries.
    pub jitter: bool,
}

impl Default for ExponentialRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial: Duration::from_millis(100),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ExponentialRetry {
    /// Loop with the given attempt budget, default timing.
    pub fn with_attempts(attempts: u32) -> Self {
        Self {
            attempts,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt + 1`, without jitter.
    fn base_delay(&self, attempt: u32) -> Duration {
        let exp = self.initial.as_secs_f64() * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(exp.min(self.max.as_secs_f64()))
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        let capped = self.base_delay(attempt);
        if self.jitter {
            let j: f64 = rand::random();
            capped.mul_f64(0.5 + j * 0.5)
        } else {
            capped
        }
    }

    /// Run `operation` until it resolves or attempts run out.
    ///
    /// Returns `Ok(None)` when every attempt asked to retry; callers decide
    /// what exhaustion means for them.
    pub async fn execute<T, F, Fut, E>(&self, mut operation: F) -> Result<Option<T>, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        for attempt in 1..=self.attempts.max(1) {
            match operation(attempt).await? {
                Some(value) => return Ok(Some(value)),
                None => {
                    if attempt < self.attempts {
                        let delay = self.next_delay(attempt);
                        debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off before retry");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::resources::{QueueResource, ResourceUri};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<(String, bool)>>,
    }

    impl ReliabilitySink for RecordingSink {
        fn report(&self, account: &str, success: bool) {
            self.events.lock().push((account.to_string(), success));
        }
    }

    fn queue(account: &str) -> QueueResource {
        QueueResource::new(
            ResourceUri::parse(&format!(
                "https://{account}.queue.example.net/ready?sig=secret"
            ))
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_rotation_spreads_attempts() {
        let sink = RecordingSink::default();
        let resources = vec![queue("acca"), queue("accb")];
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen2 = seen.clone();
        let result: Result<(), _> =
            resource_action_with_retries(&sink, &resources, 3, "post message", move |r| {
                seen2.lock().push(r.account_name().to_string());
                async {
                    Err(BackendError::Transient {
                        message: "503".to_string(),
                    }
                    .into())
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(*seen.lock(), vec!["acca", "accb", "acca"]);
        let events = sink.events.lock();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|(_, ok)| !ok));
    }

    #[tokio::test]
    async fn test_single_resource_retried_in_place() {
        let sink = RecordingSink::default();
        let resources = vec![queue("solo")];
        let calls = Arc::new(Mutex::new(0u32));

        let calls2 = calls.clone();
        let result = resource_action_with_retries(&sink, &resources, 3, "upload", move |_| {
            let calls = calls2.clone();
            async move {
                let mut n = calls.lock();
                *n += 1;
                if *n < 3 {
                    Err(IngestError::from(BackendError::Timeout {
                        duration: Duration::from_secs(5),
                    }))
                } else {
                    Ok(42u64)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(*calls.lock(), 3);
        let events = sink.events.lock();
        assert_eq!(
            *events,
            vec![
                ("solo".to_string(), false),
                ("solo".to_string(), false),
                ("solo".to_string(), true)
            ]
        );
    }

    #[tokio::test]
    async fn test_permanent_error_short_circuits() {
        let sink = RecordingSink::default();
        let resources = vec![queue("acca"), queue("accb")];
        let calls = Arc::new(Mutex::new(0u32));

        let calls2 = calls.clone();
        let err = resource_action_with_retries::<_, (), _, _>(
            &sink,
            &resources,
            3,
            "upload",
            move |_| {
                *calls2.lock() += 1;
                async {
                    Err(BackendError::Permanent {
                        code: Some("Forbidden".to_string()),
                        message: "forbidden".to_string(),
                    }
                    .into())
                }
            },
        )
        .await
        .unwrap_err();

        assert_eq!(*calls.lock(), 1);
        match err {
            IngestError::Resource(ResourceError::Exhausted {
                attempts, history, ..
            }) => {
                assert_eq!(attempts, 1);
                assert_eq!(history[0].account, "acca");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_resource_list_is_config_error() {
        let sink = NullSink;
        let resources: Vec<QueueResource> = Vec::new();
        let err = resource_action_with_retries::<_, (), _, _>(
            &sink,
            &resources,
            3,
            "post message",
            |_| async { Ok(()) },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
    }

    #[tokio::test]
    async fn test_exhaustion_history_records_every_attempt() {
        let sink = NullSink;
        let resources = vec![queue("acca"), queue("accb"), queue("accc")];
        let err = resource_action_with_retries::<_, (), _, _>(
            &sink,
            &resources,
            3,
            "post message",
            |_| async {
                Err(BackendError::Transient {
                    message: "oops".to_string(),
                }
                .into())
            },
        )
        .await
        .unwrap_err();

        match err {
            IngestError::Resource(ResourceError::Exhausted {
                action,
                attempts,
                history,
                ..
            }) => {
                assert_eq!(action, "post message");
                assert_eq!(attempts, 3);
                let accounts: Vec<_> = history.iter().map(|a| a.account.as_str()).collect();
                assert_eq!(accounts, vec!["acca", "accb", "accc"]);
                assert_eq!(history[2].attempt, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_backoff_delays() {
        let retry = ExponentialRetry {
            attempts: 3,
            initial: Duration::from_millis(100),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: false,
        };
        let start = tokio::time::Instant::now();
        let outcome: Result<Option<()>, IngestError> =
            retry.execute(|_| async { Ok(None) }).await;
        assert!(outcome.unwrap().is_none());
        // 100ms after attempt 1, 200ms after attempt 2, none after the last.
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delay_capped_at_max() {
        let retry = ExponentialRetry {
            attempts: 5,
            initial: Duration::from_secs(10),
            max: Duration::from_secs(15),
            multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(retry.base_delay(1), Duration::from_secs(10));
        assert_eq!(retry.base_delay(2), Duration::from_secs(15));
        assert_eq!(retry.base_delay(4), Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_execute_error_aborts() {
        let retry = ExponentialRetry::with_attempts(5);
        let calls = Arc::new(Mutex::new(0u32));
        let calls2 = calls.clone();
        let outcome: Result<Option<()>, &str> = retry
            .execute(|_| {
                *calls2.lock() += 1;
                async { Err("fatal") }
            })
            .await;
        assert_eq!(outcome.unwrap_err(), "fatal");
        assert_eq!(*calls.lock(), 1);
    }
}
