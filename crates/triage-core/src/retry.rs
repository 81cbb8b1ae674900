//! Retry with exponential backoff for transient store failures.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use tracing::{debug, error, warn};

use triage_types::RetrySettings;

use crate::error::PipelineError;

/// Retry policy for store calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_interval: Duration,
    /// Cap on a single wait between attempts
    pub max_interval: Duration,
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_interval: Duration::from_millis(settings.initial_interval_ms),
            max_interval: Duration::from_secs(2),
            max_elapsed: Duration::from_millis(settings.max_elapsed_ms),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Keep retrying until `max_elapsed` has passed, however many attempts that takes.
    pub fn until_elapsed(self, max_elapsed: Duration) -> Self {
        Self {
            max_attempts: u32::MAX,
            max_elapsed,
            ..self
        }
    }
}

/// Run `op`, retrying while it fails with a retryable error.
///
/// Non-retryable errors return immediately. Retryable ones are retried until
/// `max_attempts` or the backoff's elapsed budget runs out, then the last
/// error is returned.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, name: &str, mut op: F) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<PipelineError>,
{
    let mut backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(policy.initial_interval)
        .with_max_interval(policy.max_interval.max(policy.initial_interval))
        .with_max_elapsed_time(Some(policy.max_elapsed))
        .build();

    let mut attempts = 0;

    loop {
        attempts += 1;
        debug!(op = name, attempt = attempts, "Calling store");

        let e: PipelineError = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e.into(),
        };

        if !e.is_retryable() {
            return Err(e);
        }
        if attempts >= policy.max_attempts {
            error!(op = name, attempts, error = %e, "Max retries exceeded");
            return Err(e);
        }

        match backoff.next_backoff() {
            Some(duration) => {
                warn!(
                    op = name,
                    error = %e,
                    retry_in_ms = duration.as_millis() as u64,
                    "Store call failed, retrying"
                );
                tokio::time::sleep(duration).await;
            }
            None => {
                error!(op = name, error = %e, "Backoff exhausted");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use triage_vector::StoreError;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            max_elapsed: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let calls = &AtomicU32::new(0);
        let result = with_retry(&fast_policy(3), "upsert", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(StoreError::Connectivity("lock held".to_string()))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(2), "upsert", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Timeout(Duration::from_millis(5)))
        })
        .await;

        assert!(matches!(result, Err(PipelineError::Store(StoreError::Timeout(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_does_not_retry_constraint_errors() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(5), "upsert", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Constraint("two rows for one key".to_string()))
        })
        .await;

        assert!(matches!(result, Err(PipelineError::Store(StoreError::Constraint(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_policy_from_settings() {
        let policy = RetryPolicy::from(&RetrySettings::default());
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_interval, Duration::from_millis(200));
        assert_eq!(RetryPolicy::none().max_attempts, 1);
    }

    #[tokio::test]
    async fn test_until_elapsed_outlasts_max_attempts() {
        let calls = &AtomicU32::new(0);
        let policy = fast_policy(2).until_elapsed(Duration::from_secs(5));
        let result = with_retry(&policy, "open", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 6 {
                Err(StoreError::Connectivity("lock held".to_string()))
            } else {
                Ok(())
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 7);
    }
}
