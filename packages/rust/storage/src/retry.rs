//! Bounded retry with exponential backoff for store operations.

use std::future::Future;
use std::time::Duration;

use blackboard_shared::{BlackboardError, Result, StoreConfig};
use tracing::warn;

/// How long one attempt may take and how often transient failures are retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub op_timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&StoreConfig::default())
    }
}

impl From<&StoreConfig> for RetryPolicy {
    fn from(config: &StoreConfig) -> Self {
        Self {
            op_timeout: config.op_timeout(),
            max_retries: config.max_retries,
            backoff: config.retry_backoff(),
        }
    }
}

/// Run `attempt` until it succeeds, fails permanently, or retries run out.
///
/// Each attempt is bounded by `op_timeout`; a timeout counts as transient.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = policy.backoff;
    let mut tries = 0u32;

    loop {
        tries += 1;
        let outcome = match tokio::time::timeout(policy.op_timeout, attempt()).await {
            Ok(result) => result,
            Err(_) => Err(BlackboardError::StoreUnavailable(format!(
                "{operation} timed out after {}ms",
                policy.op_timeout.as_millis()
            ))),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && tries <= policy.max_retries => {
                warn!(operation, attempt = tries, error = %e, "transient store failure, retrying");
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
            Err(e) if e.is_transient() => {
                return Err(BlackboardError::StoreUnavailable(format!(
                    "{operation} failed after {tries} attempts: {e}"
                )));
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            op_timeout: Duration::from_millis(200),
            max_retries,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(3), "get", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(BlackboardError::StoreUnavailable("busy".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast_policy(2), "put", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(BlackboardError::StoreUnavailable("down".into()))
        })
        .await;
        let err = result.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("after 3 attempts"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast_policy(5), "put", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(BlackboardError::Storage("constraint".into()))
        })
        .await;
        assert!(matches!(result, Err(BlackboardError::Storage(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_attempts_time_out_as_unavailable() {
        let policy = RetryPolicy {
            op_timeout: Duration::from_millis(10),
            max_retries: 0,
            backoff: Duration::from_millis(1),
        };
        let result: Result<()> = with_retry(&policy, "scan", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(BlackboardError::StoreUnavailable(_))));
    }
}
