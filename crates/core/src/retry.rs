use crate::error::ProviderError;
use std::future::Future;
use std::time::Duration;

/// Bounded exponential backoff shared by every provider call site. Transient
/// failures are retried with a doubling delay; fatal failures pass through
/// on the first attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub limit: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(limit: usize, base_delay: Duration) -> Self {
        Self {
            limit: limit.max(1),
            base_delay,
        }
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        let capped = attempt.min(6) as u32;
        self.base_delay.saturating_mul(1 << capped)
    }

    pub async fn run<T, F, Fut>(&self, mut call: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0usize;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(ProviderError::Fatal(reason)) => return Err(ProviderError::Fatal(reason)),
                Err(ProviderError::Transient(reason)) => {
                    attempt += 1;
                    if attempt >= self.limit.max(1) {
                        return Err(ProviderError::Transient(reason));
                    }
                    tracing::debug!(attempt, error = %reason, "retrying transient provider failure");
                    tokio::time::sleep(self.delay_for(attempt)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn instant_policy(limit: usize) -> RetryPolicy {
        RetryPolicy::new(limit, Duration::ZERO)
    }

    #[tokio::test]
    async fn transient_failure_is_retried_until_success() {
        let calls = AtomicUsize::new(0);
        let result = instant_policy(3)
            .run(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProviderError::Transient("flaky".to_string()))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_failure_is_never_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = instant_policy(3)
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Fatal("bad input".to_string()))
            })
            .await;

        assert!(matches!(result, Err(ProviderError::Fatal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_are_exhausted_at_the_limit() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = instant_policy(3)
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Transient("still down".to_string()))
            })
            .await;

        assert!(matches!(result, Err(ProviderError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
    }
}
