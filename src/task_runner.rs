//! Bounded retry with exponential backoff
//!
//! Fetches that fail with a retryable error are attempted again after a delay
//! that doubles on every attempt, capped at `max_delay`. Non-retryable errors
//! are returned immediately.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::domain::errors::CollectError;

/// Retry configuration for outbound fetches
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Add up to 25% random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay applied after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        std::cmp::min(delay, self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let max_jitter = (delay.as_millis() as u64) / 4;
        let extra = rand::thread_rng().gen_range(0..=max_jitter);
        delay + Duration::from_millis(extra)
    }
}

/// Run `task_fn` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent.
///
/// # Arguments
/// * `task_name` - Name of the operation for logging purposes
/// * `policy` - Retry configuration
/// * `task_fn` - Async function performing one attempt
pub async fn retry_with_backoff<T, F, Fut>(
    task_name: &str,
    policy: &RetryPolicy,
    mut task_fn: F,
) -> Result<T, CollectError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollectError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match task_fn().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("'{}' recovered on attempt {}", task_name, attempt);
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = policy.jittered(policy.delay_for(attempt));
                warn!(
                    "'{}' failed (attempt {}/{}): {}; retrying in {:?}",
                    task_name, attempt, max_attempts, e, delay
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!(
                        "'{}' giving up after {} attempts: {}",
                        task_name, attempt, e
                    );
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            jitter: false,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(300));
        assert_eq!(policy.delay_for(10), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = retry_with_backoff("flaky", &fast_policy(), || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CollectError::transient("connection reset"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<(), _> = retry_with_backoff("down", &fast_policy(), || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(CollectError::transient("timeout")) }
        })
        .await;

        assert!(matches!(result, Err(CollectError::Transient { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_parse_errors_are_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<(), _> = retry_with_backoff("broken", &fast_policy(), || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(CollectError::parse("missing 'trades' array")) }
        })
        .await;

        assert!(matches!(result, Err(CollectError::Parse { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
