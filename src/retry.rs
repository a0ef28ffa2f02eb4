use crate::error::{AppError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded exponential backoff.
///
/// `max_attempts` counts every call, including the first one. After the n-th
/// failed attempt the policy sleeps `base_delay * 2^n`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(failed_attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(30))
    }
}

/// Retry a future with exponential backoff, retrying only transient errors.
pub async fn retry_with_backoff<F, Fut, T>(policy: &RetryPolicy, what: &str, f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_when(policy, what, AppError::is_retryable, f).await
}

/// Retry a future with exponential backoff while `should_retry` accepts the error.
///
/// A rejected error is returned immediately without consuming further
/// attempts. Once the ceiling is reached the last error is returned.
pub async fn retry_when<F, Fut, T, P>(
    policy: &RetryPolicy,
    what: &str,
    should_retry: P,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&AppError) -> bool,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !should_retry(&e) {
                    warn!("{} failed with non-retryable error: {}", what, e);
                    return Err(e);
                }

                if attempt >= policy.max_attempts {
                    warn!(
                        "{} failed after {} attempt{}: {}",
                        what,
                        attempt,
                        if attempt > 1 { "s" } else { "" },
                        e
                    );
                    return Err(e);
                }

                let delay = policy.delay_for(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                    what, attempt, policy.max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
