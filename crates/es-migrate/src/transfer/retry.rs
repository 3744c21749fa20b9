//! Retry policy for transient cursor and bulk failures.
//!
//! The default policy never retries: a failed advance closes its slice and a
//! failed bulk request stops its writer. Callers opt in to retries through
//! `migration.max_retries`.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::Result;

/// Upper bound for a single backoff delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// How often and how patiently to repeat a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,

    /// Delay before the first retry; doubled for each further attempt.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Never retry.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Backoff before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(factor)
            .min(MAX_RETRY_DELAY)
    }

    /// Run `op`, retrying errors that are [retryable](crate::MigrateError::is_retryable).
    ///
    /// Cancellation interrupts the backoff and returns the last error.
    pub async fn run<T, F, Fut>(&self, what: &str, cancel: &CancellationToken, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} failed: {}, retry {}/{} in {:?}",
                        what, e, attempt, self.max_retries, delay
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(e),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MigrateError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(30), MAX_RETRY_DELAY);
    }

    #[tokio::test]
    async fn test_default_policy_does_not_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = RetryPolicy::default()
            .run("advance", &CancellationToken::new(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(MigrateError::connectivity("http://src:9200", "refused")) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result = policy
            .run("bulk write", &CancellationToken::new(), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(MigrateError::connectivity("http://dst:9200", "reset"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_never_retries_expired_cursor() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result: Result<()> = policy
            .run("advance", &CancellationToken::new(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(MigrateError::CursorExpired {
                        slice: "1/5".into(),
                        message: "gone".into(),
                    })
                }
            })
            .await;
        assert!(matches!(result, Err(MigrateError::CursorExpired { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let policy = RetryPolicy::new(10, Duration::from_secs(60));
        let result: Result<()> = tokio::time::timeout(
            Duration::from_secs(5),
            policy.run("advance", &cancel, || async {
                Err(MigrateError::connectivity("h", "down"))
            }),
        )
        .await
        .expect("backoff should be interrupted");
        assert!(result.is_err());
    }
}
