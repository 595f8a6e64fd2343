//! Exponential backoff for remote calls

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use super::compositor::RemoteError;
use crate::config::RemoteConfig;

/// Retries transient remote failures with exponential backoff
///
/// The wait before attempt `n` (n >= 2) is `base_delay * 2^n`. Fatal
/// failures return at once. When attempts run out the last error is
/// returned as-is.
#[derive(Debug, Clone, Copy)]
pub struct RetryExecutor {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryExecutor {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &RemoteConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay slept before the given (1-based) attempt
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Run `operation` until it succeeds, fails fatally, or attempts run out
    pub async fn execute<F, Fut, T>(&self, label: &str, mut operation: F) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!("[{}] Succeeded on attempt {}", label, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => {
                    tracing::warn!("[{}] Fatal remote error, not retrying: {}", label, e);
                    return Err(e);
                }
                Err(e) if attempt >= self.max_attempts => {
                    tracing::warn!(
                        "[{}] Giving up after {} attempts: {}",
                        label,
                        attempt,
                        e
                    );
                    return Err(e);
                }
                Err(e) => {
                    attempt += 1;
                    let delay = self.delay_before(attempt);
                    tracing::warn!(
                        "[{}] Request failed ({}), retrying in {:?} (attempt {}/{})",
                        label,
                        e,
                        delay,
                        attempt,
                        self.max_attempts
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::compositor::RemoteErrorKind;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::time::Instant;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_delay_schedule() {
        let retry = RetryExecutor::new(3, Duration::from_millis(1000));
        assert_eq!(retry.delay_before(1), Duration::ZERO);
        assert_eq!(retry.delay_before(2), Duration::from_secs(4));
        assert_eq!(retry.delay_before(3), Duration::from_secs(8));
        assert_eq!(retry.delay_before(64), Duration::from_millis(1000).saturating_mul(u32::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_then_success() {
        let retry = RetryExecutor::new(3, Duration::from_millis(1000));
        let calls: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

        let result = retry
            .execute("photo.png", || {
                let calls = calls.clone();
                async move {
                    let mut calls = calls.lock();
                    calls.push(Instant::now());
                    if calls.len() < 3 {
                        Err(RemoteError::new(RemoteErrorKind::RateLimited, "slow down"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        let value = assert_ok!(result);
        assert_eq!(value, "done");

        let calls = calls.lock();
        assert_eq!(calls.len(), 3);
        let first_gap = calls[1] - calls[0];
        let second_gap = calls[2] - calls[1];
        assert!(first_gap >= Duration::from_secs(4) && first_gap < Duration::from_millis(4100));
        assert!(second_gap >= Duration::from_secs(8) && second_gap < Duration::from_millis(8100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let retry = RetryExecutor::new(3, Duration::from_millis(1000));
        let attempts = Arc::new(Mutex::new(0u32));
        let started = Instant::now();

        let result: Result<(), _> = retry
            .execute("bad.png", || {
                let attempts = attempts.clone();
                async move {
                    *attempts.lock() += 1;
                    Err(RemoteError::new(RemoteErrorKind::Rejected, "unsupported format"))
                }
            })
            .await;

        let err = assert_err!(result);
        assert_eq!(err.kind, RemoteErrorKind::Rejected);
        assert_eq!(*attempts.lock(), 1);
        assert!(Instant::now() - started < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let retry = RetryExecutor::new(3, Duration::from_millis(10));
        let attempts = Arc::new(Mutex::new(0u32));

        let result: Result<(), _> = retry
            .execute("flaky.png", || {
                let attempts = attempts.clone();
                async move {
                    let mut n = attempts.lock();
                    *n += 1;
                    Err(RemoteError::new(RemoteErrorKind::ServerFault, format!("attempt {}", *n))
                        .with_status(503))
                }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(*attempts.lock(), 3);
        assert_eq!(err.message, "attempt 3");
        assert_eq!(err.status, Some(503));
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_execution_starts_fresh() {
        let retry = RetryExecutor::new(2, Duration::from_millis(10));
        let attempts = Arc::new(Mutex::new(0u32));

        for _ in 0..2 {
            let _: Result<(), _> = retry
                .execute("task", || {
                    let attempts = attempts.clone();
                    async move {
                        *attempts.lock() += 1;
                        Err(RemoteError::new(RemoteErrorKind::Timeout, "too slow"))
                    }
                })
                .await;
        }

        assert_eq!(*attempts.lock(), 4);
    }
}
