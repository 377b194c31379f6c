use std::future::Future;
use std::time::Duration;

use super::document::SyncError;
use super::quota::Quota;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub max_attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

impl Backoff {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Runs `call` against the quota, retrying transient failures.
    ///
    /// Every attempt counts against the quota.
    pub async fn run<T, F, Fut>(&self, quota: &Quota, what: &str, mut call: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let mut attempt = 1;
        loop {
            quota.acquire().await;
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay(attempt);
                    tracing::warn!(
                        call = what,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        "Document service call failed: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_delay_doubles_up_to_cap() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(1), Duration::from_millis(500));
        assert_eq!(backoff.delay(2), Duration::from_millis(1000));
        assert_eq!(backoff.delay(4), Duration::from_millis(4000));
        assert_eq!(backoff.delay(7), Duration::from_secs(30));
        assert_eq!(backoff.delay(40), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let quota = Quota::per_minute(45);
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let start = Instant::now();

        let result = Backoff::default()
            .run(&quota, "lookup", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(SyncError::Timeout)
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_millis(1500));
        assert_eq!(quota.used().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let quota = Quota::per_minute(45);
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), _> = Backoff::default()
            .run(&quota, "lookup", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::Timeout)
            })
            .await;

        assert!(matches!(result, Err(SyncError::Timeout)));
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let quota = Quota::per_minute(45);
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), _> = Backoff::default()
            .run(&quota, "lookup", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::Api("unknown template".to_string()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
