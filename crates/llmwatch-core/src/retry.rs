//! Bounded exponential backoff for store writes

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::Result;

impl RetryConfig {
    /// Delay before the attempt following `attempt` (1-based), without jitter
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1).saturating_pow(attempt.saturating_sub(1));
        let ms = self.backoff_ms.saturating_mul(factor).min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Run `op` until it succeeds, fails with a non-persistence error, or the
/// attempt budget is spent. Returns the last error on exhaustion.
pub async fn with_backoff<T, F, Fut>(config: &RetryConfig, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_persistence() && attempt < max_attempts => {
                let base = config.backoff_for(attempt);
                let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 4);
                let delay = base + Duration::from_millis(jitter_ms);
                warn!(
                    operation = what,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Store operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            backoff_ms: 1,
            backoff_factor: 2,
            max_backoff_ms: 4,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = RetryConfig {
            max_attempts: 5,
            backoff_ms: 100,
            backoff_factor: 2,
            max_backoff_ms: 300,
        };
        assert_eq!(config.backoff_for(1), Duration::from_millis(100));
        assert_eq!(config.backoff_for(2), Duration::from_millis(200));
        assert_eq!(config.backoff_for(3), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_retries_persistence_errors_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_backoff(&fast(), "save", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::persistence("connection reset"))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = with_backoff(&fast(), "save", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::persistence("disk full"))
        })
        .await;

        assert!(matches!(result, Err(Error::Persistence(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = with_backoff(&fast(), "save", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::config("bad"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
