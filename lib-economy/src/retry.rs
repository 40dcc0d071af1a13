//! Conflict retry
//!
//! Write conflicts (unique races, SQLite busy) are replayed a bounded number
//! of times. Every attempt runs a fresh transaction, so nothing from a failed
//! attempt survives into the next one.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::RetryConfig;
use crate::errors::LedgerResult;

/// Run `attempt` until it succeeds, fails with a non-conflict error, or
/// `max_attempts` is used up
pub async fn with_conflict_retry<T, F, Fut>(config: &RetryConfig, operation: &str, mut attempt: F) -> LedgerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = LedgerResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut tries = 0;
    loop {
        tries += 1;
        match attempt().await {
            Err(err) if err.is_conflict() && tries < max_attempts => {
                warn!(operation, attempt = tries, max_attempts, error = %err, "write conflict, retrying");
                tokio::time::sleep(Duration::from_millis(config.backoff_ms * u64::from(tries))).await;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::LedgerError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            backoff_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_conflict_is_retried_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_conflict_retry(&fast(), "test", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(LedgerError::PersistenceConflict("busy".into()))
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
        let result: LedgerResult<()> = with_conflict_retry(&fast(), "test", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LedgerError::PersistenceConflict("busy".into()))
        })
        .await;
        assert!(matches!(result, Err(LedgerError::PersistenceConflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: LedgerResult<()> = with_conflict_retry(&fast(), "test", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LedgerError::NoRateAvailable)
        })
        .await;
        assert!(matches!(result, Err(LedgerError::NoRateAvailable)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
