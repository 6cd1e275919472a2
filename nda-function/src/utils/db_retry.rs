//! Lock retry for warehouse writes
//!
//! SQLite reports a busy writer as `database is locked`. Writes are retried
//! with exponential backoff until `max_wait_ms` has elapsed; any other error
//! is returned at once.

use std::future::Future;
use std::time::{Duration, Instant};

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

/// Errors that can tell a lock timeout apart from a real failure
pub trait LockContention {
    fn is_lock_error(&self) -> bool;
}

impl LockContention for crate::Error {
    fn is_lock_error(&self) -> bool {
        crate::Error::is_lock_error(self)
    }
}

impl LockContention for nda_common::Error {
    fn is_lock_error(&self) -> bool {
        nda_common::Error::is_lock_error(self)
    }
}

/// Run `operation` until it succeeds, fails with a non-lock error, or the
/// lock wait budget is spent
///
/// Backoff starts at 10 ms and doubles up to 1 s. When the budget runs out
/// the last lock error is returned unchanged so callers still see the
/// underlying store failure.
pub async fn retry_on_lock<F, Fut, T, E>(operation_name: &str, max_wait_ms: u64, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: LockContention,
{
    let start = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0u32;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    let elapsed_ms = start.elapsed().as_millis();
                    if elapsed_ms > 2000 {
                        tracing::warn!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms,
                            "Write succeeded after a long lock wait"
                        );
                    } else {
                        tracing::debug!(operation = operation_name, attempt, elapsed_ms, "Write succeeded after retry");
                    }
                }
                return Ok(value);
            }
            Err(err) if !err.is_lock_error() => return Err(err),
            Err(err) => {
                let elapsed = start.elapsed();
                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis(),
                        max_wait_ms,
                        "Database still locked, giving up"
                    );
                    return Err(err);
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    remaining_ms = max_duration.saturating_sub(elapsed).as_millis(),
                    "Database locked, retrying"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum FakeError {
        Locked,
        Broken,
    }

    impl LockContention for FakeError {
        fn is_lock_error(&self) -> bool {
            *self == FakeError::Locked
        }
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let result = retry_on_lock("write", 5000, || async { Ok::<_, FakeError>(42) }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_retries_until_unlocked() {
        let attempts = AtomicU32::new(0);

        let result = retry_on_lock("write", 5000, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(FakeError::Locked)
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let result = retry_on_lock("write", 30, || async { Err::<(), _>(FakeError::Locked) }).await;
        assert_eq!(result, Err(FakeError::Locked));
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let attempts = AtomicU32::new(0);

        let result = retry_on_lock("write", 5000, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(FakeError::Broken) }
        })
        .await;

        assert_eq!(result, Err(FakeError::Broken));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
