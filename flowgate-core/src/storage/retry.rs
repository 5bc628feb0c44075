//! Retry helper for transient locking/deadlock errors.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::Result;

pub const MAX_ATTEMPTS: u32 = 6;
pub const BASE_SLEEP_MS: u64 = 20;

/// True for deadlock/lock-contention failures worth retrying.
pub fn is_transient_locking_error(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        // Postgres: 40P01 deadlock_detected, 55P03 lock_not_available,
        // 40001 serialization_failure.
        if let Some(code) = db_err.code() {
            if matches!(code.as_ref(), "40P01" | "55P03" | "40001") {
                return true;
            }
        }
    }
    let msg = err.to_string().to_lowercase();
    msg.contains("deadlock") || msg.contains("locked") || msg.contains("busy")
}

fn backoff_with_jitter(attempt: u32) -> Duration {
    let base = BASE_SLEEP_MS * 2u64.pow(attempt);
    let jitter = rand::rng().random_range(0..BASE_SLEEP_MS);
    Duration::from_millis(base + jitter)
}

/// Run `op` (a fallible DB operation factory), retrying transient locking
/// errors with exponential backoff and jitter. Non-transient errors
/// propagate immediately; exhausted retries return `Ok(false)` so callers
/// can treat the write as best-effort.
pub async fn execute_with_retry<F, Fut, T>(mut op: F) -> Result<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    for attempt in 0..MAX_ATTEMPTS {
        match op().await {
            Ok(value) => return Ok(Some(value)),
            Err(e) if is_transient_locking_error(&e) => {
                if attempt == MAX_ATTEMPTS - 1 {
                    warn!(
                        attempts = MAX_ATTEMPTS,
                        error = %e,
                        "Transient DB error; giving up"
                    );
                    return Ok(None);
                }
                let sleep = backoff_with_jitter(attempt);
                debug!(
                    attempt = attempt + 1,
                    max = MAX_ATTEMPTS,
                    sleep_ms = sleep.as_millis() as u64,
                    error = %e,
                    "Retrying after transient DB error"
                );
                tokio::time::sleep(sleep).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn success_on_first_attempt() {
        let result = execute_with_retry(|| async { Ok::<_, sqlx::Error>(7) }).await;
        assert_eq!(result.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn non_transient_error_propagates() {
        let result =
            execute_with_retry(|| async { Err::<(), _>(sqlx::Error::RowNotFound) }).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn error_factory_is_invoked_once_for_non_transient() {
        let attempts = AtomicU32::new(0);
        let result = execute_with_retry(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(sqlx::Error::RowNotFound) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn row_not_found_is_not_transient() {
        assert!(!is_transient_locking_error(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn backoff_grows_with_attempts() {
        let first = backoff_with_jitter(0);
        let later = backoff_with_jitter(4);
        assert!(later >= first);
        assert!(later.as_millis() as u64 >= BASE_SLEEP_MS * 16);
    }
}
