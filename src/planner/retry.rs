//! Bounded retry for read operations.
//!
//! Transient daemon failures on reads retry with exponential backoff;
//! writes never come through here.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Maximum attempts per read
const MAX_TRIES: u32 = 3;

/// First backoff delay; doubles per attempt
const BASE_DELAY: Duration = Duration::from_millis(200);

/// Run a read operation, retrying transient `External` failures
///
/// # Errors
///
/// The last error once attempts are exhausted, or immediately for
/// non-retryable kinds.
pub async fn with_retries<T, F, Fut>(mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = BASE_DELAY;
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < MAX_TRIES => {
                debug!(attempt, error = %err, "transient read failure, backing off");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retries(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::external("docker.volume.ls", "daemon busy"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_tries() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retries(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::external("docker.volume.ls", "daemon busy")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_validation_is_terminal() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retries(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::validation("manifest", "bad")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
