//! Async retry utilities with exponential backoff

use std::time::Duration;

/// Default base delay in milliseconds for exponential backoff
pub const DEFAULT_BASE_DELAY_MS: u64 = 50;

/// Retry an async operation with exponential backoff.
///
/// Returns `Ok((value, attempts))` on success, or `Err((error, attempts))`
/// once `max_attempts` have failed. `max_attempts` of zero is treated as one.
pub async fn retry_with_backoff_async<T, F, Fut, E>(
    max_attempts: u32,
    base_delay_ms: u64,
    mut operation: F,
) -> Result<(T, u32), (E, u32)>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match operation().await {
            Ok(value) => return Ok((value, attempts)),
            Err(e) => {
                if attempts >= max_attempts {
                    return Err((e, attempts));
                }
                let delay = Duration::from_millis(
                    base_delay_ms.saturating_mul(2_u64.saturating_pow(attempts - 1)),
                );
                tracing::warn!(
                    error = %e,
                    attempt = attempts,
                    delay_ms = delay.as_millis(),
                    "Retrying after transient error"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_success_on_first_try() {
        let result = retry_with_backoff_async(3, 1, || async { Ok::<_, &str>(7) }).await;
        assert_eq!(result, Ok((7, 1)));
    }

    #[tokio::test]
    async fn test_success_after_retry() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff_async(3, 1, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < 1 { Err("transient error") } else { Ok("id") } }
        })
        .await;
        assert_eq!(result, Ok(("id", 2)));
    }

    #[tokio::test]
    async fn test_failure_after_max_retries() {
        let result =
            retry_with_backoff_async(3, 1, || async { Err::<(), _>("persistent error") }).await;
        assert_eq!(result, Err(("persistent error", 3)));
    }

    #[tokio::test]
    async fn test_zero_attempts_runs_once() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff_async(0, 1, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("down") }
        })
        .await;
        assert_eq!(result, Err(("down", 1)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
