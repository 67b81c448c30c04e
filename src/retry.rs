//! Bounded retries with exponential backoff for idempotent reads.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// How often, and how patiently, an idempotent call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub initial_delay: Duration,
    /// Per-attempt deadline
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: usize, timeout: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            initial_delay: Duration::from_millis(250),
            timeout,
        }
    }
}

/// Retry an async operation with exponential backoff.
///
/// `retryable` decides whether a given error is worth another attempt;
/// permanent failures are returned immediately.
pub async fn retry_async<F, Fut, T, E, R>(
    policy: &RetryPolicy,
    retryable: R,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut delay = policy.initial_delay;
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < policy.attempts && retryable(&e) => {
                tracing::debug!(attempt, error = %e, "retrying after {:?}", delay);
                sleep(delay).await;
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast(attempts: usize) -> RetryPolicy {
        RetryPolicy {
            attempts,
            initial_delay: Duration::from_millis(1),
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let counter = AtomicUsize::new(0);
        let res: Result<u32, String> = retry_async(&fast(4), |_| true, |_| {
            let current = counter.fetch_add(1, Ordering::Relaxed);
            async move {
                if current < 2 {
                    Err("busy".to_string())
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(res.unwrap(), 7);
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn gives_up_after_attempts() {
        let counter = AtomicUsize::new(0);
        let res: Result<u32, String> = retry_async(&fast(3), |_| true, |_| {
            counter.fetch_add(1, Ordering::Relaxed);
            async { Err("down".to_string()) }
        })
        .await;

        assert!(res.is_err());
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let counter = AtomicUsize::new(0);
        let res: Result<u32, String> = retry_async(&fast(5), |e: &String| e != "revert", |_| {
            counter.fetch_add(1, Ordering::Relaxed);
            async { Err("revert".to_string()) }
        })
        .await;

        assert!(res.is_err());
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }
}
