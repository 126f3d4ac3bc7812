use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// `{maxAttempts, initialDelayMs, maxDelayMs}`, driving exponential backoff
/// with jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 50,
            max_delay_ms: 2000,
        }
    }
}

impl RetryPolicy {
    /// Full-jitter exponential backoff: `rand(0, min(maxDelay, initial * 2^attempt))`.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.initial_delay_ms.saturating_mul(1u64 << attempt.min(20));
        let capped = exp.min(self.max_delay_ms);
        let jittered = rand::thread_rng().gen_range(0..=capped.max(1));
        Duration::from_millis(jittered)
    }
}

#[derive(Debug)]
pub enum RetryError<E> {
    /// All attempts were exhausted; carries the last error observed.
    Exhausted(E),
    /// The operation reported a non-retryable error; no further attempts made.
    NonRetryable(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted(e) => e,
            RetryError::NonRetryable(e) => e,
        }
    }
}

/// Runs `op` under `policy`, retrying when `is_retryable(&err)` returns true.
/// A non-retryable error short-circuits immediately (404/403/400-style
/// errors move on to the next source rather than being retried).
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: RetryPolicy,
    mut op: F,
    is_retryable: impl Fn(&E) -> bool,
) -> Result<(T, u32), RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok((value, attempt)),
            Err(err) => {
                if !is_retryable(&err) {
                    return Err(RetryError::NonRetryable(err));
                }
                attempt += 1;
                if attempt >= policy.max_attempts {
                    return Err(RetryError::Exhausted(err));
                }
                tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay_ms: 1,
            max_delay_ms: 2,
        };
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(
            policy,
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("transient")
                } else {
                    Ok(42)
                }
            },
            |_| true,
        )
        .await;
        assert_eq!(result.unwrap().0, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_on_non_retryable() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay_ms: 1,
            max_delay_ms: 2,
        };
        let calls = AtomicU32::new(0);
        let result: Result<(i32, u32), RetryError<&str>> = retry_with_backoff(
            policy,
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("not found")
            },
            |_| false,
        )
        .await;
        assert!(matches!(result, Err(RetryError::NonRetryable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 2,
        };
        let calls = AtomicU32::new(0);
        let result: Result<(i32, u32), RetryError<&str>> = retry_with_backoff(
            policy,
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("boom")
            },
            |_| true,
        )
        .await;
        assert!(matches!(result, Err(RetryError::Exhausted(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
