use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff policy for transient store errors. The default
/// matches the persistence contract: base 50 ms, doubling, five
/// attempts, ±20% jitter.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: u32,
    pub max_attempts: u32,
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(50),
            factor: 2,
            max_attempts: 5,
            jitter: 0.20,
        }
    }
}

impl BackoffPolicy {
    /// Delay before attempt `n` (1-based; no delay before the first).
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base.as_millis() as f64 * f64::from(self.factor).powi(attempt as i32 - 1);
        let spread = exp * self.jitter;
        let jittered = exp + rand::rng().random_range(-spread..=spread);
        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

/// Retry `operation` under `policy`. Only errors `is_transient`
/// classifies as retryable are retried; everything else (notably
/// conditional-check failures) propagates immediately.
pub async fn with_backoff<T, E, F, Fut, C>(
    name: &str,
    policy: BackoffPolicy,
    is_transient: C,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    C: Fn(&E) -> bool,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_attempts && is_transient(&e) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{}: attempt {}/{} failed ({}), retrying in {:?}",
                    name, attempt, policy.max_attempts, e, delay
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
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(1),
            ..BackoffPolicy::default()
        }
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = with_backoff(
            "test",
            fast_policy(),
            |_| true,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err("throttled".to_string())
                    } else {
                        Ok(n)
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_fails_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = with_backoff(
            "test",
            fast_policy(),
            |e: &String| e == "throttled",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("conditional check failed".to_string()) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = with_backoff(
            "test",
            fast_policy(),
            |_| true,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("throttled".to_string()) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_delay_growth_stays_within_jitter() {
        let policy = BackoffPolicy::default();
        for attempt in 1..=4 {
            let expected = 50.0 * 2f64.powi(attempt as i32 - 1);
            let delay = policy.delay_for(attempt).as_millis() as f64;
            assert!(delay >= expected * 0.8 - 1.0, "attempt {}: {}", attempt, delay);
            assert!(delay <= expected * 1.2 + 1.0, "attempt {}: {}", attempt, delay);
        }
    }
}
