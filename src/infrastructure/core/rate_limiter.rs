use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::debug;

/// Keyed token bucket. Each key refills continuously at `rate_per_min`
/// tokens per minute up to `burst` capacity. Exhaustion is reported to
/// the caller as a typed error by the gateway; callers must not retry
/// synchronously.
pub struct TokenBucketLimiter {
    rate_per_min: f64,
    burst: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

impl TokenBucketLimiter {
    pub fn new(rate_per_min: u32, burst: u32) -> Self {
        Self {
            rate_per_min: f64::from(rate_per_min),
            burst: f64::from(burst),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Take one token for `key`. Returns false when the bucket is empty.
    pub async fn try_acquire(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.burst,
            refilled_at: now,
        });

        let elapsed_min = now.duration_since(bucket.refilled_at).as_secs_f64() / 60.0;
        bucket.tokens = (bucket.tokens + elapsed_min * self.rate_per_min).min(self.burst);
        bucket.refilled_at = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            debug!("TokenBucketLimiter: key '{}' exhausted", key);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_then_exhaustion() {
        let limiter = TokenBucketLimiter::new(60, 10);

        for _ in 0..10 {
            assert!(limiter.try_acquire("gateway").await);
        }
        assert!(!limiter.try_acquire("gateway").await);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = TokenBucketLimiter::new(60, 2);

        assert!(limiter.try_acquire("a").await);
        assert!(limiter.try_acquire("a").await);
        assert!(!limiter.try_acquire("a").await);

        assert!(limiter.try_acquire("b").await);
    }

    #[tokio::test]
    async fn test_refill_over_time() {
        let limiter = TokenBucketLimiter::new(6000, 1);

        assert!(limiter.try_acquire("k").await);
        assert!(!limiter.try_acquire("k").await);

        // 6000/min refills one token in ~10ms.
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert!(limiter.try_acquire("k").await);
    }
}
