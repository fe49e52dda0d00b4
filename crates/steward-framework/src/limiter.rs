//! Per-sender token buckets.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    refilled: Instant,
}

/// Admits commands per key at a fixed rate.
///
/// Each key owns a bucket holding up to `burst` tokens, refilled by one
/// token every `interval`. A command consumes one token; an empty bucket
/// denies. Buckets that have refilled completely are dropped, since a
/// missing bucket behaves as a full one.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    burst: u32,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    /// Creates a limiter. A zero `burst` is treated as one.
    pub fn new(interval: Duration, burst: u32) -> Self {
        Self {
            interval,
            burst: burst.max(1),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Consumes a token for `key`. Returns `false` if none is available.
    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }

    fn allow_at(&self, key: &str, now: Instant) -> bool {
        let capacity = f64::from(self.burst);
        let mut buckets = self.buckets.lock();
        buckets.retain(|_, b| !self.is_full(b, now, capacity));
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: capacity,
            refilled: now,
        });

        if self.interval.is_zero() {
            bucket.tokens = capacity;
        } else {
            let elapsed = now.saturating_duration_since(bucket.refilled);
            let earned = elapsed.as_secs_f64() / self.interval.as_secs_f64();
            bucket.tokens = (bucket.tokens + earned).min(capacity);
        }
        bucket.refilled = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn is_full(&self, bucket: &Bucket, now: Instant, capacity: f64) -> bool {
        let missing = capacity - bucket.tokens;
        let elapsed = now.saturating_duration_since(bucket.refilled);
        elapsed.as_secs_f64() >= missing * self.interval.as_secs_f64()
    }

    /// Number of keys still refilling.
    pub fn tracked(&self) -> usize {
        self.buckets.lock().len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 1)
    }
}
