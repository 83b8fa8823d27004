//! Token-bucket admission gate for command execution

use crate::config::duration_ms;
use node_console_shared::defaults;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Admission rate: up to `capacity` commands per `interval`, bursts included
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub capacity: u32,
    #[serde(with = "duration_ms", rename = "interval_ms")]
    pub interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: defaults::RATE_LIMIT_BURST,
            interval: Duration::from_millis(defaults::RATE_LIMIT_INTERVAL_MS),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket refilled continuously at `capacity / interval`
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    /// Tokens per second
    refill_rate: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter with a full bucket
    pub fn new(config: RateLimitConfig) -> Self {
        let capacity = f64::from(config.capacity.max(1));
        let interval = config.interval.as_secs_f64().max(f64::EPSILON);
        Self {
            capacity,
            refill_rate: capacity / interval,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Admit one command now if the bucket has a token
    pub fn is_allowed(&self) -> bool {
        self.is_allowed_at(Instant::now())
    }

    /// Time until the next admission would be allowed; zero if allowed now
    pub fn wait_time(&self) -> Duration {
        self.wait_time_at(Instant::now())
    }

    /// Wait until a token is available and take it
    pub async fn acquire(&self) {
        while !self.is_allowed() {
            let wait = self.wait_time().max(Duration::from_millis(1));
            tokio::time::sleep(wait).await;
        }
    }

    fn is_allowed_at(&self, now: Instant) -> bool {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut bucket, now);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn wait_time_at(&self, now: Instant) -> Duration {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut bucket, now);
        if bucket.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_rate)
        }
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(self.capacity);
        bucket.last_refill = std::cmp::max(now, bucket.last_refill);
    }
}
