//! Outbound Rate Limiting
//!
//! Token bucket per external host, plus a single-flight guard so at most
//! one scrape request is in flight per (host, scraper) pair.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Host-keyed token bucket rate limiter
#[derive(Debug, Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<String, TokenBucket>>>,
    flights: Arc<Mutex<HashMap<(String, String), Arc<Mutex<()>>>>>,
    refill_rate: f64,
    burst: u32,
}

/// Token bucket state for one host
#[derive(Debug)]
struct TokenBucket {
    /// Maximum tokens (burst)
    capacity: f64,
    /// Current token count; fractional between refills
    tokens: f64,
    /// Last refill time
    last_refill: Instant,
    /// Tokens per second
    refill_rate: f64,
}

impl RateLimiter {
    /// Limiter with the given per-host refill rate and burst
    #[must_use]
    pub fn new(requests_per_second: f64, burst: u32) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            flights: Arc::new(Mutex::new(HashMap::new())),
            refill_rate: requests_per_second,
            burst,
        }
    }

    /// Wait until a request to `host` is allowed, consuming one token
    #[tracing::instrument(skip(self))]
    pub async fn acquire(&self, host: &str) {
        loop {
            let wait = {
                let mut buckets = self.buckets.lock().await;
                let bucket = buckets
                    .entry(host.to_string())
                    .or_insert_with(|| TokenBucket::new(self.refill_rate, self.burst));
                bucket.try_take()
            };

            match wait {
                None => return,
                Some(delay) => {
                    tracing::debug!(host, ?delay, "rate limit exhausted, waiting for refill");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Check whether a request would be allowed without consuming a token
    #[must_use]
    pub async fn is_allowed(&self, host: &str) -> bool {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(host.to_string())
            .or_insert_with(|| TokenBucket::new(self.refill_rate, self.burst));
        bucket.refill();
        bucket.tokens >= 1.0
    }

    /// Hold the single-flight slot for (host, scraper) for the guard's
    /// lifetime
    pub async fn begin_flight(&self, host: &str, scraper_id: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut flights = self.flights.lock().await;
            flights
                .entry((host.to_string(), scraper_id.to_string()))
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }

    /// Drop accumulated bucket state for a host (useful in tests)
    pub async fn reset(&self, host: &str) {
        let mut buckets = self.buckets.lock().await;
        buckets.remove(host);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(2.0, 4)
    }
}

impl TokenBucket {
    #[must_use]
    fn new(refill_rate: f64, burst: u32) -> Self {
        Self {
            capacity: f64::from(burst),
            tokens: f64::from(burst),
            last_refill: Instant::now(),
            refill_rate,
        }
    }

    /// Refill tokens based on elapsed time
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
            self.last_refill = now;
        }
    }

    /// Take one token, or report how long until one is available
    fn try_take(&mut self) -> Option<Duration> {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            let deficit = 1.0 - self.tokens;
            Some(Duration::from_secs_f64(deficit / self.refill_rate))
        }
    }
}
