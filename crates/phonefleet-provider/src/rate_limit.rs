//! Token bucket rate limiter
//!
//! One bucket per key (typically one key per vendor API), created on first
//! use and kept for the lifetime of the [`RateLimiter`]. Every bucket read
//! and write goes through a single mutex so concurrent device operations
//! sharing a vendor key never lose a refill or a consume.

use crate::error::{ProviderError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Bucket parameters for a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum (and initial) number of tokens
    pub capacity: u32,
    /// Tokens added per second
    pub refill_rate: u32,
}

impl RateLimitConfig {
    pub fn new(capacity: u32, refill_rate: u32) -> Self {
        Self {
            capacity,
            refill_rate,
        }
    }

    /// Time needed to accumulate a single token
    pub fn refill_interval(&self) -> Duration {
        if self.refill_rate == 0 {
            return Duration::MAX;
        }
        Duration::from_secs_f64(1.0 / self.refill_rate as f64)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 20,
            refill_rate: 10,
        }
    }
}

#[derive(Debug)]
struct TokenBucket {
    capacity: u32,
    tokens: u32,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(config: &RateLimitConfig, now: Instant) -> Self {
        Self {
            capacity: config.capacity,
            tokens: config.capacity,
            last_refill: now,
        }
    }

    fn refill(&mut self, config: &RateLimitConfig, now: Instant) {
        if config.refill_rate == 0 {
            return;
        }
        let elapsed_ms = now.saturating_duration_since(self.last_refill).as_millis() as f64;
        let interval_ms = 1000.0 / config.refill_rate as f64;
        let to_add = (elapsed_ms / interval_ms).floor() as u64;
        if to_add > 0 {
            let filled = (self.tokens as u64 + to_add).min(self.capacity as u64);
            self.tokens = filled as u32;
            self.last_refill = now;
        }
    }

    fn try_take(&mut self) -> bool {
        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }
}

/// Per-key token bucket rate limiter
///
/// Constructed once at startup and shared (`Arc`) by every vendor client.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_bucket<R>(
        &self,
        key: &str,
        config: &RateLimitConfig,
        f: impl FnOnce(&mut TokenBucket) -> R,
    ) -> R {
        let now = Instant::now();
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(config, now));
        // 設定変更を反映（容量を縮めた場合は即座に切り詰める）
        bucket.capacity = config.capacity;
        bucket.tokens = bucket.tokens.min(bucket.capacity);
        bucket.refill(config, now);
        f(bucket)
    }

    /// Take one token if available
    pub fn try_consume(&self, key: &str, config: &RateLimitConfig) -> bool {
        self.with_bucket(key, config, |bucket| bucket.try_take())
    }

    /// Tokens currently available for a key (after refill)
    pub fn available_tokens(&self, key: &str, config: &RateLimitConfig) -> u32 {
        self.with_bucket(key, config, |bucket| bucket.tokens)
    }

    /// Take one token, sleeping until one is available
    ///
    /// Fails with [`ProviderError::RateLimitTimeout`] without sleeping when
    /// the required wait exceeds what is left of `timeout`. Returns the time
    /// spent waiting.
    pub async fn wait_for_token(
        &self,
        key: &str,
        config: &RateLimitConfig,
        timeout: Duration,
    ) -> Result<Duration> {
        let started = Instant::now();
        loop {
            if self.try_consume(key, config) {
                return Ok(started.elapsed());
            }

            let waited = started.elapsed();
            let remaining = timeout.saturating_sub(waited);
            let required = config.refill_interval();
            if required > remaining {
                tracing::debug!(
                    key,
                    required_ms = required.as_millis() as u64,
                    timeout_ms = timeout.as_millis() as u64,
                    "Rate limit wait exceeds timeout"
                );
                return Err(ProviderError::RateLimitTimeout {
                    key: key.to_string(),
                    required_ms: required.as_millis() as u64,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }

            tracing::trace!(key, wait_ms = required.as_millis() as u64, "Waiting for token");
            tokio::time::sleep(required).await;
        }
    }
}
