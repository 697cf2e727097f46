//! Guarded vendor call: retry around rate limit + timeout
//!
//! ```text
//! retry ──► wait_for_token(key, token_timeout) ──► timeout(call_timeout, f())
//!   ▲                                                           │
//!   └──────────────── Transient / Timeout ◄─────────────────────┘
//! ```
//!
//! Each attempt takes its own token, so retries are rate limited too.

use crate::error::{ProviderError, Result};
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::retry::RetryPolicy;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CallGuard {
    limiter: Arc<RateLimiter>,
    key: String,
    rate: RateLimitConfig,
    retry: RetryPolicy,
    call_timeout: Duration,
    token_timeout: Duration,
}

impl CallGuard {
    pub fn new(limiter: Arc<RateLimiter>, key: impl Into<String>) -> Self {
        Self {
            limiter,
            key: key.into(),
            rate: RateLimitConfig::default(),
            retry: RetryPolicy::vendor(),
            call_timeout: Duration::from_secs(10),
            token_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_rate(mut self, rate: RateLimitConfig) -> Self {
        self.rate = rate;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_token_timeout(mut self, timeout: Duration) -> Self {
        self.token_timeout = timeout;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn rate(&self) -> &RateLimitConfig {
        &self.rate
    }

    /// Run one vendor operation under the rate limiter, call timeout and retry policy
    pub async fn call<T, F, Fut>(&self, operation: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let f = &f;
        let this = self;
        self.retry
            .execute_with_observer(
                move || async move {
                    this.limiter
                        .wait_for_token(&this.key, &this.rate, this.token_timeout)
                        .await?;
                    match tokio::time::timeout(this.call_timeout, f()).await {
                        Ok(result) => result,
                        Err(_) => Err(ProviderError::Timeout(format!(
                            "{} exceeded {}ms",
                            operation,
                            this.call_timeout.as_millis()
                        ))),
                    }
                },
                |error, attempt, delay| {
                    tracing::warn!(
                        key = %self.key,
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Vendor call failed, retrying"
                    );
                },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn guard(limiter: Arc<RateLimiter>) -> CallGuard {
        CallGuard::new(limiter, "test-api")
            .with_rate(RateLimitConfig::new(10, 10))
            .with_retry(RetryPolicy::vendor().without_jitter())
            .with_call_timeout(Duration::from_millis(200))
            .with_token_timeout(Duration::from_millis(100))
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_attempt_consumes_a_token() {
        let limiter = Arc::new(RateLimiter::new());
        let guard = guard(limiter.clone());
        let calls = &AtomicU32::new(0);

        let result: Result<()> = guard
            .call("describe", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::transient("Throttling", "busy"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // backoff refills the bucket, the last attempt's token is still spent
        assert_eq!(limiter.available_tokens("test-api", guard.rate()), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out_and_retries() {
        let guard = guard(Arc::new(RateLimiter::new()));
        let calls = &AtomicU32::new(0);
        let started = Instant::now();

        let result = guard
            .call("describe", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok(42)
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // 200ms timeout + 1000ms backoff
        assert_eq!(started.elapsed(), Duration::from_millis(1200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_timeout_is_not_retried() {
        let limiter = Arc::new(RateLimiter::new());
        let guard = CallGuard::new(limiter, "tight")
            .with_rate(RateLimitConfig::new(1, 1))
            .with_token_timeout(Duration::from_millis(100));
        let calls = &AtomicU32::new(0);

        let first = guard
            .call("op", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(first.is_ok());

        let second = guard
            .call("op", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(
            second,
            Err(ProviderError::RateLimitTimeout { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
