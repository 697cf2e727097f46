//! Retry with exponential backoff

use crate::error::{ErrorKind, ProviderError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Retry configuration for vendor operations
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub base_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_base: f64,

    /// Random spread applied to each delay (0.1 = ±10%)
    pub jitter_factor: f64,

    /// Error kinds worth retrying. `None` retries everything.
    pub retryable: Option<Vec<ErrorKind>>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_base: 2.0,
            jitter_factor: 0.1,
            retryable: None,
        }
    }
}

impl RetryPolicy {
    /// Policy for outbound vendor calls: only transport-level failures retry
    pub fn vendor() -> Self {
        Self {
            retryable: Some(vec![ErrorKind::Transient, ErrorKind::Timeout]),
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }

    pub fn is_retryable(&self, error: &ProviderError) -> bool {
        match &self.retryable {
            Some(kinds) => kinds.contains(&error.kind()),
            None => true,
        }
    }

    /// Backoff delay after the given (1-based) failed attempt, before jitter
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let ms = self.base_delay.as_millis() as f64 * self.backoff_base.powi(exponent);
        let capped = ms.min(self.max_delay.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter_factor <= 0.0 {
            return delay;
        }
        let spread: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
        let ms = delay.as_millis() as f64 * (1.0 + spread * self.jitter_factor);
        Duration::from_millis(ms.max(0.0) as u64)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error,
    /// or attempts are exhausted. The last error is returned.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_observer(op, |error, attempt, delay| {
            tracing::warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after failure"
            );
        })
        .await
    }

    /// Like [`RetryPolicy::execute`], calling `observer(error, attempt, delay)`
    /// before each backoff sleep
    pub async fn execute_with_observer<T, F, Fut, O>(&self, mut op: F, observer: O) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        O: Fn(&ProviderError, u32, Duration),
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= max_attempts || !self.is_retryable(&error) {
                        return Err(error);
                    }
                    let delay = self.jittered(self.delay_for_attempt(attempt));
                    observer(&error, attempt, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
