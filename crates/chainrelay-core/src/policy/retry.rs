//! Exponential backoff retry policy with random jitter.
//!
//! [`RetryPolicy::run`] drives an operation to completion: fatal errors
//! (see [`ErrorKind::is_fatal`](crate::classify::ErrorKind::is_fatal)) surface
//! on the first failure, everything else is retried up to `max_retries` times.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::TransportError;

/// Configuration for the retry policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the first try).
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each subsequent one.
    pub base_delay: Duration,
    /// Maximum backoff delay (caps exponential growth, jitter excluded).
    pub max_delay: Duration,
    /// Upper bound of the uniform random jitter added to each delay.
    pub jitter: Duration,
}

impl RetryConfig {
    /// Tighter settings for transaction submission, which mostly fails fatally.
    pub fn submission() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::from_millis(250),
            ..Self::default()
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_millis(250),
        }
    }
}

/// Stateless retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before the `attempt`-th retry (1-based), without jitter.
    /// Returns `None` if `attempt` exceeds `max_retries`.
    pub fn base_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.config.max_retries {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        let delay = self
            .config
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.config.max_delay);
        Some(delay.min(self.config.max_delay))
    }

    /// Delay before the `attempt`-th retry (1-based), including jitter.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        let base = self.base_delay(attempt)?;
        let jitter_ms = self.config.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
        };
        Some(base + jitter)
    }

    /// Returns `true` if any retries remain after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.config.max_retries
    }

    /// Run `op` until it succeeds, fails fatally, or retries are exhausted.
    ///
    /// The error returned is always the last one `op` produced, unchanged.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut attempt = 0u32;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if !err.is_retryable() {
                tracing::debug!(kind = %err.kind(), error = %err, "fatal error, not retrying");
                return Err(err);
            }
            attempt += 1;
            if !self.should_retry(attempt) {
                tracing::error!(attempt, error = %err, "max retries exceeded");
                return Err(err);
            }
            let delay = self.next_delay(attempt).unwrap_or(self.config.max_delay);
            tracing::warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                kind = %err.kind(),
                error = %err,
                "retrying request"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
