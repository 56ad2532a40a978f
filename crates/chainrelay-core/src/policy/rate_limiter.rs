//! Token bucket rate limiter.
//!
//! Models a token bucket: tokens accrue at `refill_rate` tokens/second up to
//! `capacity`. Each request consumes `cost` tokens. [`RateLimiter::admit`] parks
//! the caller until enough budget exists; an unconfigured limiter admits
//! everything immediately.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Shortest sleep between admission checks.
pub const MIN_POLL: Duration = Duration::from_millis(10);
/// Longest sleep between admission checks.
pub const MAX_POLL: Duration = Duration::from_millis(250);

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum tokens in the bucket.
    pub capacity: f64,
    /// Token refill rate (tokens per second).
    pub refill_rate: f64,
    /// Tokens at construction; `None` starts full.
    pub initial_tokens: Option<f64>,
}

impl RateLimiterConfig {
    /// A budget of `cost_per_sec` with one second of burst capacity.
    pub fn per_second(cost_per_sec: f64) -> Self {
        Self {
            capacity: cost_per_sec,
            refill_rate: cost_per_sec,
            initial_tokens: None,
        }
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::per_second(300.0) // 300 CU/s, Alchemy free tier
    }
}

struct BucketState {
    tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

/// Thread-safe token bucket.
pub struct TokenBucket {
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(config: RateLimiterConfig) -> Self {
        let tokens = config
            .initial_tokens
            .unwrap_or(config.capacity)
            .clamp(0.0, config.capacity);
        Self {
            capacity: config.capacity,
            state: Mutex::new(BucketState {
                tokens,
                refill_rate: config.refill_rate.max(0.0),
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Try to acquire `cost` tokens.
    ///
    /// Returns `true` if tokens were available and consumed.
    pub fn try_acquire(&self, cost: f64) -> bool {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state);

        if state.tokens >= cost {
            state.tokens -= cost;
            true
        } else {
            false
        }
    }

    /// Returns the estimated wait time before `cost` tokens are available.
    pub fn wait_time(&self, cost: f64) -> Duration {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state);
        let deficit = cost - state.tokens;
        if deficit <= 0.0 {
            Duration::ZERO
        } else if state.refill_rate <= 0.0 {
            Duration::MAX
        } else {
            Duration::try_from_secs_f64(deficit / state.refill_rate).unwrap_or(Duration::MAX)
        }
    }

    /// Returns currently available tokens.
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state);
        state.tokens
    }

    /// Change the refill rate. Tokens accrued so far are credited at the old rate.
    pub fn set_refill_rate(&self, rate: f64) {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state);
        state.refill_rate = rate.max(0.0);
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        let new_tokens = elapsed * state.refill_rate;
        state.tokens = (state.tokens + new_tokens).min(self.capacity);
        state.last_refill = now;
    }
}

/// Optional global throughput gate.
pub struct RateLimiter {
    bucket: Option<TokenBucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            bucket: Some(TokenBucket::new(config)),
        }
    }

    /// A limiter that admits everything immediately.
    pub fn disabled() -> Self {
        Self { bucket: None }
    }

    /// `Some(budget)` builds a per-second limiter, `None` a pass-through.
    pub fn from_budget(cost_per_sec: Option<f64>) -> Self {
        match cost_per_sec {
            Some(rate) => Self::new(RateLimiterConfig::per_second(rate)),
            None => Self::disabled(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.bucket.is_some()
    }

    pub fn bucket(&self) -> Option<&TokenBucket> {
        self.bucket.as_ref()
    }

    /// Wait until `cost` units of budget are available, then deduct them.
    pub async fn admit(&self, cost: u32) {
        let Some(bucket) = &self.bucket else {
            return;
        };
        // Larger than the bucket can ever hold: admit once the bucket is full.
        let cost = f64::from(cost).min(bucket.capacity());

        loop {
            if bucket.try_acquire(cost) {
                return;
            }
            let wait = bucket.wait_time(cost).clamp(MIN_POLL, MAX_POLL);
            tracing::debug!(cost, wait_ms = wait.as_millis() as u64, "budget exhausted, waiting");
            tokio::time::sleep(wait).await;
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
