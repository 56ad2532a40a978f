//! Policy engine — budget and retry middleware around the fallback chain.
//!
//! The policy stack (applied in order):
//! ```text
//! Call → [RetryPolicy] → FallbackTransport → per endpoint: [RateLimiter] → [Transport]
//! ```

pub mod rate_limiter;
pub mod retry;

pub use rate_limiter::{RateLimiter, RateLimiterConfig, TokenBucket};
pub use retry::{RetryConfig, RetryPolicy};
