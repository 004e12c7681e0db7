//! Common utilities shared across the trading core.
//!
//! - Token-bucket rate limiting for the Order Executor's exchange calls.
//! - Exponential backoff with jitter for retrying transient failures.

pub mod backoff;
pub mod rate_limiter;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
