// src/resilience/mod.rs
//! Admission control and retries for every external call.

pub mod rate_limiter;
pub mod retry;

pub use rate_limiter::RateLimiter;
pub use retry::{ensure_success, send_with_retry, HttpError, RetryPolicy};
