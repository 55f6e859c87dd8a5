//! Retry executor and per-provider circuit breaker.
//!
//! Adapters and the connection pool never retry or trip breakers themselves;
//! they hand their fallible call to a `ResilienceLayer` and let it decide.

pub mod circuit_breaker;
pub mod dispatch;
pub mod retry;

pub use circuit_breaker::{BreakerState, CircuitBreaker, Permit};
pub use dispatch::{ResilienceError, ResilienceLayer};
pub use retry::{retry_with_backoff, RetryConfig};
