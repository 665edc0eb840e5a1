//! Call-protection mechanisms and their composition
//!
//! Five independent layers, each usable on its own, plus the
//! [`pipeline::ResiliencePipeline`] that wires them around the simulated
//! dependency in a fixed order:
//!
//! - [`rate_limiter`]: fixed-window admission control
//! - [`bulkhead`]: fail-fast concurrency cap
//! - [`circuit_breaker`]: sliding-window failure detector with probing
//! - [`time_limiter`]: per-attempt deadline
//! - [`retry`]: bounded exponential-backoff re-invocation

pub mod bulkhead;
pub mod circuit_breaker;
pub mod pipeline;
pub mod rate_limiter;
pub mod retry;
pub mod time_limiter;

pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadMetrics, BulkheadPermit};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState,
};
pub use pipeline::{CallOutcome, PageFetch, PipelineBuilder, ResiliencePipeline, RetryObservation};
pub use rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterMetrics};
pub use retry::{Retried, Retry, RetryClassifier, RetryConfig, RetryError};
pub use time_limiter::{DeadlineElapsed, TimeLimiter, TimeLimiterConfig, TimeLimiterMetrics};
