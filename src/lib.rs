//! Layered call protection around an unreliable dependency.
//!
//! Guardrail wraps a simulated downstream service in a fixed stack of
//! protection mechanisms and exposes the machinery to exercise them:
//!
//! - [`resilience`]: rate limiter, bulkhead, circuit breaker, time limiter,
//!   retry, and the [`resilience::ResiliencePipeline`] composing them
//! - [`downstream`]: the in-process simulated dependency
//! - [`fault`]: runtime-mutable fault injection driving the simulation
//! - [`transfer`]: batch orchestration of page fetches into a record sink
//! - [`cache`]: TTL cache for downstream metadata lookups
//! - [`metrics`]: one snapshot across every layer's counters
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use guardrail::downstream::SimulatedDownstream;
//! use guardrail::fault::FaultInjectionConfig;
//! use guardrail::resilience::ResiliencePipeline;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let faults = Arc::new(FaultInjectionConfig::new());
//! faults.apply_flaky();
//!
//! let downstream = Arc::new(SimulatedDownstream::new(Arc::clone(&faults)));
//! let pipeline = ResiliencePipeline::new(downstream)?;
//!
//! let fetch = pipeline.execute_page(1, 10).await?;
//! println!("{} records in {} attempts", fetch.records.len(), fetch.attempts);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod cache;
pub mod clock;
pub mod downstream;
pub mod error;
pub mod fault;
pub mod metrics;
pub mod resilience;
pub mod transfer;

pub use cache::{CacheConfig, CacheStats, MetadataCache};
pub use clock::{Clock, MockClock, SystemClock};
pub use downstream::{DownstreamError, SimulatedDownstream, SourceRecord};
pub use error::{ConfigError, ConfigResult, PipelineError, RejectionLayer};
pub use fault::{FaultInjectionConfig, FaultSettings};
pub use metrics::{MetricsAggregator, ResilienceSnapshot};
pub use resilience::{
    Bulkhead, BulkheadConfig, CircuitBreaker, CircuitBreakerConfig, CircuitState, PipelineBuilder,
    RateLimiter, RateLimiterConfig, ResiliencePipeline, Retry, RetryConfig, TimeLimiter,
    TimeLimiterConfig,
};
pub use transfer::{
    BatchIndex, InMemorySink, RecordSink, RecordStatus, SinkError, TransferError,
    TransferOrchestrator, TransferRecord, TransferSummary,
};
