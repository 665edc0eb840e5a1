//! Layered composition of the protection mechanisms
//!
//! Order is fixed: rate limiter, then bulkhead, then a retry loop whose every
//! attempt asks the circuit breaker for a permit and runs the dependency call
//! under the time limiter. Rate-limiter and bulkhead permits are taken once
//! per invocation and the bulkhead slot is held across all retry attempts, so
//! a retrying call counts as one unit of concurrency. A rejection at an outer
//! layer short-circuits everything inside it: the dependency is never invoked
//! and no inner-layer state changes.
//!
//! Each retry attempt re-enters the breaker's accounting individually: permit
//! before the call, success or failure sample after it. Timeouts are recorded
//! as breaker failures but are not retried, and breaker rejections are never
//! retried.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::downstream::{DownstreamError, SimulatedDownstream, SourceRecord};
use crate::error::{ConfigResult, PipelineError, RejectionLayer};
use crate::resilience::bulkhead::{Bulkhead, BulkheadConfig};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::resilience::rate_limiter::{RateLimiter, RateLimiterConfig};
use crate::resilience::retry::{Retried, Retry, RetryConfig, RetryError};
use crate::resilience::time_limiter::{TimeLimiter, TimeLimiterConfig};

/// One successfully fetched page together with the attempts it cost.
#[derive(Debug, Clone)]
pub struct PageFetch {
    pub records: Vec<SourceRecord>,
    /// 1 means no retry was needed.
    pub attempts: u32,
}

/// Result of a single diagnostic invocation.
///
/// Every variant carries the breaker state observed after the call finished,
/// so a call that trips the breaker reports OPEN.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CallOutcome {
    Success { records: usize, attempts: u32, elapsed: Duration, circuit_state: CircuitState },
    Rejected { layer: RejectionLayer, reason: String, circuit_state: CircuitState },
    Timeout { elapsed: Duration, circuit_state: CircuitState },
    Fallback { reason: String, attempts: u32, circuit_state: CircuitState },
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success { .. })
    }

    pub fn circuit_state(&self) -> CircuitState {
        match self {
            CallOutcome::Success { circuit_state, .. }
            | CallOutcome::Rejected { circuit_state, .. }
            | CallOutcome::Timeout { circuit_state, .. }
            | CallOutcome::Fallback { circuit_state, .. } => *circuit_state,
        }
    }
}

/// Retry outcomes observed by the pipeline, split by whether retrying was
/// involved. Only calls that reached the retry loop are counted; rate-limiter
/// and bulkhead rejections happen before it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryObservation {
    pub successful_without_retry: u64,
    pub successful_with_retry: u64,
    pub failed_without_retry: u64,
    pub failed_with_retry: u64,
}

/// A single attempt's failure, before mapping to the public error type.
#[derive(Debug)]
enum AttemptError {
    Breaker { forced: bool },
    Timeout { elapsed: Duration },
    Dependency(DownstreamError),
}

fn attempt_retryable(error: &AttemptError) -> bool {
    matches!(error, AttemptError::Dependency(_))
}

/// Builder assembling a pipeline from per-layer configurations.
#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    rate_limiter: RateLimiterConfig,
    bulkhead: BulkheadConfig,
    circuit_breaker: CircuitBreakerConfig,
    time_limiter: TimeLimiterConfig,
    retry: RetryConfig,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rate_limiter(mut self, config: RateLimiterConfig) -> Self {
        self.rate_limiter = config;
        self
    }

    pub fn bulkhead(mut self, config: BulkheadConfig) -> Self {
        self.bulkhead = config;
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    pub fn time_limiter(mut self, config: TimeLimiterConfig) -> Self {
        self.time_limiter = config;
        self
    }

    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    /// Build against the system clock.
    pub fn build(
        self,
        downstream: Arc<SimulatedDownstream>,
    ) -> ConfigResult<ResiliencePipeline> {
        self.build_with_clock(downstream, SystemClock)
    }

    /// Build with a custom clock driving the time-window layers.
    pub fn build_with_clock<C: Clock + Clone>(
        self,
        downstream: Arc<SimulatedDownstream>,
        clock: C,
    ) -> ConfigResult<ResiliencePipeline<C>> {
        Ok(ResiliencePipeline {
            rate_limiter: RateLimiter::with_clock(self.rate_limiter, clock.clone())?,
            bulkhead: Bulkhead::new(self.bulkhead)?,
            breaker: CircuitBreaker::with_clock(self.circuit_breaker, clock)?,
            time_limiter: TimeLimiter::new(self.time_limiter)?,
            retry: Retry::new(self.retry)?,
            downstream,
            successful_without_retry: Arc::new(AtomicU64::new(0)),
            successful_with_retry: Arc::new(AtomicU64::new(0)),
            failed_without_retry: Arc::new(AtomicU64::new(0)),
            failed_with_retry: Arc::new(AtomicU64::new(0)),
        })
    }
}

/// The composed protection pipeline around the simulated dependency.
///
/// Clones share all layer state and counters.
pub struct ResiliencePipeline<C: Clock = SystemClock> {
    rate_limiter: RateLimiter<C>,
    bulkhead: Bulkhead,
    breaker: CircuitBreaker<C>,
    time_limiter: TimeLimiter,
    retry: Retry,
    downstream: Arc<SimulatedDownstream>,
    successful_without_retry: Arc<AtomicU64>,
    successful_with_retry: Arc<AtomicU64>,
    failed_without_retry: Arc<AtomicU64>,
    failed_with_retry: Arc<AtomicU64>,
}

impl ResiliencePipeline<SystemClock> {
    /// Build a pipeline with default layer configurations.
    pub fn new(downstream: Arc<SimulatedDownstream>) -> ConfigResult<Self> {
        PipelineBuilder::new().build(downstream)
    }
}

impl<C: Clock> ResiliencePipeline<C> {
    /// Create a builder.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Fetch one page through every protection layer.
    pub async fn execute_page(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<PageFetch, PipelineError> {
        if !self.rate_limiter.try_acquire() {
            return Err(PipelineError::RejectedByRateLimiter);
        }

        let Some(_permit) = self.bulkhead.try_enter() else {
            return Err(PipelineError::RejectedByBulkhead);
        };

        let outcome = self
            .retry
            .execute(attempt_retryable, || self.attempt_once(page, page_size))
            .await;

        match outcome {
            Ok(Retried { value, attempts }) => {
                if attempts > 1 {
                    self.successful_with_retry.fetch_add(1, Ordering::Relaxed);
                    info!(page, attempts, "Page fetched after retry");
                } else {
                    self.successful_without_retry.fetch_add(1, Ordering::Relaxed);
                }
                Ok(PageFetch { records: value, attempts })
            }
            Err(error) => {
                if error.attempts() > 1 {
                    self.failed_with_retry.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.failed_without_retry.fetch_add(1, Ordering::Relaxed);
                }
                Err(Self::map_retry_error(error))
            }
        }
    }

    /// One breaker-accounted, deadline-bounded dependency call.
    async fn attempt_once(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<SourceRecord>, AttemptError> {
        if let Err(state) = self.breaker.try_permit() {
            debug!(page, %state, "Circuit breaker rejected attempt");
            return Err(AttemptError::Breaker { forced: state == CircuitState::ForcedOpen });
        }

        let started = Instant::now();
        let downstream = Arc::clone(&self.downstream);
        let call = async move { downstream.fetch_page(page, page_size).await };

        match self.time_limiter.limit(call).await {
            Ok(Ok(records)) => {
                self.breaker.record_success(started.elapsed());
                Ok(records)
            }
            Ok(Err(error)) => {
                self.breaker.record_failure(started.elapsed());
                Err(AttemptError::Dependency(error))
            }
            Err(deadline) => {
                self.breaker.record_failure(deadline.elapsed);
                Err(AttemptError::Timeout { elapsed: deadline.elapsed })
            }
        }
    }

    fn map_retry_error(error: RetryError<AttemptError>) -> PipelineError {
        match error {
            RetryError::NonRetryable { source, .. } => match source {
                AttemptError::Breaker { forced } => {
                    PipelineError::RejectedByCircuitBreaker { forced }
                }
                AttemptError::Timeout { elapsed } => PipelineError::TimedOut { elapsed },
                AttemptError::Dependency(e) => PipelineError::Dependency(e),
            },
            RetryError::Exhausted { attempts, last } => match last {
                AttemptError::Dependency(e) => PipelineError::RetryExhausted { attempts, last: e },
                AttemptError::Breaker { forced } => {
                    PipelineError::RejectedByCircuitBreaker { forced }
                }
                AttemptError::Timeout { elapsed } => PipelineError::TimedOut { elapsed },
            },
        }
    }

    /// Run one invocation and fold the result into a serializable outcome.
    pub async fn call_once(&self, page: u32, page_size: u32) -> CallOutcome {
        let started = Instant::now();
        let result = self.execute_page(page, page_size).await;
        let elapsed = started.elapsed();
        let circuit_state = self.breaker.state();
        match result {
            Ok(fetch) => CallOutcome::Success {
                records: fetch.records.len(),
                attempts: fetch.attempts,
                elapsed,
                circuit_state,
            },
            Err(error) => match error {
                PipelineError::TimedOut { elapsed } => {
                    CallOutcome::Timeout { elapsed, circuit_state }
                }
                PipelineError::RetryExhausted { attempts, ref last } => CallOutcome::Fallback {
                    reason: last.to_string(),
                    attempts,
                    circuit_state,
                },
                PipelineError::Dependency(ref cause) => CallOutcome::Fallback {
                    reason: cause.to_string(),
                    attempts: 1,
                    circuit_state,
                },
                ref rejected => CallOutcome::Rejected {
                    // Only rejection variants remain here.
                    layer: rejected.rejection_layer().unwrap_or(RejectionLayer::CircuitBreaker),
                    reason: rejected.to_string(),
                    circuit_state,
                },
            },
        }
    }

    pub fn rate_limiter(&self) -> &RateLimiter<C> {
        &self.rate_limiter
    }

    pub fn bulkhead(&self) -> &Bulkhead {
        &self.bulkhead
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker<C> {
        &self.breaker
    }

    pub fn time_limiter(&self) -> &TimeLimiter {
        &self.time_limiter
    }

    pub fn downstream(&self) -> &Arc<SimulatedDownstream> {
        &self.downstream
    }

    /// Retry outcomes seen so far.
    pub fn retry_observation(&self) -> RetryObservation {
        RetryObservation {
            successful_without_retry: self.successful_without_retry.load(Ordering::Acquire),
            successful_with_retry: self.successful_with_retry.load(Ordering::Acquire),
            failed_without_retry: self.failed_without_retry.load(Ordering::Acquire),
            failed_with_retry: self.failed_with_retry.load(Ordering::Acquire),
        }
    }
}

impl<C: Clock> Clone for ResiliencePipeline<C> {
    fn clone(&self) -> Self {
        Self {
            rate_limiter: self.rate_limiter.clone(),
            bulkhead: self.bulkhead.clone(),
            breaker: self.breaker.clone(),
            time_limiter: self.time_limiter.clone(),
            retry: self.retry.clone(),
            downstream: Arc::clone(&self.downstream),
            successful_without_retry: Arc::clone(&self.successful_without_retry),
            successful_with_retry: Arc::clone(&self.successful_with_retry),
            failed_without_retry: Arc::clone(&self.failed_without_retry),
            failed_with_retry: Arc::clone(&self.failed_with_retry),
        }
    }
}

impl<C: Clock> std::fmt::Debug for ResiliencePipeline<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResiliencePipeline")
            .field("rate_limiter", &self.rate_limiter)
            .field("bulkhead", &self.bulkhead)
            .field("circuit_breaker", &self.breaker)
            .field("time_limiter", &self.time_limiter)
            .finish()
    }
}
