//! One-stop aggregation of every layer's counters
//!
//! Pulls a point-in-time snapshot from each protection layer, the cache, and
//! the fault-injection counters into a single serializable value. Each layer
//! is read independently, so the snapshot is not a consistent cut across
//! layers; it is a monitoring view, not an accounting ledger.

use std::sync::Arc;

use serde::Serialize;

use crate::cache::MetadataCache;
use crate::clock::{Clock, SystemClock};
use crate::fault::{FaultInjectionConfig, FaultSettings};
use crate::resilience::circuit_breaker::CircuitState;
use crate::resilience::pipeline::{ResiliencePipeline, RetryObservation};

/// Circuit-breaker view.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_rate: f32,
    pub slow_call_rate: f32,
    pub window_samples: u32,
    pub rejected_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
}

/// Rate-limiter view.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterSnapshot {
    pub available_permits: u64,
    pub limit_for_period: u64,
    pub waiting_callers: u64,
    pub rejected: u64,
}

/// Bulkhead view.
#[derive(Debug, Clone, Serialize)]
pub struct BulkheadSnapshot {
    pub available: usize,
    pub max_concurrent: usize,
    pub total_entered: u64,
    pub rejected: u64,
}

/// Time-limiter view.
#[derive(Debug, Clone, Serialize)]
pub struct TimeLimiterSnapshot {
    pub timeouts: u64,
    pub completions: u64,
    pub deadline_ms: u64,
}

/// Cache view.
#[derive(Debug, Clone, Serialize)]
pub struct CacheSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

/// Downstream-side view: fault settings plus call counters.
#[derive(Debug, Clone, Serialize)]
pub struct DownstreamSnapshot {
    pub faults: FaultSettings,
    pub calls_attempted: u64,
    pub calls_failed: u64,
}

/// Everything at once.
#[derive(Debug, Clone, Serialize)]
pub struct ResilienceSnapshot {
    pub circuit_breaker: BreakerSnapshot,
    pub rate_limiter: RateLimiterSnapshot,
    pub bulkhead: BulkheadSnapshot,
    pub time_limiter: TimeLimiterSnapshot,
    pub retry: RetryObservation,
    pub cache: CacheSnapshot,
    pub downstream: DownstreamSnapshot,
}

/// Reads all layer metrics through one handle.
pub struct MetricsAggregator<C: Clock = SystemClock> {
    pipeline: ResiliencePipeline<C>,
    cache: MetadataCache<C>,
    faults: Arc<FaultInjectionConfig>,
}

impl<C: Clock> MetricsAggregator<C> {
    pub fn new(
        pipeline: ResiliencePipeline<C>,
        cache: MetadataCache<C>,
        faults: Arc<FaultInjectionConfig>,
    ) -> Self {
        Self { pipeline, cache, faults }
    }

    /// Point-in-time view across every layer.
    pub fn snapshot(&self) -> ResilienceSnapshot {
        let breaker = self.pipeline.circuit_breaker().metrics();
        let rate = self.pipeline.rate_limiter().metrics();
        let bulkhead = self.pipeline.bulkhead().metrics();
        let time = self.pipeline.time_limiter().metrics();
        let cache = self.cache.stats();

        ResilienceSnapshot {
            circuit_breaker: BreakerSnapshot {
                state: breaker.state,
                failure_rate: breaker.failure_rate,
                slow_call_rate: breaker.slow_call_rate,
                window_samples: breaker.window_samples,
                rejected_calls: breaker.rejected_calls,
                successful_calls: breaker.successful_calls,
                failed_calls: breaker.failed_calls,
            },
            rate_limiter: RateLimiterSnapshot {
                available_permits: rate.available_permits,
                limit_for_period: rate.limit_for_period,
                waiting_callers: rate.waiting_callers,
                rejected: rate.rejected,
            },
            bulkhead: BulkheadSnapshot {
                available: bulkhead.available,
                max_concurrent: bulkhead.max_concurrent,
                total_entered: bulkhead.total_entered,
                rejected: bulkhead.rejected,
            },
            time_limiter: TimeLimiterSnapshot {
                timeouts: time.timeouts,
                completions: time.completions,
                deadline_ms: time.deadline.as_millis() as u64,
            },
            retry: self.pipeline.retry_observation(),
            cache: CacheSnapshot { hits: cache.hits, misses: cache.misses, size: cache.size },
            downstream: DownstreamSnapshot {
                faults: self.faults.snapshot(),
                calls_attempted: self.faults.calls_attempted(),
                calls_failed: self.faults.calls_failed(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::clock::SystemClock;
    use crate::downstream::SimulatedDownstream;
    use crate::resilience::pipeline::PipelineBuilder;

    fn aggregator() -> (Arc<FaultInjectionConfig>, MetricsAggregator<SystemClock>) {
        let faults = Arc::new(FaultInjectionConfig::new());
        let downstream = Arc::new(SimulatedDownstream::new(Arc::clone(&faults)));
        let pipeline =
            PipelineBuilder::new().build_with_clock(downstream, SystemClock).unwrap();
        let cache =
            MetadataCache::with_clock(CacheConfig::default(), SystemClock).unwrap();
        (Arc::clone(&faults), MetricsAggregator::new(pipeline, cache, faults))
    }

    #[tokio::test]
    async fn test_snapshot_reflects_activity() {
        let (faults, aggregator) = aggregator();

        aggregator.pipeline.execute_page(1, 2).await.unwrap();
        faults.apply_flaky();

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.circuit_breaker.state, CircuitState::Closed);
        assert_eq!(snapshot.circuit_breaker.successful_calls, 1);
        assert_eq!(snapshot.retry.successful_without_retry, 1);
        assert_eq!(snapshot.downstream.calls_attempted, 1);
        assert_eq!(snapshot.downstream.faults.error_rate, 50);
    }

    #[tokio::test]
    async fn test_snapshot_serializes_to_json() {
        let (_, aggregator) = aggregator();

        let json = serde_json::to_value(aggregator.snapshot()).unwrap();
        assert_eq!(json["circuit_breaker"]["state"], "CLOSED");
        assert_eq!(json["bulkhead"]["rejected"], 0);
        assert!(json["downstream"]["faults"]["force_failure"].is_boolean());
    }
}
