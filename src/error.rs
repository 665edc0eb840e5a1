//! Error taxonomy for the call-protection pipeline
//!
//! Every way a pipeline invocation can end short of success is a distinct
//! variant, so the orchestrator can attribute each failed page to the layer
//! that produced it and external callers can tell overload apart from hard
//! failure via [`PipelineError::category`].

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::downstream::DownstreamError;

/// The protection layer that rejected a call before the dependency was
/// invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionLayer {
    RateLimiter,
    Bulkhead,
    CircuitBreaker,
}

impl std::fmt::Display for RejectionLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionLayer::RateLimiter => write!(f, "rate-limiter"),
            RejectionLayer::Bulkhead => write!(f, "bulkhead"),
            RejectionLayer::CircuitBreaker => write!(f, "circuit-breaker"),
        }
    }
}

/// Errors produced by a single pipeline invocation.
///
/// A rejection at an outer layer short-circuits all inner layers: no
/// dependency invocation happens and no inner-layer state is mutated.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No permit available in the current rate-limiter window.
    #[error("Rate limiter rejected the call: no permits left in this period")]
    RejectedByRateLimiter,

    /// All bulkhead permits are in use.
    #[error("Bulkhead rejected the call: all concurrent-call permits in use")]
    RejectedByBulkhead,

    /// The circuit breaker is open (or administratively forced open).
    #[error("Circuit breaker rejected the call (forced={forced})")]
    RejectedByCircuitBreaker { forced: bool },

    /// The attempt did not complete before the deadline.
    #[error("Call timed out after {elapsed:?}")]
    TimedOut { elapsed: Duration },

    /// Every retry attempt failed; `last` is the final dependency error.
    #[error("All {attempts} attempts failed, last error: {last}")]
    RetryExhausted { attempts: u32, last: DownstreamError },

    /// The dependency call itself failed.
    #[error("Dependency call failed: {0}")]
    Dependency(#[from] DownstreamError),
}

impl PipelineError {
    /// Machine-readable category for external callers, so overload can be
    /// told apart from hard failure.
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::RejectedByRateLimiter => "too_many_requests",
            PipelineError::RejectedByBulkhead => "bulkhead_full",
            PipelineError::RejectedByCircuitBreaker { .. } => "unavailable",
            PipelineError::TimedOut { .. } => "timeout",
            PipelineError::RetryExhausted { .. } => "retry_exhausted",
            PipelineError::Dependency(_) => "dependency_failure",
        }
    }

    /// The rejecting layer, when the call never reached the dependency.
    pub fn rejection_layer(&self) -> Option<RejectionLayer> {
        match self {
            PipelineError::RejectedByRateLimiter => Some(RejectionLayer::RateLimiter),
            PipelineError::RejectedByBulkhead => Some(RejectionLayer::Bulkhead),
            PipelineError::RejectedByCircuitBreaker { .. } => Some(RejectionLayer::CircuitBreaker),
            _ => None,
        }
    }
}

/// Configuration validation error shared by all layer builders.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid { message: message.into() }
    }
}

/// Result type for configuration builders.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories_are_distinct() {
        let errors = [
            PipelineError::RejectedByRateLimiter,
            PipelineError::RejectedByBulkhead,
            PipelineError::RejectedByCircuitBreaker { forced: false },
            PipelineError::TimedOut { elapsed: Duration::from_millis(200) },
            PipelineError::Dependency(DownstreamError::forced("test")),
        ];

        let mut categories: Vec<&str> = errors.iter().map(|e| e.category()).collect();
        categories.sort_unstable();
        categories.dedup();
        assert_eq!(categories.len(), errors.len());
    }

    #[test]
    fn test_rejection_layer_only_for_rejections() {
        assert_eq!(
            PipelineError::RejectedByRateLimiter.rejection_layer(),
            Some(RejectionLayer::RateLimiter)
        );
        assert_eq!(
            PipelineError::RejectedByBulkhead.rejection_layer(),
            Some(RejectionLayer::Bulkhead)
        );
        assert_eq!(
            PipelineError::RejectedByCircuitBreaker { forced: true }.rejection_layer(),
            Some(RejectionLayer::CircuitBreaker)
        );
        assert!(PipelineError::TimedOut { elapsed: Duration::ZERO }
            .rejection_layer()
            .is_none());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::invalid("bad value");
        assert!(err.to_string().contains("bad value"));
    }
}
