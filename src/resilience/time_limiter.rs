//! Deadline enforcement for asynchronous calls
//!
//! Runs the wrapped call on a worker task and races it against a deadline.
//! On expiry the task is aborted and the caller gets a timeout outcome within
//! the deadline plus negligible overhead. Cancellation is advisory only: an
//! aborted task stops at its next await point, so work that never yields may
//! keep running — the limiter stops attributing its result to the caller, it
//! does not guarantee the work stops.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// The wrapped call did not complete before the deadline.
#[derive(Debug, Clone, Copy, Error)]
#[error("Deadline of {deadline:?} exceeded after {elapsed:?}")]
pub struct DeadlineElapsed {
    pub deadline: Duration,
    pub elapsed: Duration,
}

/// Configuration for the time limiter.
#[derive(Debug, Clone)]
pub struct TimeLimiterConfig {
    /// Deadline applied to each wrapped call.
    pub deadline: Duration,
}

impl Default for TimeLimiterConfig {
    fn default() -> Self {
        Self { deadline: Duration::from_millis(1_500) }
    }
}

impl TimeLimiterConfig {
    /// Create a new configuration builder.
    pub fn builder() -> TimeLimiterConfigBuilder {
        TimeLimiterConfigBuilder::new()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.deadline.is_zero() {
            return Err(ConfigError::invalid("deadline must be greater than zero"));
        }
        Ok(())
    }
}

/// Builder for [`TimeLimiterConfig`].
#[derive(Debug, Default)]
pub struct TimeLimiterConfigBuilder {
    config: TimeLimiterConfig,
}

impl TimeLimiterConfigBuilder {
    pub fn new() -> Self {
        Self { config: TimeLimiterConfig::default() }
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.config.deadline = deadline;
        self
    }

    pub fn build(self) -> ConfigResult<TimeLimiterConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Metrics snapshot for monitoring.
#[derive(Debug, Clone)]
pub struct TimeLimiterMetrics {
    pub timeouts: u64,
    pub completions: u64,
    pub deadline: Duration,
}

/// Deadline wrapper around asynchronous calls.
///
/// Clones share the same counters.
pub struct TimeLimiter {
    config: TimeLimiterConfig,
    timeouts: Arc<AtomicU64>,
    completions: Arc<AtomicU64>,
}

impl TimeLimiter {
    /// Create a new time limiter.
    pub fn new(config: TimeLimiterConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            timeouts: Arc::new(AtomicU64::new(0)),
            completions: Arc::new(AtomicU64::new(0)),
            config,
        })
    }

    /// Configured deadline.
    pub fn deadline(&self) -> Duration {
        self.config.deadline
    }

    /// Run `fut` on a worker with the configured deadline.
    ///
    /// On expiry the worker task is aborted (best-effort) and
    /// [`DeadlineElapsed`] is returned; the caller is never held past the
    /// deadline plus scheduling overhead.
    pub async fn limit<F, T>(&self, fut: F) -> Result<T, DeadlineElapsed>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let started = Instant::now();
        let mut handle = tokio::spawn(fut);

        match tokio::time::timeout(self.config.deadline, &mut handle).await {
            Ok(Ok(value)) => {
                self.completions.fetch_add(1, Ordering::Relaxed);
                Ok(value)
            }
            Ok(Err(join_error)) => {
                if join_error.is_panic() {
                    std::panic::resume_unwind(join_error.into_panic());
                }
                // Aborted elsewhere; treat as expired attribution.
                Err(DeadlineElapsed { deadline: self.config.deadline, elapsed: started.elapsed() })
            }
            Err(_) => {
                handle.abort();
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                let elapsed = started.elapsed();
                debug!(?elapsed, deadline = ?self.config.deadline, "Time limiter: deadline exceeded");
                Err(DeadlineElapsed { deadline: self.config.deadline, elapsed })
            }
        }
    }

    /// Metrics snapshot.
    pub fn metrics(&self) -> TimeLimiterMetrics {
        TimeLimiterMetrics {
            timeouts: self.timeouts.load(Ordering::Acquire),
            completions: self.completions.load(Ordering::Acquire),
            deadline: self.config.deadline,
        }
    }
}

impl Clone for TimeLimiter {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            timeouts: Arc::clone(&self.timeouts),
            completions: Arc::clone(&self.completions),
        }
    }
}

impl std::fmt::Debug for TimeLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeLimiter").field("deadline", &self.config.deadline).finish()
    }
}
