//! Sliding-window circuit breaker
//!
//! State machine over the last `window_size` call outcomes. The window is a
//! fixed-capacity ring buffer of outcome tags with running failure/slow
//! counts adjusted on overwrite, so recording an outcome and reading the
//! rates are both O(1).
//!
//! States:
//! - `Closed`: calls pass through, outcomes are recorded. Once the window
//!   holds at least `minimum_calls` samples and the failure rate (or slow
//!   call rate) reaches its threshold, the breaker opens.
//! - `Open`: calls are rejected without touching the dependency. After
//!   `wait_duration` the next permit request transitions to `HalfOpen` and is
//!   let through as the first probe.
//! - `HalfOpen`: up to `permitted_probes` calls pass; their outcomes land in
//!   a fresh window. Once all probes have reported, the breaker either
//!   reopens (probe failure rate at threshold) or closes.
//! - `ForcedOpen`: administrative override. Rejects everything; only an
//!   explicit `reset()` leaves this state.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigError, ConfigResult};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls pass through and are recorded.
    Closed,
    /// Calls are rejected; no dependency call occurs.
    Open,
    /// Limited probe calls are allowed to test recovery.
    HalfOpen,
    /// Administrative open; only `reset()` exits.
    ForcedOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
            CircuitState::ForcedOpen => write!(f, "FORCED_OPEN"),
        }
    }
}

/// Configuration for the sliding-window circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of outcomes kept in the sliding window.
    pub window_size: usize,
    /// Minimum samples in the window before the failure rate is evaluated.
    pub minimum_calls: u32,
    /// Failure rate (percent) at which the breaker opens.
    pub failure_rate_threshold: f32,
    /// Calls at least this slow count toward the slow-call rate.
    pub slow_call_threshold: Duration,
    /// Slow-call rate (percent) at which the breaker opens.
    pub slow_call_rate_threshold: f32,
    /// Time to stay open before allowing a probe.
    pub wait_duration: Duration,
    /// Probe calls permitted in half-open state.
    pub permitted_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            minimum_calls: 10,
            failure_rate_threshold: 50.0,
            slow_call_threshold: Duration::from_secs(2),
            slow_call_rate_threshold: 100.0,
            wait_duration: Duration::from_secs(10),
            permitted_probes: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration builder.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.window_size == 0 {
            return Err(ConfigError::invalid("window_size must be greater than 0"));
        }
        if self.minimum_calls == 0 {
            return Err(ConfigError::invalid("minimum_calls must be greater than 0"));
        }
        if !(0.0..=100.0).contains(&self.failure_rate_threshold)
            || self.failure_rate_threshold == 0.0
        {
            return Err(ConfigError::invalid(
                "failure_rate_threshold must be in (0, 100]",
            ));
        }
        if !(0.0..=100.0).contains(&self.slow_call_rate_threshold)
            || self.slow_call_rate_threshold == 0.0
        {
            return Err(ConfigError::invalid(
                "slow_call_rate_threshold must be in (0, 100]",
            ));
        }
        if self.permitted_probes == 0 {
            return Err(ConfigError::invalid("permitted_probes must be greater than 0"));
        }
        if self.permitted_probes as usize > self.window_size {
            return Err(ConfigError::invalid(
                "permitted_probes must not exceed window_size",
            ));
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn window_size(mut self, size: usize) -> Self {
        self.config.window_size = size;
        self
    }

    pub fn minimum_calls(mut self, calls: u32) -> Self {
        self.config.minimum_calls = calls;
        self
    }

    pub fn failure_rate_threshold(mut self, percent: f32) -> Self {
        self.config.failure_rate_threshold = percent;
        self
    }

    pub fn slow_call_threshold(mut self, threshold: Duration) -> Self {
        self.config.slow_call_threshold = threshold;
        self
    }

    pub fn slow_call_rate_threshold(mut self, percent: f32) -> Self {
        self.config.slow_call_rate_threshold = percent;
        self
    }

    pub fn wait_duration(mut self, wait: Duration) -> Self {
        self.config.wait_duration = wait;
        self
    }

    pub fn permitted_probes(mut self, probes: u32) -> Self {
        self.config.permitted_probes = probes;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// One recorded call outcome.
#[derive(Debug, Clone, Copy, Default)]
struct Sample {
    failure: bool,
    slow: bool,
}

/// Fixed-capacity ring buffer of outcome tags with running counts.
///
/// `record` overwrites the oldest slot once full and adjusts the counts for
/// the overwritten sample, so rate computation never rescans the buffer.
#[derive(Debug)]
struct SlidingWindow {
    slots: Vec<Sample>,
    cursor: usize,
    len: usize,
    failures: u32,
    slow: u32,
}

impl SlidingWindow {
    fn new(capacity: usize) -> Self {
        Self { slots: vec![Sample::default(); capacity], cursor: 0, len: 0, failures: 0, slow: 0 }
    }

    fn record(&mut self, sample: Sample) {
        if self.len == self.slots.len() {
            let evicted = self.slots[self.cursor];
            if evicted.failure {
                self.failures -= 1;
            }
            if evicted.slow {
                self.slow -= 1;
            }
        } else {
            self.len += 1;
        }

        self.slots[self.cursor] = sample;
        self.cursor = (self.cursor + 1) % self.slots.len();
        if sample.failure {
            self.failures += 1;
        }
        if sample.slow {
            self.slow += 1;
        }
    }

    fn reset(&mut self) {
        self.cursor = 0;
        self.len = 0;
        self.failures = 0;
        self.slow = 0;
    }

    fn len(&self) -> u32 {
        self.len as u32
    }

    fn failure_rate(&self) -> f32 {
        if self.len == 0 {
            return 0.0;
        }
        self.failures as f32 * 100.0 / self.len as f32
    }

    fn slow_rate(&self) -> f32 {
        if self.len == 0 {
            return 0.0;
        }
        self.slow as f32 * 100.0 / self.len as f32
    }
}

/// Mutable breaker state, updated atomically under one lock.
#[derive(Debug)]
struct Inner {
    state: CircuitState,
    window: SlidingWindow,
    opened_at: Option<Instant>,
    probes_issued: u32,
}

/// Metrics snapshot for monitoring.
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub failure_rate: f32,
    pub slow_call_rate: f32,
    pub window_samples: u32,
    pub rejected_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
}

/// Sliding-window circuit breaker shared by all callers of one pipeline.
///
/// Clones share the same state. State transitions are the only mutations and
/// happen under a single mutex; lifetime counters are separate atomics.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<Inner>>,
    rejected_calls: Arc<AtomicU64>,
    successful_calls: Arc<AtomicU64>,
    failed_calls: Arc<AtomicU64>,
    clock: Arc<C>,
}

impl CircuitBreaker<SystemClock> {
    /// Create a circuit breaker using the system clock.
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a circuit breaker with a custom clock (useful for testing).
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        let window = SlidingWindow::new(config.window_size);
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                state: CircuitState::Closed,
                window,
                opened_at: None,
                probes_issued: 0,
            })),
            rejected_calls: Arc::new(AtomicU64::new(0)),
            successful_calls: Arc::new(AtomicU64::new(0)),
            failed_calls: Arc::new(AtomicU64::new(0)),
            clock: Arc::new(clock),
            config,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Circuit breaker state lock poisoned");
                poisoned.into_inner()
            }
        }
    }

    /// Ask for permission to make one call.
    ///
    /// `Ok(())` means the call may proceed and its outcome must be reported
    /// via [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure). `Err` carries the rejecting
    /// state (`Open` or `ForcedOpen`); no dependency call may happen.
    pub fn try_permit(&self) -> Result<(), CircuitState> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::ForcedOpen => {
                self.rejected_calls.fetch_add(1, Ordering::Relaxed);
                Err(CircuitState::ForcedOpen)
            }
            CircuitState::Open => {
                let waited_out = inner
                    .opened_at
                    .map(|at| self.clock.now().duration_since(at) >= self.config.wait_duration)
                    .unwrap_or(true);
                if waited_out {
                    // This caller becomes the first probe.
                    inner.state = CircuitState::HalfOpen;
                    inner.window.reset();
                    inner.probes_issued = 1;
                    info!("Circuit breaker HALF_OPEN, probing recovery");
                    Ok(())
                } else {
                    self.rejected_calls.fetch_add(1, Ordering::Relaxed);
                    debug!("Circuit breaker OPEN, call rejected");
                    Err(CircuitState::Open)
                }
            }
            CircuitState::HalfOpen => {
                if inner.probes_issued < self.config.permitted_probes {
                    inner.probes_issued += 1;
                    Ok(())
                } else {
                    self.rejected_calls.fetch_add(1, Ordering::Relaxed);
                    debug!("Circuit breaker HALF_OPEN, probe budget exhausted");
                    Err(CircuitState::Open)
                }
            }
        }
    }

    /// Record a successful call and its duration.
    pub fn record_success(&self, elapsed: Duration) {
        self.successful_calls.fetch_add(1, Ordering::Relaxed);
        self.record(Sample { failure: false, slow: elapsed >= self.config.slow_call_threshold });
    }

    /// Record a failed call (error or timeout) and its duration.
    pub fn record_failure(&self, elapsed: Duration) {
        self.failed_calls.fetch_add(1, Ordering::Relaxed);
        self.record(Sample { failure: true, slow: elapsed >= self.config.slow_call_threshold });
    }

    fn record(&self, sample: Sample) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.window.record(sample);
                if inner.window.len() >= self.config.minimum_calls {
                    let failure_rate = inner.window.failure_rate();
                    let slow_rate = inner.window.slow_rate();
                    if failure_rate >= self.config.failure_rate_threshold
                        || slow_rate >= self.config.slow_call_rate_threshold
                    {
                        inner.state = CircuitState::Open;
                        inner.opened_at = Some(self.clock.now());
                        warn!(
                            failure_rate,
                            slow_rate, "Circuit breaker OPEN (threshold reached)"
                        );
                    }
                }
            }
            CircuitState::HalfOpen => {
                inner.window.record(sample);
                // Decide once every permitted probe has reported.
                if inner.window.len() >= self.config.permitted_probes {
                    if inner.window.failure_rate() >= self.config.failure_rate_threshold {
                        inner.state = CircuitState::Open;
                        inner.opened_at = Some(self.clock.now());
                        inner.probes_issued = 0;
                        warn!("Circuit breaker re-OPEN, probes failed");
                    } else {
                        inner.state = CircuitState::Closed;
                        inner.window.reset();
                        inner.opened_at = None;
                        inner.probes_issued = 0;
                        info!("Circuit breaker CLOSED, probes succeeded");
                    }
                }
            }
            // A call permitted before a transition may report late; it only
            // counts toward the lifetime counters.
            CircuitState::Open | CircuitState::ForcedOpen => {}
        }
    }

    /// Administrative override: reject everything until `reset()`.
    pub fn force_open(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::ForcedOpen;
        info!("Circuit breaker FORCED_OPEN");
    }

    /// Back to `Closed` with an empty window. The only exit from
    /// `ForcedOpen`.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.window.reset();
        inner.opened_at = None;
        inner.probes_issued = 0;
        info!("Circuit breaker reset to CLOSED");
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Metrics snapshot.
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.lock();
        CircuitBreakerMetrics {
            state: inner.state,
            failure_rate: inner.window.failure_rate(),
            slow_call_rate: inner.window.slow_rate(),
            window_samples: inner.window.len(),
            rejected_calls: self.rejected_calls.load(Ordering::Acquire),
            successful_calls: self.successful_calls.load(Ordering::Acquire),
            failed_calls: self.failed_calls.load(Ordering::Acquire),
        }
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            inner: Arc::clone(&self.inner),
            rejected_calls: Arc::clone(&self.rejected_calls),
            successful_calls: Arc::clone(&self.successful_calls),
            failed_calls: Arc::clone(&self.failed_calls),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}
