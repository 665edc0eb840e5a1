//! Fixed-window rate limiter
//!
//! Admits up to `limit_for_period` calls per refresh period and rejects
//! immediately once the window is exhausted (fail-fast, no waiting). The
//! window rolls lazily from elapsed time when a caller arrives, so no timer
//! thread is needed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigError, ConfigResult};

/// Configuration for the fixed-window rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Permits granted per refresh period.
    pub limit_for_period: u64,
    /// Length of one refresh period.
    pub refresh_period: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self { limit_for_period: 5, refresh_period: Duration::from_secs(1) }
    }
}

impl RateLimiterConfig {
    /// Create a new configuration builder.
    pub fn builder() -> RateLimiterConfigBuilder {
        RateLimiterConfigBuilder::new()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.limit_for_period == 0 {
            return Err(ConfigError::invalid("limit_for_period must be greater than 0"));
        }
        if self.refresh_period.is_zero() {
            return Err(ConfigError::invalid("refresh_period must be greater than zero"));
        }
        Ok(())
    }
}

/// Builder for [`RateLimiterConfig`].
#[derive(Debug, Default)]
pub struct RateLimiterConfigBuilder {
    config: RateLimiterConfig,
}

impl RateLimiterConfigBuilder {
    pub fn new() -> Self {
        Self { config: RateLimiterConfig::default() }
    }

    pub fn limit_for_period(mut self, limit: u64) -> Self {
        self.config.limit_for_period = limit;
        self
    }

    pub fn refresh_period(mut self, period: Duration) -> Self {
        self.config.refresh_period = period;
        self
    }

    pub fn build(self) -> ConfigResult<RateLimiterConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Metrics snapshot for monitoring.
#[derive(Debug, Clone)]
pub struct RateLimiterMetrics {
    pub available_permits: u64,
    pub limit_for_period: u64,
    /// Callers blocked waiting for a permit. Always zero in the fail-fast
    /// configuration; kept so the snapshot shape matches the full contract.
    pub waiting_callers: u64,
    pub rejected: u64,
}

/// Fixed-window rate limiter.
///
/// Clones share the same window and counters.
pub struct RateLimiter<C: Clock = SystemClock> {
    config: RateLimiterConfig,
    permits: Arc<AtomicU64>,
    window_start: Arc<RwLock<Instant>>,
    rejected: Arc<AtomicU64>,
    clock: Arc<C>,
}

impl RateLimiter<SystemClock> {
    /// Create a rate limiter using the system clock.
    pub fn new(config: RateLimiterConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    /// Create a rate limiter with a custom clock (useful for testing).
    pub fn with_clock(config: RateLimiterConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            permits: Arc::new(AtomicU64::new(config.limit_for_period)),
            window_start: Arc::new(RwLock::new(clock.now())),
            rejected: Arc::new(AtomicU64::new(0)),
            clock: Arc::new(clock),
            config,
        })
    }

    /// Try to acquire one permit without waiting.
    ///
    /// Returns `false` when the current window is exhausted; rejection has no
    /// side effect beyond the rejection counter. Concurrent acquirers can
    /// never be granted more than `limit_for_period` permits per window: the
    /// window is refreshed at most once per period (re-checked under the
    /// write lock) and grants go through a compare-exchange loop.
    pub fn try_acquire(&self) -> bool {
        self.roll_window();

        let mut current = self.permits.load(Ordering::Acquire);
        loop {
            if current == 0 {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                debug!("Rate limiter: window exhausted");
                return false;
            }

            match self.permits.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Refresh permits when the current time has crossed the period boundary.
    fn roll_window(&self) {
        let now = self.clock.now();

        let window_start = match self.window_start.read() {
            Ok(guard) => *guard,
            Err(poisoned) => {
                warn!("Rate limiter window lock poisoned");
                *poisoned.into_inner()
            }
        };

        if now.duration_since(window_start) < self.config.refresh_period {
            return;
        }

        let mut guard = match self.window_start.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Rate limiter window lock poisoned");
                poisoned.into_inner()
            }
        };

        // Re-check under the write lock so only one caller refreshes per
        // period boundary.
        let elapsed = now.duration_since(*guard);
        if elapsed < self.config.refresh_period {
            return;
        }

        let periods = elapsed.as_nanos() / self.config.refresh_period.as_nanos();
        *guard = *guard + self.config.refresh_period * (periods as u32);
        self.permits.store(self.config.limit_for_period, Ordering::Release);
        debug!(periods, "Rate limiter: window rolled, permits refreshed");
    }

    /// Permits left in the current window.
    pub fn available_permits(&self) -> u64 {
        self.roll_window();
        self.permits.load(Ordering::Acquire)
    }

    /// Metrics snapshot.
    pub fn metrics(&self) -> RateLimiterMetrics {
        RateLimiterMetrics {
            available_permits: self.available_permits(),
            limit_for_period: self.config.limit_for_period,
            waiting_callers: 0,
            rejected: self.rejected.load(Ordering::Acquire),
        }
    }

    /// Reset to a full window starting now.
    pub fn reset(&self) {
        if let Ok(mut guard) = self.window_start.write() {
            *guard = self.clock.now();
        }
        self.permits.store(self.config.limit_for_period, Ordering::Release);
    }
}

impl<C: Clock> Clone for RateLimiter<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            permits: Arc::clone(&self.permits),
            window_start: Arc::clone(&self.window_start),
            rejected: Arc::clone(&self.rejected),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<C: Clock> std::fmt::Debug for RateLimiter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("limit_for_period", &self.config.limit_for_period)
            .field("refresh_period", &self.config.refresh_period)
            .field("permits", &self.permits.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    fn limiter(limit: u64, period: Duration, clock: MockClock) -> RateLimiter<MockClock> {
        let config = RateLimiterConfig::builder()
            .limit_for_period(limit)
            .refresh_period(period)
            .build()
            .unwrap();
        RateLimiter::with_clock(config, clock).unwrap()
    }

    #[test]
    fn test_grants_up_to_limit_then_rejects() {
        let limiter = limiter(3, Duration::from_secs(60), MockClock::new());

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire(), "4th call in the period must be rejected");
        assert_eq!(limiter.metrics().rejected, 1);
    }

    #[test]
    fn test_permits_replenish_after_period() {
        let clock = MockClock::new();
        let limiter = limiter(3, Duration::from_secs(60), clock.clone());

        for _ in 0..3 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());

        clock.advance(Duration::from_secs(61));
        assert_eq!(limiter.available_permits(), 3);
        assert!(limiter.try_acquire());
    }

    #[test]
    fn test_multiple_elapsed_periods_roll_to_current_window() {
        let clock = MockClock::new();
        let limiter = limiter(2, Duration::from_secs(1), clock.clone());

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());

        // Several idle periods; the window catches up, not accumulates.
        clock.advance(Duration::from_secs(10));
        assert_eq!(limiter.available_permits(), 2);
    }

    #[test]
    fn test_rejection_has_no_side_effect_on_permits() {
        let limiter = limiter(1, Duration::from_secs(60), MockClock::new());

        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.available_permits(), 0);
        assert_eq!(limiter.metrics().rejected, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_no_over_grant_under_concurrency() {
        let limiter = limiter(5, Duration::from_secs(60), MockClock::new());

        let mut handles = Vec::new();
        for _ in 0..32 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.try_acquire() }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 5, "grants per window must never exceed the limit");
    }

    #[test]
    fn test_config_validation() {
        assert!(RateLimiterConfig::builder().limit_for_period(0).build().is_err());
        assert!(RateLimiterConfig::builder()
            .refresh_period(Duration::ZERO)
            .build()
            .is_err());
        assert!(RateLimiterConfig::builder().limit_for_period(1).build().is_ok());
    }
}
