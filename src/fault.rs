//! Fault-injection settings controlling the simulated downstream
//!
//! One shared instance is read by every simulated call and mutated through an
//! administrative surface. Fields are individual atomics so concurrent reads
//! never block a call in flight and writers never hold a lock across a
//! dependency call.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tracing::info;

/// Serializable view of the current fault-injection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultSettings {
    /// 0-100: percentage of calls that fail with an injected error.
    pub error_rate: u32,
    /// Fixed delay in milliseconds added to every downstream call.
    pub fixed_delay_ms: u64,
    /// Maximum random additional delay in milliseconds (uniform).
    pub random_delay_max_ms: u64,
    /// When true the downstream sleeps far past any deadline.
    pub force_timeout: bool,
    /// When true every call fails immediately.
    pub force_failure: bool,
    /// Soft cap on parallel downstream calls, surfaced for the bulkhead demo.
    pub max_concurrent_hint: usize,
    /// Marker for the chaos preset (several modes at once).
    pub chaos: bool,
}

/// Mutable fault-injection configuration shared across all callers.
///
/// All numeric fields are non-negative by construction; `error_rate` writes
/// clamp to 100.
#[derive(Debug, Default)]
pub struct FaultInjectionConfig {
    error_rate: AtomicU32,
    fixed_delay_ms: AtomicU64,
    random_delay_max_ms: AtomicU64,
    force_timeout: AtomicBool,
    force_failure: AtomicBool,
    max_concurrent_hint: AtomicUsize,
    chaos: AtomicBool,

    calls_attempted: AtomicU64,
    calls_failed: AtomicU64,
}

impl FaultInjectionConfig {
    /// Create a config with everything healthy.
    pub fn new() -> Self {
        let config = Self::default();
        config.max_concurrent_hint.store(10, Ordering::Relaxed);
        config
    }

    // ---- Field access ----

    pub fn error_rate(&self) -> u32 {
        self.error_rate.load(Ordering::Relaxed)
    }

    pub fn set_error_rate(&self, percent: u32) {
        self.error_rate.store(percent.min(100), Ordering::Relaxed);
    }

    pub fn fixed_delay_ms(&self) -> u64 {
        self.fixed_delay_ms.load(Ordering::Relaxed)
    }

    pub fn set_fixed_delay_ms(&self, millis: u64) {
        self.fixed_delay_ms.store(millis, Ordering::Relaxed);
    }

    pub fn random_delay_max_ms(&self) -> u64 {
        self.random_delay_max_ms.load(Ordering::Relaxed)
    }

    pub fn set_random_delay_max_ms(&self, millis: u64) {
        self.random_delay_max_ms.store(millis, Ordering::Relaxed);
    }

    pub fn force_timeout(&self) -> bool {
        self.force_timeout.load(Ordering::Relaxed)
    }

    pub fn set_force_timeout(&self, on: bool) {
        self.force_timeout.store(on, Ordering::Relaxed);
    }

    pub fn force_failure(&self) -> bool {
        self.force_failure.load(Ordering::Relaxed)
    }

    pub fn set_force_failure(&self, on: bool) {
        self.force_failure.store(on, Ordering::Relaxed);
    }

    pub fn max_concurrent_hint(&self) -> usize {
        self.max_concurrent_hint.load(Ordering::Relaxed)
    }

    pub fn set_max_concurrent_hint(&self, max: usize) {
        self.max_concurrent_hint.store(max, Ordering::Relaxed);
    }

    pub fn chaos(&self) -> bool {
        self.chaos.load(Ordering::Relaxed)
    }

    // ---- Counters ----

    pub fn record_call_attempted(&self) {
        self.calls_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_call_failed(&self) {
        self.calls_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn calls_attempted(&self) -> u64 {
        self.calls_attempted.load(Ordering::Relaxed)
    }

    pub fn calls_failed(&self) -> u64 {
        self.calls_failed.load(Ordering::Relaxed)
    }

    // ---- Named presets ----

    /// 50% of calls fail.
    pub fn apply_flaky(&self) {
        self.set_error_rate(50);
        info!("Fault preset: FLAKY (50% error rate)");
    }

    /// Every call takes an extra 2 s.
    pub fn apply_slow(&self) {
        self.set_fixed_delay_ms(2_000);
        info!("Fault preset: SLOW (2000 ms delay)");
    }

    /// Calls sleep past any deadline, so the time limiter reports a timeout
    /// rather than an error.
    pub fn apply_timeout(&self) {
        self.set_force_timeout(true);
        self.set_fixed_delay_ms(3_000);
        info!("Fault preset: TIMEOUT (delay exceeds the deadline)");
    }

    /// Every call fails immediately.
    pub fn apply_hard_failure(&self) {
        self.set_force_failure(true);
        info!("Fault preset: HARD FAILURE");
    }

    /// Several failure modes at once: 30% errors, 500 ms base delay, up to
    /// 1500 ms extra.
    pub fn apply_chaos(&self) {
        self.set_error_rate(30);
        self.set_fixed_delay_ms(500);
        self.set_random_delay_max_ms(1_500);
        self.chaos.store(true, Ordering::Relaxed);
        info!("Fault preset: CHAOS");
    }

    /// Back to all-healthy. Idempotent: applying twice yields the same state.
    pub fn reset(&self) {
        self.set_error_rate(0);
        self.set_fixed_delay_ms(0);
        self.set_random_delay_max_ms(0);
        self.set_force_timeout(false);
        self.set_force_failure(false);
        self.set_max_concurrent_hint(10);
        self.chaos.store(false, Ordering::Relaxed);
        self.calls_attempted.store(0, Ordering::Relaxed);
        self.calls_failed.store(0, Ordering::Relaxed);
        info!("Fault preset: RESET (all healthy)");
    }

    // ---- Snapshot / apply ----

    /// Current settings as a serializable value.
    pub fn snapshot(&self) -> FaultSettings {
        FaultSettings {
            error_rate: self.error_rate(),
            fixed_delay_ms: self.fixed_delay_ms(),
            random_delay_max_ms: self.random_delay_max_ms(),
            force_timeout: self.force_timeout(),
            force_failure: self.force_failure(),
            max_concurrent_hint: self.max_concurrent_hint(),
            chaos: self.chaos(),
        }
    }

    /// Overwrite all settings from a snapshot. Counters are untouched.
    pub fn apply(&self, settings: &FaultSettings) {
        self.set_error_rate(settings.error_rate);
        self.set_fixed_delay_ms(settings.fixed_delay_ms);
        self.set_random_delay_max_ms(settings.random_delay_max_ms);
        self.set_force_timeout(settings.force_timeout);
        self.set_force_failure(settings.force_failure);
        self.set_max_concurrent_hint(settings.max_concurrent_hint);
        self.chaos.store(settings.chaos, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy() -> FaultSettings {
        FaultSettings {
            error_rate: 0,
            fixed_delay_ms: 0,
            random_delay_max_ms: 0,
            force_timeout: false,
            force_failure: false,
            max_concurrent_hint: 10,
            chaos: false,
        }
    }

    #[test]
    fn test_new_is_healthy() {
        let config = FaultInjectionConfig::new();
        assert_eq!(config.snapshot(), healthy());
    }

    #[test]
    fn test_error_rate_clamped_to_100() {
        let config = FaultInjectionConfig::new();
        config.set_error_rate(250);
        assert_eq!(config.error_rate(), 100);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let config = FaultInjectionConfig::new();
        config.apply_chaos();
        config.record_call_attempted();
        config.record_call_failed();

        config.reset();
        let first = config.snapshot();
        assert_eq!(first, healthy());
        assert_eq!(config.calls_attempted(), 0);
        assert_eq!(config.calls_failed(), 0);

        config.reset();
        assert_eq!(config.snapshot(), first);
    }

    #[test]
    fn test_presets_match_expected_values() {
        let config = FaultInjectionConfig::new();

        config.apply_flaky();
        assert_eq!(config.error_rate(), 50);

        config.reset();
        config.apply_slow();
        assert_eq!(config.fixed_delay_ms(), 2_000);

        config.reset();
        config.apply_timeout();
        assert!(config.force_timeout());
        assert_eq!(config.fixed_delay_ms(), 3_000);

        config.reset();
        config.apply_hard_failure();
        assert!(config.force_failure());

        config.reset();
        config.apply_chaos();
        assert_eq!(config.error_rate(), 30);
        assert_eq!(config.fixed_delay_ms(), 500);
        assert_eq!(config.random_delay_max_ms(), 1_500);
        assert!(config.chaos());
    }

    #[test]
    fn test_snapshot_apply_round_trip() {
        let source = FaultInjectionConfig::new();
        source.apply_chaos();
        let snapshot = source.snapshot();

        let target = FaultInjectionConfig::new();
        target.apply(&snapshot);
        assert_eq!(target.snapshot(), snapshot);
    }
}
