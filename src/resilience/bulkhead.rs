//! Bulkhead pattern for limiting concurrent calls
//!
//! A fixed-capacity counting semaphore: `try_enter` admits a call if a permit
//! is free and rejects immediately otherwise (fail-fast, no queuing). The
//! permit is released exactly once when the returned guard drops, which
//! covers error and cancellation paths.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Configuration for bulkhead behavior.
#[derive(Debug, Clone)]
pub struct BulkheadConfig {
    /// Maximum number of concurrent calls allowed.
    pub max_concurrent: usize,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self { max_concurrent: 5 }
    }
}

impl BulkheadConfig {
    /// Create a new configuration builder.
    pub fn builder() -> BulkheadConfigBuilder {
        BulkheadConfigBuilder::new()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::invalid("max_concurrent must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for [`BulkheadConfig`].
#[derive(Debug, Default)]
pub struct BulkheadConfigBuilder {
    config: BulkheadConfig,
}

impl BulkheadConfigBuilder {
    pub fn new() -> Self {
        Self { config: BulkheadConfig::default() }
    }

    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.config.max_concurrent = max;
        self
    }

    pub fn build(self) -> ConfigResult<BulkheadConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Metrics snapshot for monitoring.
#[derive(Debug, Clone)]
pub struct BulkheadMetrics {
    pub available: usize,
    pub max_concurrent: usize,
    pub total_entered: u64,
    pub rejected: u64,
}

/// An admitted call's permit. Dropping it releases the slot.
#[derive(Debug)]
pub struct BulkheadPermit {
    _permit: OwnedSemaphorePermit,
}

/// Fail-fast counting semaphore bounding concurrent in-flight calls.
///
/// Clones share the same permit pool and counters. Available permits are
/// always in `[0, max_concurrent]`.
pub struct Bulkhead {
    config: BulkheadConfig,
    semaphore: Arc<Semaphore>,
    total_entered: Arc<AtomicU64>,
    rejected: Arc<AtomicU64>,
}

impl Bulkhead {
    /// Create a new bulkhead with the given configuration.
    pub fn new(config: BulkheadConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            total_entered: Arc::new(AtomicU64::new(0)),
            rejected: Arc::new(AtomicU64::new(0)),
            config,
        })
    }

    /// Try to enter the bulkhead without waiting.
    ///
    /// Returns `None` immediately when all permits are in use.
    pub fn try_enter(&self) -> Option<BulkheadPermit> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => {
                self.total_entered.fetch_add(1, Ordering::Relaxed);
                Some(BulkheadPermit { _permit: permit })
            }
            Err(_) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(max = self.config.max_concurrent, "Bulkhead full, call rejected");
                None
            }
        }
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Configured capacity.
    pub fn max_concurrent(&self) -> usize {
        self.config.max_concurrent
    }

    /// Metrics snapshot.
    pub fn metrics(&self) -> BulkheadMetrics {
        BulkheadMetrics {
            available: self.available(),
            max_concurrent: self.config.max_concurrent,
            total_entered: self.total_entered.load(Ordering::Acquire),
            rejected: self.rejected.load(Ordering::Acquire),
        }
    }
}

impl Clone for Bulkhead {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            semaphore: Arc::clone(&self.semaphore),
            total_entered: Arc::clone(&self.total_entered),
            rejected: Arc::clone(&self.rejected),
        }
    }
}

impl fmt::Debug for Bulkhead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bulkhead")
            .field("max_concurrent", &self.config.max_concurrent)
            .field("available", &self.available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulkhead(max: usize) -> Bulkhead {
        Bulkhead::new(BulkheadConfig::builder().max_concurrent(max).build().unwrap()).unwrap()
    }

    #[test]
    fn test_admits_up_to_capacity_then_rejects() {
        let bulkhead = bulkhead(2);

        let p1 = bulkhead.try_enter();
        let p2 = bulkhead.try_enter();
        assert!(p1.is_some());
        assert!(p2.is_some());
        assert_eq!(bulkhead.available(), 0);

        assert!(bulkhead.try_enter().is_none(), "over-capacity entry must be rejected");
        assert_eq!(bulkhead.metrics().rejected, 1);
    }

    #[test]
    fn test_drop_releases_permit() {
        let bulkhead = bulkhead(1);

        {
            let _permit = bulkhead.try_enter().unwrap();
            assert_eq!(bulkhead.available(), 0);
        }
        assert_eq!(bulkhead.available(), 1);
        assert!(bulkhead.try_enter().is_some());
    }

    #[test]
    fn test_available_stays_in_bounds() {
        let bulkhead = bulkhead(3);
        assert_eq!(bulkhead.available(), 3);

        let permits: Vec<_> = (0..3).filter_map(|_| bulkhead.try_enter()).collect();
        assert_eq!(permits.len(), 3);
        assert_eq!(bulkhead.available(), 0);

        drop(permits);
        assert_eq!(bulkhead.available(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_entries_never_exceed_capacity() {
        let bulkhead = bulkhead(2);
        let mut handles = Vec::new();

        for _ in 0..4 {
            let bulkhead = bulkhead.clone();
            handles.push(tokio::spawn(async move {
                match bulkhead.try_enter() {
                    Some(_permit) => {
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                        true
                    }
                    None => false,
                }
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 2);
        assert_eq!(bulkhead.metrics().rejected, 2);
    }

    #[test]
    fn test_config_validation() {
        assert!(BulkheadConfig::builder().max_concurrent(0).build().is_err());
        assert!(BulkheadConfig::builder().max_concurrent(1).build().is_ok());
    }
}
