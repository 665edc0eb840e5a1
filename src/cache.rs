//! TTL cache for downstream metadata lookups
//!
//! A small bounded map from metadata key to value. Entries expire after a
//! fixed time-to-live; at capacity the expired entries go first, then the
//! oldest live one. The loader runs outside the lock, so a slow downstream
//! call never blocks concurrent cache reads. That also means two concurrent
//! misses for the same key may both invoke the loader; the second insert
//! simply overwrites the first, which is acceptable for idempotent lookups.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigError, ConfigResult};

/// Configuration for the metadata cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of live entries.
    pub max_entries: usize,
    /// Time after insertion at which an entry stops being served.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: 100, ttl: Duration::from_secs(30) }
    }
}

impl CacheConfig {
    /// Create a new configuration builder.
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::new()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_entries == 0 {
            return Err(ConfigError::invalid("max_entries must be greater than 0"));
        }
        if self.ttl.is_zero() {
            return Err(ConfigError::invalid("ttl must be greater than zero"));
        }
        Ok(())
    }
}

/// Builder for [`CacheConfig`].
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    pub fn new() -> Self {
        Self { config: CacheConfig::default() }
    }

    pub fn max_entries(mut self, max: usize) -> Self {
        self.config.max_entries = max;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.config.ttl = ttl;
        self
    }

    pub fn build(self) -> ConfigResult<CacheConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Counters and current size.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    inserted_at: Instant,
}

/// Bounded TTL cache keyed by metadata name.
///
/// Clones share the same entries and counters.
pub struct MetadataCache<C: Clock = SystemClock> {
    config: CacheConfig,
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    clock: Arc<C>,
}

impl MetadataCache<SystemClock> {
    /// Create a cache using the system clock.
    pub fn new(config: CacheConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> MetadataCache<C> {
    /// Create a cache with a custom clock (useful for testing expiry).
    pub fn with_clock(config: CacheConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            clock: Arc::new(clock),
            config,
        })
    }

    /// Return the cached value for `key`, or run `loader` and cache its
    /// result. Loader errors are propagated and nothing is cached for them.
    pub async fn get_or_load<F, E>(&self, key: &str, loader: F) -> Result<String, E>
    where
        F: Future<Output = Result<String, E>>,
    {
        if let Some(value) = self.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key, "Metadata cache hit");
            return Ok(value);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key, "Metadata cache miss, loading");

        let value = loader.await?;
        self.insert(key.to_owned(), value.clone());
        Ok(value)
    }

    /// Look up a live entry without touching the hit/miss counters.
    pub fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        let entries = self.lock();
        entries
            .get(key)
            .filter(|entry| now.duration_since(entry.inserted_at) < self.config.ttl)
            .map(|entry| entry.value.clone())
    }

    fn insert(&self, key: String, value: String) {
        let now = self.clock.now();
        let mut entries = self.lock();

        if !entries.contains_key(&key) && entries.len() >= self.config.max_entries {
            self.evict_one(&mut entries, now);
        }
        entries.insert(key, Entry { value, inserted_at: now });
    }

    /// Drop expired entries; if all are live, drop the oldest one.
    fn evict_one(&self, entries: &mut HashMap<String, Entry>, now: Instant) {
        let before = entries.len();
        entries.retain(|_, entry| now.duration_since(entry.inserted_at) < self.config.ttl);
        if entries.len() < before {
            debug!(evicted = before - entries.len(), "Metadata cache: expired entries dropped");
            return;
        }

        let oldest = entries
            .iter()
            .min_by_key(|(_, entry)| entry.inserted_at)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            debug!(key = %key, "Metadata cache: oldest entry evicted");
            entries.remove(&key);
        }
    }

    /// Drop every entry and zero the hit/miss counters.
    pub fn invalidate_all(&self) {
        self.lock().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Current counters and size.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Acquire),
            misses: self.misses.load(Ordering::Acquire),
            size: self.lock().len(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Metadata cache lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl<C: Clock> Clone for MetadataCache<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            entries: Arc::clone(&self.entries),
            hits: Arc::clone(&self.hits),
            misses: Arc::clone(&self.misses),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<C: Clock> std::fmt::Debug for MetadataCache<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("max_entries", &self.config.max_entries)
            .field("ttl", &self.config.ttl)
            .field("size", &self.lock().len())
            .finish()
    }
}
