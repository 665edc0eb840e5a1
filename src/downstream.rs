//! Simulated unreliable downstream service
//!
//! Generates synthetic response data in-process. Every call first consults
//! the shared [`FaultInjectionConfig`] and applies the active failure modes
//! (forced failure, fixed delay, random extra delay, forced timeout, random
//! error draw) before returning data. No real network I/O happens anywhere.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::fault::FaultInjectionConfig;

/// Errors raised by the simulated downstream.
#[derive(Debug, Clone, Error)]
pub enum DownstreamError {
    /// Hard failure injected via `force_failure`.
    #[error("Forced failure [{context}]")]
    Forced { context: String },

    /// Probabilistic failure injected via `error_rate`.
    #[error("Random failure [{context}] (error_rate={rate}%)")]
    Injected { context: String, rate: u32 },
}

impl DownstreamError {
    pub(crate) fn forced(context: impl Into<String>) -> Self {
        DownstreamError::Forced { context: context.into() }
    }

    /// Both injected failure modes simulate transient server errors, so both
    /// are retryable.
    pub fn is_retryable(&self) -> bool {
        true
    }
}

/// One synthetic record returned by a page fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub external_id: String,
    pub name: String,
    pub category: String,
    pub value: String,
    pub page: u32,
    pub index: u32,
}

const CATEGORIES: [&str; 5] = ["PAYMENT", "TRANSFER", "DEPOSIT", "WITHDRAWAL", "FEE"];

/// Sleep applied by `force_timeout`, longer than any sensible deadline.
const FORCED_TIMEOUT_SLEEP: Duration = Duration::from_secs(10);

static METADATA: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("region", "EU-WEST-1"),
        ("env", "demo"),
        ("version", "2.0"),
        ("owner", "platform-team"),
        ("sla", "99.9%"),
    ]
});

/// Simulated downstream API generating synthetic pages and metadata.
#[derive(Debug)]
pub struct SimulatedDownstream {
    faults: Arc<FaultInjectionConfig>,
    call_counter: AtomicU64,
}

impl SimulatedDownstream {
    pub fn new(faults: Arc<FaultInjectionConfig>) -> Self {
        Self { faults, call_counter: AtomicU64::new(0) }
    }

    /// Fetch one page of synthetic records, applying all active faults first.
    pub async fn fetch_page(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<SourceRecord>, DownstreamError> {
        let seq = self.call_counter.fetch_add(1, Ordering::Relaxed) + 1;
        self.faults.record_call_attempted();
        debug!(page, page_size, seq, "fetch_page called");

        self.apply_faults(&format!("fetch_page#{seq}")).await?;

        Ok(Self::generate_records(page, page_size))
    }

    /// Fetch a metadata value. Used by the cache layer to show the value of
    /// caching unreliable lookups.
    pub async fn fetch_metadata(&self, key: &str) -> Result<String, DownstreamError> {
        self.call_counter.fetch_add(1, Ordering::Relaxed);
        self.faults.record_call_attempted();
        debug!(key, "fetch_metadata called");

        self.apply_faults(&format!("fetch_metadata/{key}")).await?;

        Ok(METADATA
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| (*v).to_string())
            .unwrap_or_else(|| format!("unknown-{key}")))
    }

    /// Total downstream invocations, successful or not. Rejections at outer
    /// pipeline layers never reach here, which tests rely on.
    pub fn calls(&self) -> u64 {
        self.call_counter.load(Ordering::Relaxed)
    }

    async fn apply_faults(&self, context: &str) -> Result<(), DownstreamError> {
        // Hard failure wins before any delay is paid.
        if self.faults.force_failure() {
            self.faults.record_call_failed();
            return Err(DownstreamError::forced(context));
        }

        let fixed = self.faults.fixed_delay_ms();
        if fixed > 0 {
            tokio::time::sleep(Duration::from_millis(fixed)).await;
        }

        let random_max = self.faults.random_delay_max_ms();
        if random_max > 0 {
            let extra = rand::thread_rng().gen_range(0..=random_max);
            if extra > 0 {
                tokio::time::sleep(Duration::from_millis(extra)).await;
            }
        }

        if self.faults.force_timeout() {
            tokio::time::sleep(FORCED_TIMEOUT_SLEEP).await;
        }

        let rate = self.faults.error_rate();
        if rate > 0 && rand::thread_rng().gen_range(0..100) < rate {
            self.faults.record_call_failed();
            return Err(DownstreamError::Injected { context: context.to_string(), rate });
        }

        Ok(())
    }

    fn generate_records(page: u32, page_size: u32) -> Vec<SourceRecord> {
        let mut rng = rand::thread_rng();
        (0..page_size)
            .map(|i| SourceRecord {
                external_id: format!("EXT-{page:04}-{i:04}"),
                name: format!("Record-P{page}-I{i}"),
                category: CATEGORIES[((page + i) as usize) % CATEGORIES.len()].to_string(),
                value: format!("{:.2}", rng.gen::<f64>() * 10_000.0),
                page,
                index: i,
            })
            .collect()
    }
}
