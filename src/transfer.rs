//! Batch transfer of downstream records into a local sink
//!
//! The orchestrator pulls records page by page through the full protection
//! pipeline and writes them to a [`RecordSink`]. A page that fails after all
//! protection layers have had their say is replaced by placeholder records,
//! so every requested slot is accounted for in the sink even when the
//! dependency is down. Pages are fetched sequentially; the pipeline's
//! concurrency layers matter when several transfers run at once.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::downstream::SourceRecord;
use crate::error::PipelineError;
use crate::resilience::pipeline::ResiliencePipeline;

/// Lifecycle state of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Fetched from the downstream and stored as-is.
    Inserted,
    /// Placeholder written because the page could not be fetched.
    Fallback,
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordStatus::Inserted => write!(f, "inserted"),
            RecordStatus::Fallback => write!(f, "fallback"),
        }
    }
}

/// One record as stored by the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: Uuid,
    pub external_id: String,
    pub name: String,
    pub category: String,
    pub value: String,
    pub batch_id: String,
    pub status: RecordStatus,
    pub transferred_at: DateTime<Utc>,
}

impl TransferRecord {
    fn from_source(source: SourceRecord, batch_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_id: source.external_id,
            name: source.name,
            category: source.category,
            value: source.value,
            batch_id: batch_id.to_owned(),
            status: RecordStatus::Inserted,
            transferred_at: Utc::now(),
        }
    }

    fn fallback(page: u32, batch_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_id: format!("FALLBACK-P{page}"),
            name: format!("Unavailable page {page}"),
            category: "UNKNOWN".to_owned(),
            value: "0.00".to_owned(),
            batch_id: batch_id.to_owned(),
            status: RecordStatus::Fallback,
            transferred_at: Utc::now(),
        }
    }
}

/// Error writing to a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink write failed: {message}")]
    WriteFailed { message: String },
}

/// Error running a transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    /// A zero page size can never cover the requested records.
    #[error("page_size must be greater than 0")]
    InvalidPageSize,
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Destination for transferred records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Persist a batch of records, returning how many were written.
    async fn save_all(&self, records: Vec<TransferRecord>) -> Result<usize, SinkError>;
}

/// Read-side lookups over stored records.
#[async_trait]
pub trait BatchIndex: Send + Sync {
    async fn list_batch_ids(&self) -> Vec<String>;
    async fn find_by_batch(&self, batch_id: &str) -> Vec<TransferRecord>;
}

/// In-process sink backed by a mutex-guarded vector.
#[derive(Debug, Default)]
pub struct InMemorySink {
    records: tokio::sync::Mutex<Vec<TransferRecord>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored record, in insertion order.
    pub async fn all(&self) -> Vec<TransferRecord> {
        self.records.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl RecordSink for InMemorySink {
    async fn save_all(&self, records: Vec<TransferRecord>) -> Result<usize, SinkError> {
        let written = records.len();
        self.records.lock().await.extend(records);
        Ok(written)
    }
}

#[async_trait]
impl BatchIndex for InMemorySink {
    async fn list_batch_ids(&self) -> Vec<String> {
        let records = self.records.lock().await;
        let mut ids: Vec<String> = Vec::new();
        for record in records.iter() {
            if !ids.contains(&record.batch_id) {
                ids.push(record.batch_id.clone());
            }
        }
        ids
    }

    async fn find_by_batch(&self, batch_id: &str) -> Vec<TransferRecord> {
        self.records
            .lock()
            .await
            .iter()
            .filter(|record| record.batch_id == batch_id)
            .cloned()
            .collect()
    }
}

/// Per-batch accounting of what happened during a transfer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferSummary {
    pub batch_id: String,
    pub total_requested: u32,
    pub pages_attempted: u32,
    pub pages_succeeded: u32,
    pub pages_failed: u32,
    pub records_inserted: u64,
    pub fallbacks_used: u32,
    /// Extra attempts beyond the first, summed over every page that reached
    /// the retry loop, whether the page ultimately succeeded or not.
    pub retries_total: u32,
    pub circuit_breaker_rejections: u32,
    pub bulkhead_rejections: u32,
    pub rate_limiter_rejections: u32,
    pub timeout_rejections: u32,
    pub generic_failures: u32,
    pub duration_ms: u64,
}

/// Drives page-by-page transfers through the pipeline into a sink.
pub struct TransferOrchestrator<C: Clock = SystemClock> {
    pipeline: ResiliencePipeline<C>,
    sink: Arc<dyn RecordSink>,
}

impl<C: Clock> TransferOrchestrator<C> {
    pub fn new(pipeline: ResiliencePipeline<C>, sink: Arc<dyn RecordSink>) -> Self {
        Self { pipeline, sink }
    }

    /// Transfer `total_records` records in pages of `page_size`.
    ///
    /// Failed pages are replaced by one placeholder record per requested slot
    /// and never abort the batch. Sink errors do abort: losing fetched data
    /// silently would make the summary a lie.
    ///
    /// A `page_size` of zero is rejected. `total_records` of zero is a no-op
    /// that returns an empty summary without touching the pipeline.
    pub async fn transfer(
        &self,
        total_records: u32,
        page_size: u32,
    ) -> Result<TransferSummary, TransferError> {
        if page_size == 0 {
            return Err(TransferError::InvalidPageSize);
        }

        let batch_id = new_batch_id();
        let started = Instant::now();
        let pages = total_records.div_ceil(page_size);
        info!(batch_id = %batch_id, total_records, page_size, pages, "Transfer started");

        let mut summary = TransferSummary {
            batch_id: batch_id.clone(),
            total_requested: total_records,
            ..TransferSummary::default()
        };

        for page in 1..=pages {
            let remaining = total_records - (page - 1) * page_size;
            let expected = remaining.min(page_size);
            summary.pages_attempted += 1;

            match self.pipeline.execute_page(page, expected).await {
                Ok(fetch) => {
                    summary.pages_succeeded += 1;
                    summary.retries_total += fetch.attempts.saturating_sub(1);
                    let records = fetch
                        .records
                        .into_iter()
                        .map(|source| TransferRecord::from_source(source, &batch_id))
                        .collect();
                    summary.records_inserted += self.sink.save_all(records).await? as u64;
                }
                Err(error) => {
                    summary.pages_failed += 1;
                    Self::classify(&mut summary, &error);
                    warn!(
                        batch_id = %batch_id,
                        page,
                        category = error.category(),
                        "Page failed, writing fallback records"
                    );

                    summary.fallbacks_used += 1;
                    let placeholders = (0..expected)
                        .map(|_| TransferRecord::fallback(page, &batch_id))
                        .collect();
                    self.sink.save_all(placeholders).await?;
                }
            }
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            batch_id = %batch_id,
            succeeded = summary.pages_succeeded,
            failed = summary.pages_failed,
            inserted = summary.records_inserted,
            duration_ms = summary.duration_ms,
            "Transfer finished"
        );
        Ok(summary)
    }

    fn classify(summary: &mut TransferSummary, error: &PipelineError) {
        match error {
            PipelineError::RejectedByCircuitBreaker { .. } => {
                summary.circuit_breaker_rejections += 1;
            }
            PipelineError::RejectedByBulkhead => summary.bulkhead_rejections += 1,
            PipelineError::RejectedByRateLimiter => summary.rate_limiter_rejections += 1,
            PipelineError::TimedOut { .. } => summary.timeout_rejections += 1,
            PipelineError::RetryExhausted { attempts, .. } => {
                // Retries spent on a page count even when the page fails.
                summary.retries_total += attempts.saturating_sub(1);
                summary.generic_failures += 1;
            }
            PipelineError::Dependency(_) => summary.generic_failures += 1,
        }
    }

    pub fn pipeline(&self) -> &ResiliencePipeline<C> {
        &self.pipeline
    }
}

/// `BATCH-` plus the first eight hex characters of a fresh UUID, uppercased.
fn new_batch_id() -> String {
    let uuid = Uuid::new_v4().to_string();
    format!("BATCH-{}", uuid[..8].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_id_shape() {
        let id = new_batch_id();
        assert!(id.starts_with("BATCH-"));
        assert_eq!(id.len(), "BATCH-".len() + 8);
        assert!(id["BATCH-".len()..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, id.to_uppercase());
    }

    #[test]
    fn test_fallback_record_shape() {
        let record = TransferRecord::fallback(3, "BATCH-ABCD1234");
        assert_eq!(record.external_id, "FALLBACK-P3");
        assert_eq!(record.status, RecordStatus::Fallback);
        assert_eq!(record.batch_id, "BATCH-ABCD1234");
    }

    #[tokio::test]
    async fn test_in_memory_sink_stores_and_indexes() {
        let sink = InMemorySink::new();

        let a = TransferRecord::fallback(1, "BATCH-A");
        let b = TransferRecord::fallback(1, "BATCH-B");
        let c = TransferRecord::fallback(2, "BATCH-A");
        sink.save_all(vec![a, b, c]).await.unwrap();

        assert_eq!(sink.len().await, 3);
        assert_eq!(sink.list_batch_ids().await, vec!["BATCH-A", "BATCH-B"]);
        assert_eq!(sink.find_by_batch("BATCH-A").await.len(), 2);
        assert!(sink.find_by_batch("BATCH-X").await.is_empty());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&RecordStatus::Fallback).unwrap(), "\"fallback\"");
        assert_eq!(RecordStatus::Inserted.to_string(), "inserted");
    }
}
