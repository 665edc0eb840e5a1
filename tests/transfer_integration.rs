//! Batch transfers through the full pipeline: healthy runs, fallback
//! substitution when the dependency is down, and failure attribution.

use std::sync::Arc;
use std::time::Duration;

use guardrail::downstream::SimulatedDownstream;
use guardrail::fault::FaultInjectionConfig;
use guardrail::resilience::pipeline::PipelineBuilder;
use guardrail::resilience::rate_limiter::RateLimiterConfig;
use guardrail::resilience::retry::RetryConfig;
use guardrail::transfer::{
    BatchIndex, InMemorySink, RecordSink, RecordStatus, TransferError, TransferOrchestrator,
};
use guardrail::SystemClock;

struct Fixture {
    faults: Arc<FaultInjectionConfig>,
    downstream: Arc<SimulatedDownstream>,
    sink: Arc<InMemorySink>,
    orchestrator: TransferOrchestrator<SystemClock>,
}

fn fixture(retry_attempts: u32) -> Fixture {
    let faults = Arc::new(FaultInjectionConfig::new());
    let downstream = Arc::new(SimulatedDownstream::new(Arc::clone(&faults)));
    let sink = Arc::new(InMemorySink::new());
    let pipeline = PipelineBuilder::new()
        .rate_limiter(RateLimiterConfig {
            limit_for_period: 1_000,
            refresh_period: Duration::from_secs(1),
        })
        .retry(RetryConfig {
            max_attempts: retry_attempts,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
        })
        .build(Arc::clone(&downstream))
        .unwrap();
    let sink_handle = Arc::clone(&sink) as Arc<dyn RecordSink>;
    let orchestrator = TransferOrchestrator::new(pipeline, sink_handle);
    Fixture { faults, downstream, sink, orchestrator }
}

#[tokio::test]
async fn healthy_transfer_moves_every_record() {
    let fx = fixture(3);

    let summary = fx.orchestrator.transfer(12, 5).await.unwrap();

    assert_eq!(summary.total_requested, 12);
    assert_eq!(summary.pages_attempted, 3);
    assert_eq!(summary.pages_succeeded, 3);
    assert_eq!(summary.pages_failed, 0);
    assert_eq!(summary.records_inserted, 12);
    assert_eq!(summary.fallbacks_used, 0);
    assert_eq!(summary.retries_total, 0);

    let stored = fx.sink.find_by_batch(&summary.batch_id).await;
    assert_eq!(stored.len(), 12);
    assert!(stored.iter().all(|r| r.status == RecordStatus::Inserted));
    // Last page carries only the remainder.
    assert_eq!(stored.iter().filter(|r| r.external_id.starts_with("EXT-0003")).count(), 2);
}

#[tokio::test]
async fn failed_pages_become_fallback_records() {
    let fx = fixture(3);
    fx.faults.apply_hard_failure();

    let summary = fx.orchestrator.transfer(10, 5).await.unwrap();

    assert_eq!(summary.pages_attempted, 2);
    assert_eq!(summary.pages_failed, 2);
    assert_eq!(summary.pages_succeeded, 0);
    assert_eq!(summary.records_inserted, 0);
    assert_eq!(summary.fallbacks_used, 2);
    assert_eq!(summary.generic_failures, 2);
    assert_eq!(summary.retries_total, 4, "two extra attempts per exhausted page");

    let stored = fx.sink.find_by_batch(&summary.batch_id).await;
    assert_eq!(stored.len(), 10, "every requested slot gets a placeholder");
    assert!(stored.iter().all(|r| r.status == RecordStatus::Fallback));
    assert!(stored.iter().take(5).all(|r| r.external_id == "FALLBACK-P1"));
    assert!(stored.iter().skip(5).all(|r| r.external_id == "FALLBACK-P2"));
}

#[tokio::test]
async fn forced_open_breaker_is_attributed_and_never_calls_downstream() {
    let fx = fixture(3);
    fx.orchestrator.pipeline().circuit_breaker().force_open();

    let summary = fx.orchestrator.transfer(6, 3).await.unwrap();

    assert_eq!(summary.pages_failed, 2);
    assert_eq!(summary.circuit_breaker_rejections, 2);
    assert_eq!(summary.generic_failures, 0);
    assert_eq!(fx.downstream.calls(), 0);
    assert_eq!(fx.sink.len().await, 6);
}

#[tokio::test]
async fn batches_are_separately_indexed() {
    let fx = fixture(1);

    let first = fx.orchestrator.transfer(4, 2).await.unwrap();
    let second = fx.orchestrator.transfer(6, 3).await.unwrap();

    assert_ne!(first.batch_id, second.batch_id);
    let ids = fx.sink.list_batch_ids().await;
    assert_eq!(ids, vec![first.batch_id.clone(), second.batch_id.clone()]);
    assert_eq!(fx.sink.find_by_batch(&first.batch_id).await.len(), 4);
    assert_eq!(fx.sink.find_by_batch(&second.batch_id).await.len(), 6);
}

#[tokio::test]
async fn exhausted_retries_are_counted_in_the_summary() {
    let fx = fixture(3);
    fx.faults.apply_hard_failure();

    let summary = fx.orchestrator.transfer(4, 4).await.unwrap();

    assert_eq!(summary.pages_failed, 1);
    assert_eq!(fx.downstream.calls(), 3);
    assert_eq!(summary.retries_total, 2);
}

#[tokio::test]
async fn zero_page_size_is_rejected() {
    let fx = fixture(1);

    let err = fx.orchestrator.transfer(10, 0).await.unwrap_err();

    assert!(matches!(err, TransferError::InvalidPageSize));
    assert_eq!(fx.downstream.calls(), 0);
    assert!(fx.sink.is_empty().await);
}

#[tokio::test]
async fn zero_records_is_a_no_op() {
    let fx = fixture(1);

    let summary = fx.orchestrator.transfer(0, 5).await.unwrap();

    assert_eq!(summary.pages_attempted, 0);
    assert_eq!(summary.records_inserted, 0);
    assert_eq!(fx.downstream.calls(), 0);
    assert!(fx.sink.is_empty().await);
}

#[tokio::test]
async fn retries_are_counted_in_the_summary() {
    let fx = fixture(3);
    fx.faults.apply_hard_failure();

    let healer = {
        let faults = Arc::clone(&fx.faults);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2)).await;
            faults.reset();
        })
    };

    let summary = fx.orchestrator.transfer(3, 3).await.unwrap();
    healer.await.unwrap();

    assert_eq!(summary.pages_succeeded, 1);
    assert!(summary.retries_total >= 1, "recovered page must count its extra attempts");
    assert_eq!(summary.records_inserted, 3);
}
