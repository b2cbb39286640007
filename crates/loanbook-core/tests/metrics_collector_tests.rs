//! Integration tests for `MetricsCollector`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use loanbook_core::metrics::{MetricFilter, MetricsCollector, tags};
use loanbook_test_support::{FailingMetricsSink, FixedClock, InMemoryMetricsSink};

fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock(Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()))
}

#[tokio::test]
async fn test_buffer_flushes_when_capacity_is_reached() {
    // Arrange
    let sink = Arc::new(InMemoryMetricsSink::new());
    let collector = MetricsCollector::new(sink.clone(), clock(), 3);

    // Act
    collector.increment("loan.submitted", tags([])).await;
    collector.increment("loan.submitted", tags([])).await;
    let before_capacity = sink.batches().len();
    collector.increment("loan.submitted", tags([])).await;

    // Assert
    assert_eq!(before_capacity, 0);
    let batches = sink.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 3);
    assert_eq!(collector.buffered(), 0);
}

#[tokio::test]
async fn test_explicit_flush_writes_partial_buffer() {
    // Arrange
    let sink = Arc::new(InMemoryMetricsSink::new());
    let collector =
        MetricsCollector::new(sink.clone(), clock(), MetricsCollector::DEFAULT_CAPACITY);
    collector
        .gauge("loan.portfolio_balance", 125_000.0, tags([("currency", "USD")]))
        .await;
    collector
        .timing("db.query_ms", Duration::from_millis(250), tags([]))
        .await;

    // Act
    collector.flush().await;
    collector.flush().await;

    // Assert
    let batches = sink.batches();
    assert_eq!(batches.len(), 1);
    assert!((batches[0][0].value - 125_000.0).abs() < f64::EPSILON);
    assert_eq!(batches[0][0].tags["currency"], "USD");
    assert!((batches[0][1].value - 250.0).abs() < f64::EPSILON);
    assert_eq!(batches[0][1].recorded_at, clock().0);
}

#[tokio::test]
async fn test_failed_flush_drops_batch_without_error() {
    // Arrange
    let sink = Arc::new(FailingMetricsSink::default());
    let collector = MetricsCollector::new(sink.clone(), clock(), 2);

    // Act
    collector.increment("loan.funded", tags([])).await;
    collector.increment("loan.funded", tags([])).await;

    // Assert
    assert_eq!(sink.attempts(), 1);
    assert_eq!(collector.buffered(), 0);
}

#[tokio::test]
async fn test_zero_capacity_behaves_like_one() {
    let sink = Arc::new(InMemoryMetricsSink::new());
    let collector = MetricsCollector::new(sink.clone(), clock(), 0);

    collector.increment("loan.viewed", tags([])).await;

    assert_eq!(sink.batches().len(), 1);
}

#[tokio::test]
async fn test_statistics_include_buffered_observations() {
    // Arrange
    let sink = Arc::new(InMemoryMetricsSink::new());
    let collector = MetricsCollector::new(sink.clone(), clock(), 100);
    for value in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
        collector
            .record("payment.amount", value, tags([("channel", "ach")]))
            .await;
    }
    collector
        .record("payment.amount", 1_000.0, tags([("channel", "card")]))
        .await;
    let filter = MetricFilter {
        tags: tags([("channel", "ach")]),
        ..MetricFilter::default()
    };

    // Act
    let stats = collector.statistics("payment.amount", &filter).await.unwrap();

    // Assert
    assert_eq!(stats.count, 8);
    assert!((stats.average - 5.0).abs() < 1e-9);
    assert!((stats.min - 2.0).abs() < 1e-9);
    assert!((stats.max - 9.0).abs() < 1e-9);
    assert!((stats.sum - 40.0).abs() < 1e-9);
    assert!((stats.std_dev - 2.0).abs() < 1e-9);
    assert_eq!(collector.buffered(), 0);
}

#[tokio::test]
async fn test_statistics_for_unknown_metric_are_empty() {
    let collector = MetricsCollector::new(Arc::new(InMemoryMetricsSink::new()), clock(), 10);

    let stats = collector
        .statistics("nothing.recorded", &MetricFilter::default())
        .await
        .unwrap();

    assert_eq!(stats.count, 0);
}

#[tokio::test]
async fn test_drop_flushes_remaining_observations_in_background() {
    // Arrange
    let sink = Arc::new(InMemoryMetricsSink::new());
    let collector = MetricsCollector::new(sink.clone(), clock(), 100);
    collector.increment("loan.viewed", tags([])).await;

    // Act
    drop(collector);
    tokio::task::yield_now().await;

    // Assert
    assert_eq!(sink.observations().len(), 1);
}
