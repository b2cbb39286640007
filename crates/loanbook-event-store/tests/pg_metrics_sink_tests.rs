//! Integration tests for `PgMetricsSink`.

use chrono::{Duration, Utc};
use loanbook_core::metrics::{MetricFilter, MetricObservation, MetricsSink, tags};
use loanbook_event_store::pg_metrics_sink::PgMetricsSink;
use sqlx::PgPool;

fn observation(value: f64, channel: &str) -> MetricObservation {
    MetricObservation {
        metric_name: "payment.amount".to_string(),
        value,
        tags: tags([("channel", channel), ("currency", "USD")]),
        recorded_at: Utc::now(),
    }
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_write_batch_and_statistics(pool: PgPool) {
    let sink = PgMetricsSink::new(pool);
    let batch: Vec<_> = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]
        .into_iter()
        .map(|v| observation(v, "ach"))
        .chain(std::iter::once(observation(1_000.0, "card")))
        .collect();

    sink.write_batch(&batch).await.unwrap();
    let filter = MetricFilter {
        tags: tags([("channel", "ach")]),
        ..MetricFilter::default()
    };
    let stats = sink.statistics("payment.amount", &filter).await.unwrap();

    assert_eq!(stats.count, 8);
    assert!((stats.average - 5.0).abs() < 1e-9);
    assert!((stats.min - 2.0).abs() < 1e-9);
    assert!((stats.max - 9.0).abs() < 1e-9);
    assert!((stats.sum - 40.0).abs() < 1e-9);
    assert!((stats.std_dev - 2.0).abs() < 1e-9);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_statistics_respect_time_window(pool: PgPool) {
    let sink = PgMetricsSink::new(pool);
    let mut old = observation(100.0, "ach");
    old.recorded_at = Utc::now() - Duration::days(3);
    sink.write_batch(&[old, observation(10.0, "ach")])
        .await
        .unwrap();

    let filter = MetricFilter {
        since: Some(Utc::now() - Duration::days(1)),
        ..MetricFilter::default()
    };
    let stats = sink.statistics("payment.amount", &filter).await.unwrap();

    assert_eq!(stats.count, 1);
    assert!((stats.sum - 10.0).abs() < 1e-9);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_statistics_for_unknown_metric_are_zero(pool: PgPool) {
    let sink = PgMetricsSink::new(pool);

    let stats = sink
        .statistics("nothing.recorded", &MetricFilter::default())
        .await
        .unwrap();

    assert_eq!(stats.count, 0);
    assert!(stats.average.abs() < f64::EPSILON);
}
