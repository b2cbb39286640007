//! Buffered, batched recording of numeric observations.
//!
//! Metrics are best-effort: a failed flush is logged and the batch dropped,
//! and observations still buffered when the process dies are lost.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, instrument};

use crate::clock::Clock;
use crate::error::DomainError;

/// Key/value tags attached to an observation.
pub type MetricTags = BTreeMap<String, String>;

/// One numeric observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricObservation {
    /// Metric name, e.g. `command.execution_time_ms`.
    pub metric_name: String,
    /// Observed value.
    pub value: f64,
    /// Tags for filtering.
    pub tags: MetricTags,
    /// When the value was observed.
    pub recorded_at: DateTime<Utc>,
}

/// Selection for [`MetricsSink::statistics`]. Time bounds are inclusive;
/// every tag listed must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricFilter {
    /// Earliest observation.
    pub since: Option<DateTime<Utc>>,
    /// Latest observation.
    pub until: Option<DateTime<Utc>>,
    /// Required tags.
    pub tags: MetricTags,
}

impl MetricFilter {
    /// Returns `true` if the observation falls inside the filter.
    #[must_use]
    pub fn matches(&self, observation: &MetricObservation) -> bool {
        self.since.is_none_or(|since| observation.recorded_at >= since)
            && self.until.is_none_or(|until| observation.recorded_at <= until)
            && self
                .tags
                .iter()
                .all(|(k, v)| observation.tags.get(k) == Some(v))
    }
}

/// Aggregate statistics over a set of observations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricStatistics {
    /// Number of observations.
    pub count: i64,
    /// Arithmetic mean.
    pub average: f64,
    /// Smallest value.
    pub min: f64,
    /// Largest value.
    pub max: f64,
    /// Sum of values.
    pub sum: f64,
    /// Population standard deviation.
    pub std_dev: f64,
}

impl MetricStatistics {
    /// Computes statistics; all zeros for an empty slice.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let n = values.len() as f64;
        let sum: f64 = values.iter().sum();
        let average = sum / n;
        let variance = values.iter().map(|v| (v - average).powi(2)).sum::<f64>() / n;
        Self {
            count: i64::try_from(values.len()).unwrap_or(i64::MAX),
            average,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            sum,
            std_dev: variance.sqrt(),
        }
    }
}

/// Durable destination for flushed observations.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Writes the whole batch in one transaction, or nothing.
    async fn write_batch(&self, batch: &[MetricObservation]) -> Result<(), DomainError>;

    /// Statistics for one metric over the filter.
    async fn statistics(
        &self,
        metric_name: &str,
        filter: &MetricFilter,
    ) -> Result<MetricStatistics, DomainError>;
}

/// Buffers observations and flushes them in batches.
///
/// The buffer flushes automatically when it reaches capacity, and on
/// [`MetricsCollector::flush`]. Dropping a collector that still holds
/// observations hands them to a background flush when a tokio runtime is
/// available.
pub struct MetricsCollector {
    sink: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    capacity: usize,
    buffer: Mutex<Vec<MetricObservation>>,
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("capacity", &self.capacity)
            .field("buffered", &self.buffered())
            .finish_non_exhaustive()
    }
}

impl MetricsCollector {
    /// Default buffer capacity.
    pub const DEFAULT_CAPACITY: usize = 100;

    /// Creates a collector that flushes every `capacity` observations.
    /// A capacity of 0 is treated as 1.
    #[must_use]
    pub fn new(sink: Arc<dyn MetricsSink>, clock: Arc<dyn Clock>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            sink,
            clock,
            capacity,
            buffer: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Number of observations waiting for a flush.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.lock_buffer().len()
    }

    /// Records a raw observation.
    pub async fn record(&self, metric_name: &str, value: f64, tags: MetricTags) {
        let observation = MetricObservation {
            metric_name: metric_name.to_owned(),
            value,
            tags,
            recorded_at: self.clock.now(),
        };
        let full_batch = {
            let mut buffer = self.lock_buffer();
            buffer.push(observation);
            if buffer.len() >= self.capacity {
                Some(std::mem::take(&mut *buffer))
            } else {
                None
            }
        };
        if let Some(batch) = full_batch {
            self.write(batch).await;
        }
    }

    /// Records a counter increment of 1.
    pub async fn increment(&self, metric_name: &str, tags: MetricTags) {
        self.record(metric_name, 1.0, tags).await;
    }

    /// Records a point-in-time gauge value.
    pub async fn gauge(&self, metric_name: &str, value: f64, tags: MetricTags) {
        self.record(metric_name, value, tags).await;
    }

    /// Records a duration in milliseconds.
    pub async fn timing(&self, metric_name: &str, elapsed: Duration, tags: MetricTags) {
        self.record(metric_name, elapsed.as_secs_f64() * 1000.0, tags).await;
    }

    /// Writes everything buffered.
    pub async fn flush(&self) {
        let batch = std::mem::take(&mut *self.lock_buffer());
        if !batch.is_empty() {
            self.write(batch).await;
        }
    }

    /// Statistics for one metric. Buffered observations are flushed first so
    /// they are included.
    ///
    /// # Errors
    ///
    /// Returns the sink's error.
    pub async fn statistics(
        &self,
        metric_name: &str,
        filter: &MetricFilter,
    ) -> Result<MetricStatistics, DomainError> {
        self.flush().await;
        self.sink.statistics(metric_name, filter).await
    }

    #[instrument(skip_all, fields(batch_size = batch.len()))]
    async fn write(&self, batch: Vec<MetricObservation>) {
        match self.sink.write_batch(&batch).await {
            Ok(()) => debug!("metrics flushed"),
            Err(err) => error!(error = %err, dropped = batch.len(), "metrics flush failed"),
        }
    }

    fn lock_buffer(&self) -> std::sync::MutexGuard<'_, Vec<MetricObservation>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for MetricsCollector {
    fn drop(&mut self) {
        let batch = std::mem::take(
            self.buffer
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        if batch.is_empty() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            error!(dropped = batch.len(), "metrics collector dropped outside a runtime");
            return;
        };
        let sink = Arc::clone(&self.sink);
        handle.spawn(async move {
            if let Err(err) = sink.write_batch(&batch).await {
                error!(error = %err, dropped = batch.len(), "final metrics flush failed");
            }
        });
    }
}

/// Builds a tag map from string pairs.
#[must_use]
pub fn tags<const N: usize>(pairs: [(&str, &str); N]) -> MetricTags {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics_over_known_values() {
        let stats = MetricStatistics::from_values(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);

        assert_eq!(stats.count, 8);
        assert!((stats.sum - 40.0).abs() < f64::EPSILON);
        assert!((stats.average - 5.0).abs() < f64::EPSILON);
        assert!((stats.min - 2.0).abs() < f64::EPSILON);
        assert!((stats.max - 9.0).abs() < f64::EPSILON);
        assert!((stats.std_dev - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_statistics_of_nothing_is_zero() {
        assert_eq!(MetricStatistics::from_values(&[]), MetricStatistics::default());
    }

    #[test]
    fn test_filter_requires_every_tag() {
        let observation = MetricObservation {
            metric_name: "command.execution_time_ms".to_owned(),
            value: 3.0,
            tags: tags([("command_type", "lending.fund_loan"), ("outcome", "success")]),
            recorded_at: Utc::now(),
        };

        let matching = MetricFilter {
            tags: tags([("outcome", "success")]),
            ..MetricFilter::default()
        };
        let other = MetricFilter {
            tags: tags([("outcome", "failure")]),
            ..MetricFilter::default()
        };

        assert!(matching.matches(&observation));
        assert!(!other.matches(&observation));
    }
}
