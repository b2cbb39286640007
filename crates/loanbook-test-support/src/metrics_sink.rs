//! Test metrics sinks — in-memory and failing `MetricsSink` implementations.

use std::sync::Mutex;

use async_trait::async_trait;
use loanbook_core::error::DomainError;
use loanbook_core::metrics::{MetricFilter, MetricObservation, MetricStatistics, MetricsSink};

/// A sink that keeps every written batch.
#[derive(Debug, Default)]
pub struct InMemoryMetricsSink {
    batches: Mutex<Vec<Vec<MetricObservation>>>,
}

impl InMemoryMetricsSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every batch written so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn batches(&self) -> Vec<Vec<MetricObservation>> {
        self.batches.lock().unwrap().clone()
    }

    /// Returns every observation written so far, flattened.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn observations(&self) -> Vec<MetricObservation> {
        self.batches.lock().unwrap().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl MetricsSink for InMemoryMetricsSink {
    async fn write_batch(&self, batch: &[MetricObservation]) -> Result<(), DomainError> {
        self.batches.lock().unwrap().push(batch.to_vec());
        Ok(())
    }

    async fn statistics(
        &self,
        metric_name: &str,
        filter: &MetricFilter,
    ) -> Result<MetricStatistics, DomainError> {
        let values: Vec<f64> = self
            .observations()
            .iter()
            .filter(|o| o.metric_name == metric_name && filter.matches(o))
            .map(|o| o.value)
            .collect();
        Ok(MetricStatistics::from_values(&values))
    }
}

/// A sink whose writes always fail. Counts attempts so tests can check that
/// a flush happened even though nothing was stored.
#[derive(Debug, Default)]
pub struct FailingMetricsSink {
    attempts: Mutex<usize>,
}

impl FailingMetricsSink {
    /// Number of `write_batch` calls.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl MetricsSink for FailingMetricsSink {
    async fn write_batch(&self, _batch: &[MetricObservation]) -> Result<(), DomainError> {
        *self.attempts.lock().unwrap() += 1;
        Err(DomainError::Storage("metrics table unavailable".into()))
    }

    async fn statistics(
        &self,
        _metric_name: &str,
        _filter: &MetricFilter,
    ) -> Result<MetricStatistics, DomainError> {
        Err(DomainError::Storage("metrics table unavailable".into()))
    }
}
