//! `PostgreSQL` implementation of the `MetricsSink` trait.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;

use loanbook_core::error::DomainError;
use loanbook_core::metrics::{MetricFilter, MetricObservation, MetricStatistics, MetricsSink};

use crate::error::storage_error;

/// PostgreSQL-backed metric observations. Tags are stored as a JSONB
/// object and filtered with containment.
#[derive(Debug, Clone)]
pub struct PgMetricsSink {
    pool: PgPool,
}

impl PgMetricsSink {
    /// Creates a new `PgMetricsSink`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetricsSink for PgMetricsSink {
    #[instrument(skip_all, fields(batch_size = batch.len()))]
    async fn write_batch(&self, batch: &[MetricObservation]) -> Result<(), DomainError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        for observation in batch {
            sqlx::query(
                "INSERT INTO metric_observations (metric_name, value, tags, recorded_at) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(&observation.metric_name)
            .bind(observation.value)
            .bind(serde_json::to_value(&observation.tags)?)
            .bind(observation.recorded_at)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        }
        tx.commit().await.map_err(storage_error)
    }

    async fn statistics(
        &self,
        metric_name: &str,
        filter: &MetricFilter,
    ) -> Result<MetricStatistics, DomainError> {
        let (count, average, min, max, sum, std_dev) =
            sqlx::query_as::<_, (i64, f64, f64, f64, f64, f64)>(
                "SELECT COUNT(*), \
                     COALESCE(AVG(value), 0), \
                     COALESCE(MIN(value), 0), \
                     COALESCE(MAX(value), 0), \
                     COALESCE(SUM(value), 0), \
                     COALESCE(STDDEV_POP(value), 0) \
                 FROM metric_observations \
                 WHERE metric_name = $1 \
                   AND ($2::timestamptz IS NULL OR recorded_at >= $2) \
                   AND ($3::timestamptz IS NULL OR recorded_at <= $3) \
                   AND tags @> $4",
            )
            .bind(metric_name)
            .bind(filter.since)
            .bind(filter.until)
            .bind(serde_json::to_value(&filter.tags)?)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(MetricStatistics {
            count,
            average,
            min,
            max,
            sum,
            std_dev,
        })
    }
}
