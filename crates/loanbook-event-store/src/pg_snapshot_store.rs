//! `PostgreSQL` implementation of the `SnapshotStore` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{info, instrument};
use uuid::Uuid;

use loanbook_core::error::DomainError;
use loanbook_core::snapshot::{SnapshotRecord, SnapshotStore};

use crate::error::storage_error;

#[derive(Debug, sqlx::FromRow)]
struct SnapshotRow {
    aggregate_id: Uuid,
    aggregate_type: String,
    state: serde_json::Value,
    version: i64,
    created_at: DateTime<Utc>,
}

impl From<SnapshotRow> for SnapshotRecord {
    fn from(row: SnapshotRow) -> Self {
        Self {
            aggregate_id: row.aggregate_id,
            aggregate_type: row.aggregate_type,
            state: row.state,
            version: row.version,
            created_at: row.created_at,
        }
    }
}

/// PostgreSQL-backed snapshot store. One row per
/// `(aggregate_id, aggregate_type)`, replaced on every save.
#[derive(Debug, Clone)]
pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    /// Creates a new `PgSnapshotStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    #[instrument(
        skip(self, snapshot),
        fields(aggregate_id = %snapshot.aggregate_id, version = snapshot.version)
    )]
    async fn save_snapshot(&self, snapshot: SnapshotRecord) -> Result<(), DomainError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        let log_version = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(version), 0) FROM domain_events WHERE aggregate_id = $1",
        )
        .bind(snapshot.aggregate_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage_error)?;
        if snapshot.version > log_version {
            return Err(DomainError::Validation(format!(
                "snapshot version {} is ahead of event log version {log_version} for {}",
                snapshot.version, snapshot.aggregate_id
            )));
        }

        sqlx::query(
            "INSERT INTO aggregate_snapshots \
                 (aggregate_id, aggregate_type, state, version, created_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (aggregate_id, aggregate_type) DO UPDATE SET \
                 state = EXCLUDED.state, \
                 version = EXCLUDED.version, \
                 created_at = EXCLUDED.created_at",
        )
        .bind(snapshot.aggregate_id)
        .bind(&snapshot.aggregate_type)
        .bind(&snapshot.state)
        .bind(snapshot.version)
        .bind(snapshot.created_at)
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        tx.commit().await.map_err(storage_error)
    }

    async fn load_snapshot(
        &self,
        aggregate_id: Uuid,
        aggregate_type: &str,
    ) -> Result<Option<SnapshotRecord>, DomainError> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            "SELECT aggregate_id, aggregate_type, state, version, created_at \
             FROM aggregate_snapshots WHERE aggregate_id = $1 AND aggregate_type = $2",
        )
        .bind(aggregate_id)
        .bind(aggregate_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(row.map(SnapshotRecord::from))
    }

    #[instrument(skip(self))]
    async fn delete_snapshots_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, DomainError> {
        let result = sqlx::query("DELETE FROM aggregate_snapshots WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        info!(removed = result.rows_affected(), "old snapshots deleted");
        Ok(result.rows_affected())
    }
}
