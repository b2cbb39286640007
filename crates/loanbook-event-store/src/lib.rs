//! PostgreSQL adapters for the loanbook event-sourcing engine.
//!
//! Each store implements one of the ports in `loanbook-core` on top of a
//! shared `sqlx` pool. The schema lives in the workspace `migrations/`
//! directory and is embedded in [`MIGRATOR`].

pub mod config;
pub mod error;
pub mod pg_audit_store;
pub mod pg_event_store;
pub mod pg_metrics_sink;
pub mod pg_snapshot_store;

use std::sync::Arc;

use sqlx::PgPool;

use crate::pg_audit_store::PgAuditStore;
use crate::pg_event_store::PgEventStore;
use crate::pg_metrics_sink::PgMetricsSink;
use crate::pg_snapshot_store::PgSnapshotStore;

/// Embedded schema migrations.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

/// The four PostgreSQL stores sharing one pool.
#[derive(Debug, Clone)]
pub struct PgStores {
    /// Event log.
    pub events: Arc<PgEventStore>,
    /// Snapshot cache.
    pub snapshots: Arc<PgSnapshotStore>,
    /// Audit trail.
    pub audit: Arc<PgAuditStore>,
    /// Metric observations.
    pub metrics: Arc<PgMetricsSink>,
}

impl PgStores {
    /// Creates every store on `pool`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            events: Arc::new(PgEventStore::new(pool.clone())),
            snapshots: Arc::new(PgSnapshotStore::new(pool.clone())),
            audit: Arc::new(PgAuditStore::new(pool.clone())),
            metrics: Arc::new(PgMetricsSink::new(pool)),
        }
    }
}
