//! Shared engine wiring for admin commands.

use std::sync::Arc;

use loanbook_core::audit::AuditService;
use loanbook_core::bus::QueryBus;
use loanbook_core::clock::{Clock, SystemClock};
use loanbook_core::event_sourced::EventSourcedRepository;
use loanbook_core::metrics::MetricsCollector;
use loanbook_core::snapshot::SnapshotManager;
use loanbook_event_store::PgStores;
use loanbook_event_store::config::{ConfigError, EngineConfig};
use loanbook_lending::application::query_handlers::LoanQueryHandler;
use loanbook_lending::domain::aggregates::LoanApplication;
use sqlx::PgPool;

/// Engine services built on one PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct AppState {
    /// PostgreSQL connection pool.
    pub db_pool: PgPool,
    /// Settings the services were built from.
    pub config: EngineConfig,
    /// The PostgreSQL stores.
    pub stores: PgStores,
    /// Snapshot policy and retention.
    pub snapshots: SnapshotManager,
    /// Audit recording and compliance queries.
    pub audit: Arc<AuditService>,
    /// Buffered metrics.
    pub metrics: Arc<MetricsCollector>,
    /// Timed query dispatch.
    pub query_bus: QueryBus,
    /// Loan read side.
    pub loans: LoanQueryHandler,
}

impl AppState {
    /// Builds the services on the system clock.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the snapshot settings are invalid.
    pub fn new(db_pool: PgPool, config: EngineConfig) -> Result<Self, ConfigError> {
        Self::with_clock(db_pool, config, Arc::new(SystemClock))
    }

    /// Builds the services on `clock`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the snapshot settings are invalid.
    pub fn with_clock(
        db_pool: PgPool,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let stores = PgStores::new(db_pool.clone());
        let snapshots = SnapshotManager::new(
            stores.snapshots.clone(),
            config.snapshot_policy()?,
            clock.clone(),
        );
        let audit = Arc::new(AuditService::new(
            stores.audit.clone(),
            stores.events.clone(),
            clock.clone(),
            config.anonymization_salt.clone(),
        ));
        let metrics = Arc::new(MetricsCollector::new(
            stores.metrics.clone(),
            clock,
            config.metrics_buffer_size,
        ));
        let repo = EventSourcedRepository::<LoanApplication>::new(stores.events.clone())
            .with_snapshots(snapshots.clone());

        Ok(Self {
            db_pool,
            loans: LoanQueryHandler::new(repo, audit.clone()),
            query_bus: QueryBus::new().with_metrics(metrics.clone()),
            config,
            stores,
            snapshots,
            audit,
            metrics,
        })
    }
}
