//! Snapshots: a derived cache of aggregate state that bounds replay cost.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::aggregate::AggregateRoot;
use crate::clock::Clock;
use crate::error::DomainError;

/// Persisted snapshot of one aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRecord {
    /// Aggregate identifier.
    pub aggregate_id: Uuid,
    /// Aggregate type name.
    pub aggregate_type: String,
    /// Serialized aggregate state.
    pub state: serde_json::Value,
    /// Event version the state reflects.
    pub version: i64,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
}

/// Storage for snapshots, at most one per `(aggregate_id, aggregate_type)`.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Upserts the snapshot, replacing any previous one for the aggregate.
    ///
    /// Implementations reject a snapshot whose version is ahead of the event
    /// log with `DomainError::Validation`.
    async fn save_snapshot(&self, snapshot: SnapshotRecord) -> Result<(), DomainError>;

    /// Loads the snapshot for an aggregate, if any.
    async fn load_snapshot(
        &self,
        aggregate_id: Uuid,
        aggregate_type: &str,
    ) -> Result<Option<SnapshotRecord>, DomainError>;

    /// Deletes snapshots created before `cutoff`. Returns the number removed.
    async fn delete_snapshots_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, DomainError>;
}

/// Decides when an aggregate is due for a new snapshot.
///
/// The rule is delta-based: a snapshot is due once `frequency` events have
/// been persisted since the last one. An aggregate without a snapshot counts
/// from version 0, so with snapshots taken when due this fires exactly at
/// multiples of `frequency`, and it still fires for aggregates whose version
/// drifted off those boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotPolicy {
    frequency: i64,
}

impl SnapshotPolicy {
    /// Default number of events between snapshots.
    pub const DEFAULT_FREQUENCY: i64 = 50;

    /// Longest snapshot retention accepted by cleanup, in days.
    pub const MAX_RETENTION_DAYS: i64 = 36_500;

    /// Creates a policy.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `frequency` is not positive.
    pub fn new(frequency: i64) -> Result<Self, DomainError> {
        if frequency <= 0 {
            return Err(DomainError::Validation(format!(
                "snapshot frequency must be positive, got {frequency}"
            )));
        }
        Ok(Self { frequency })
    }

    /// Events between snapshots.
    #[must_use]
    pub fn frequency(&self) -> i64 {
        self.frequency
    }

    /// Returns `true` when `current_version` is at least `frequency` events
    /// past `last_snapshot_version`.
    #[must_use]
    pub fn should_take_snapshot(
        &self,
        current_version: i64,
        last_snapshot_version: Option<i64>,
    ) -> bool {
        current_version > 0
            && current_version - last_snapshot_version.unwrap_or(0) >= self.frequency
    }
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            frequency: Self::DEFAULT_FREQUENCY,
        }
    }
}

/// Typed facade over a [`SnapshotStore`]: captures, restores and applies
/// the snapshot policy for concrete aggregates.
#[derive(Clone)]
pub struct SnapshotManager {
    store: Arc<dyn SnapshotStore>,
    policy: SnapshotPolicy,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SnapshotManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotManager")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl SnapshotManager {
    /// Creates a new `SnapshotManager`.
    #[must_use]
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        policy: SnapshotPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, policy, clock }
    }

    /// The policy in force.
    #[must_use]
    pub fn policy(&self) -> SnapshotPolicy {
        self.policy
    }

    /// Serializes the aggregate's snapshot state and upserts it.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the state cannot be encoded,
    /// or the store's error.
    #[instrument(
        skip_all,
        fields(aggregate_id = %aggregate.aggregate_id(), version = aggregate.version())
    )]
    pub async fn save_snapshot<A: AggregateRoot>(&self, aggregate: &A) -> Result<(), DomainError> {
        let state = serde_json::to_value(aggregate.take_snapshot())?;
        self.store
            .save_snapshot(SnapshotRecord {
                aggregate_id: aggregate.aggregate_id(),
                aggregate_type: A::AGGREGATE_TYPE.to_owned(),
                state,
                version: aggregate.version(),
                created_at: self.clock.now(),
            })
            .await?;
        debug!("snapshot saved");
        Ok(())
    }

    /// Loads the raw snapshot record for an aggregate.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn load_snapshot_record<A: AggregateRoot>(
        &self,
        aggregate_id: Uuid,
    ) -> Result<Option<SnapshotRecord>, DomainError> {
        self.store.load_snapshot(aggregate_id, A::AGGREGATE_TYPE).await
    }

    /// Loads the snapshot and restores an aggregate at the snapshot version.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the stored state does not
    /// decode, or the store's error.
    pub async fn load_snapshot<A: AggregateRoot>(
        &self,
        aggregate_id: Uuid,
    ) -> Result<Option<A>, DomainError> {
        let Some(record) = self.load_snapshot_record::<A>(aggregate_id).await? else {
            return Ok(None);
        };
        let state: A::Snapshot = serde_json::from_value(record.state).map_err(|e| {
            DomainError::Serialization(format!(
                "cannot decode {} snapshot of {aggregate_id}: {e}",
                A::AGGREGATE_TYPE
            ))
        })?;
        let mut aggregate = A::empty(aggregate_id);
        aggregate.restore_from_snapshot(state);
        aggregate.set_version(record.version);
        Ok(Some(aggregate))
    }

    /// Checks the policy against the last stored snapshot.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn should_take_snapshot<A: AggregateRoot>(
        &self,
        aggregate: &A,
    ) -> Result<bool, DomainError> {
        let last = self
            .load_snapshot_record::<A>(aggregate.aggregate_id())
            .await?
            .map(|s| s.version);
        Ok(self.policy.should_take_snapshot(aggregate.version(), last))
    }

    /// Removes snapshots older than `retention`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `retention` is negative or longer
    /// than [`SnapshotPolicy::MAX_RETENTION_DAYS`], or the store's error.
    pub async fn cleanup(&self, retention: Duration) -> Result<u64, DomainError> {
        let max_retention = Duration::days(SnapshotPolicy::MAX_RETENTION_DAYS);
        if retention < Duration::zero() || retention > max_retention {
            return Err(DomainError::Validation(format!(
                "snapshot retention must be between 0 and {} days, got {} days",
                SnapshotPolicy::MAX_RETENTION_DAYS,
                retention.num_days()
            )));
        }
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(retention)
            .ok_or_else(|| {
                DomainError::Validation("snapshot retention is out of range".to_owned())
            })?;
        let removed = self.store.delete_snapshots_older_than(cutoff).await?;
        debug!(removed, %cutoff, "old snapshots removed");
        Ok(removed)
    }
}
