//! Test snapshot store — in-memory `SnapshotStore` implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loanbook_core::error::DomainError;
use loanbook_core::repository::EventStore;
use loanbook_core::snapshot::{SnapshotRecord, SnapshotStore};
use uuid::Uuid;

/// A snapshot store keyed by `(aggregate_id, aggregate_type)`. Checks new
/// snapshots against the paired event store so a snapshot can never be
/// ahead of the log.
pub struct InMemorySnapshotStore {
    events: Arc<dyn EventStore>,
    snapshots: Mutex<HashMap<(Uuid, String), SnapshotRecord>>,
    saves: Mutex<usize>,
}

impl std::fmt::Debug for InMemorySnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySnapshotStore")
            .field("snapshots", &self.snapshots)
            .finish_non_exhaustive()
    }
}

impl InMemorySnapshotStore {
    /// Create an empty store guarded by `events`.
    #[must_use]
    pub fn new(events: Arc<dyn EventStore>) -> Self {
        Self {
            events,
            snapshots: Mutex::new(HashMap::new()),
            saves: Mutex::new(0),
        }
    }

    /// Seeds a snapshot without the version guard, e.g. to simulate a
    /// corrupt or stale cache entry.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn insert_unchecked(&self, snapshot: SnapshotRecord) {
        self.snapshots.lock().unwrap().insert(
            (snapshot.aggregate_id, snapshot.aggregate_type.clone()),
            snapshot,
        );
    }

    /// Number of successful `save_snapshot` calls.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save_snapshot(&self, snapshot: SnapshotRecord) -> Result<(), DomainError> {
        let log_version = self.events.aggregate_version(snapshot.aggregate_id).await?;
        if snapshot.version > log_version {
            return Err(DomainError::Validation(format!(
                "snapshot version {} is ahead of event log version {log_version} for {}",
                snapshot.version, snapshot.aggregate_id
            )));
        }
        self.insert_unchecked(snapshot);
        *self.saves.lock().unwrap() += 1;
        Ok(())
    }

    async fn load_snapshot(
        &self,
        aggregate_id: Uuid,
        aggregate_type: &str,
    ) -> Result<Option<SnapshotRecord>, DomainError> {
        Ok(self
            .snapshots
            .lock()
            .unwrap()
            .get(&(aggregate_id, aggregate_type.to_owned()))
            .cloned())
    }

    async fn delete_snapshots_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, DomainError> {
        let mut snapshots = self.snapshots.lock().unwrap();
        let before = snapshots.len();
        snapshots.retain(|_, s| s.created_at >= cutoff);
        Ok(u64::try_from(before - snapshots.len()).unwrap_or(u64::MAX))
    }
}
