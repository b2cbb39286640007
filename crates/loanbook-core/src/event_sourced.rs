//! Event-sourced repository: saves buffered events under an optimistic
//! concurrency check and loads aggregates from snapshot plus replay.

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::aggregate::AggregateRoot;
use crate::error::DomainError;
use crate::event::DomainEvent;
use crate::repository::{EventStore, NewEvent, StoredEvent};
use crate::snapshot::SnapshotManager;

/// Repository for one aggregate type.
pub struct EventSourcedRepository<A> {
    events: Arc<dyn EventStore>,
    snapshots: Option<SnapshotManager>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A> Clone for EventSourcedRepository<A> {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
            snapshots: self.snapshots.clone(),
            _aggregate: PhantomData,
        }
    }
}

impl<A> std::fmt::Debug for EventSourcedRepository<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSourcedRepository")
            .field("snapshots", &self.snapshots)
            .finish_non_exhaustive()
    }
}

impl<A: AggregateRoot> EventSourcedRepository<A> {
    /// Creates a repository that always replays full history.
    #[must_use]
    pub fn new(events: Arc<dyn EventStore>) -> Self {
        Self {
            events,
            snapshots: None,
            _aggregate: PhantomData,
        }
    }

    /// Enables snapshot-accelerated loads and policy-driven snapshot writes.
    #[must_use]
    pub fn with_snapshots(mut self, snapshots: SnapshotManager) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    /// The underlying event store.
    #[must_use]
    pub fn event_store(&self) -> &Arc<dyn EventStore> {
        &self.events
    }

    /// Persists the aggregate's uncommitted events.
    ///
    /// All buffered events are appended in one batch checked against the
    /// version the aggregate was loaded at: either every event lands or none
    /// does. On success the buffer is cleared and the version advanced; a
    /// snapshot is written afterwards when the policy says so.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` if another writer got there
    /// first (reload and retry the command), `DomainError::Serialization` if
    /// an event cannot be encoded, or the store's error. The aggregate is left
    /// untouched on error.
    #[instrument(
        skip_all,
        fields(
            aggregate_id = %aggregate.aggregate_id(),
            expected_version = aggregate.version()
        )
    )]
    pub async fn save(&self, aggregate: &mut A) -> Result<Vec<StoredEvent>, DomainError> {
        if aggregate.uncommitted_events().is_empty() {
            return Ok(Vec::new());
        }

        let aggregate_id = aggregate.aggregate_id();
        let expected_version = aggregate.version();
        let new_events = aggregate
            .uncommitted_events()
            .iter()
            .map(|event| event.to_new_event(A::AGGREGATE_TYPE))
            .collect::<Result<Vec<NewEvent>, DomainError>>()?;

        let stored = self
            .events
            .append_events(aggregate_id, expected_version, new_events)
            .await?;

        let last_version = stored.last().map_or(expected_version, |e| e.version);
        aggregate.set_version(last_version);
        aggregate.clear_uncommitted_events();
        debug!(appended = stored.len(), version = last_version, "aggregate saved");

        if let Some(snapshots) = &self.snapshots {
            self.snapshot_if_due(snapshots, aggregate).await;
        }

        Ok(stored)
    }

    /// Loads an aggregate, starting from its snapshot when one is available.
    /// A snapshot that does not decode, or whose version is past the end of
    /// the event log, is ignored in favour of a full replay.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateNotFound` if the aggregate has no
    /// events, `DomainError::Serialization` if an event does not decode,
    /// `DomainError::Storage` if the stored versions have a gap, or the
    /// store's error.
    #[instrument(skip(self), fields(aggregate_type = A::AGGREGATE_TYPE))]
    pub async fn load(&self, aggregate_id: Uuid) -> Result<A, DomainError> {
        if let Some(mut aggregate) = self.load_from_snapshot(aggregate_id).await {
            let snapshot_version = aggregate.version();
            let tail = self
                .events
                .load_events(aggregate_id, snapshot_version + 1)
                .await?;
            if tail.is_empty()
                && self.events.aggregate_version(aggregate_id).await? < snapshot_version
            {
                warn!(
                    %aggregate_id,
                    snapshot_version,
                    "snapshot is ahead of the event log, replaying full history"
                );
            } else {
                replay_stored(&mut aggregate, &tail)?;
                debug!(
                    replayed = tail.len(),
                    version = aggregate.version(),
                    "aggregate loaded from snapshot"
                );
                return Ok(aggregate);
            }
        }

        let history = self.events.load_events(aggregate_id, 1).await?;
        if history.is_empty() {
            return Err(DomainError::AggregateNotFound(aggregate_id));
        }
        let mut aggregate = A::empty(aggregate_id);
        replay_stored(&mut aggregate, &history)?;
        debug!(replayed = history.len(), "aggregate loaded from full history");
        Ok(aggregate)
    }

    /// Returns `true` if the aggregate has at least one event.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn exists(&self, aggregate_id: Uuid) -> Result<bool, DomainError> {
        Ok(self.events.aggregate_version(aggregate_id).await? > 0)
    }

    async fn load_from_snapshot(&self, aggregate_id: Uuid) -> Option<A> {
        let snapshots = self.snapshots.as_ref()?;
        match snapshots.load_snapshot::<A>(aggregate_id).await {
            Ok(found) => found,
            Err(err) => {
                warn!(
                    %aggregate_id,
                    error = %err,
                    "ignoring unusable snapshot, replaying full history"
                );
                None
            }
        }
    }

    async fn snapshot_if_due(&self, snapshots: &SnapshotManager, aggregate: &A) {
        let outcome = match snapshots.should_take_snapshot(aggregate).await {
            Ok(true) => snapshots.save_snapshot(aggregate).await,
            Ok(false) => Ok(()),
            Err(err) => Err(err),
        };
        if let Err(err) = outcome {
            warn!(aggregate_id = %aggregate.aggregate_id(), error = %err, "snapshot write failed");
        }
    }
}

/// Decodes and applies stored events, checking they continue the
/// aggregate's version without gaps.
///
/// # Errors
///
/// Returns `DomainError::Storage` on a version gap or
/// `DomainError::Serialization` if an event does not decode.
pub fn replay_stored<A: AggregateRoot>(
    aggregate: &mut A,
    stored: &[StoredEvent],
) -> Result<(), DomainError> {
    for record in stored {
        let expected = aggregate.version() + 1;
        if record.version != expected {
            return Err(DomainError::Storage(format!(
                "event log of {} has a gap: expected version {expected}, found {}",
                record.aggregate_id, record.version
            )));
        }
        let event = A::Event::from_stored(record)?;
        aggregate.replay(std::iter::once(&event));
    }
    Ok(())
}
