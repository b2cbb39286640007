//! Event store abstraction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DomainError;
use crate::event::ActorContext;

/// An event ready to be appended; the store assigns its version.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Aggregate this event belongs to.
    pub aggregate_id: Uuid,
    /// Aggregate type name, e.g. `loan_application`.
    pub aggregate_type: String,
    /// Event type name for deserialization routing.
    pub event_type: String,
    /// Serialized event payload.
    pub payload: serde_json::Value,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
    /// Actor that caused the event.
    pub actor: ActorContext,
}

impl NewEvent {
    /// Stamps the event with the version assigned by the store.
    #[must_use]
    pub fn into_stored(self, version: i64) -> StoredEvent {
        StoredEvent {
            event_id: self.event_id,
            aggregate_id: self.aggregate_id,
            aggregate_type: self.aggregate_type,
            event_type: self.event_type,
            payload: self.payload,
            version,
            occurred_at: self.occurred_at,
            actor: self.actor,
        }
    }
}

/// Stored representation of a domain event.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Aggregate this event belongs to.
    pub aggregate_id: Uuid,
    /// Aggregate type name.
    pub aggregate_type: String,
    /// Event type name for deserialization routing.
    pub event_type: String,
    /// Serialized event payload.
    pub payload: serde_json::Value,
    /// Version within the aggregate stream, gap-free from 1.
    pub version: i64,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
    /// Actor that caused the event.
    pub actor: ActorContext,
}

/// Append-only, per-aggregate ordered log of domain events.
///
/// Implementations must perform the version check and the insert inside one
/// storage transaction and keep `(aggregate_id, version)` unique. Within an
/// aggregate `occurred_at` never decreases: an event stamped earlier than its
/// predecessor is stored at the predecessor's timestamp (see
/// [`clamp_occurred_at`]).
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a single event.
    ///
    /// When `expected_version` is supplied and differs from the stored
    /// version, nothing is written and `ConcurrencyConflict` is returned.
    /// Without it the event is appended at `current + 1` unconditionally;
    /// read-modify-write callers must always pass the version they read.
    async fn append(
        &self,
        event: NewEvent,
        expected_version: Option<i64>,
    ) -> Result<StoredEvent, DomainError>;

    /// Appends several events to one aggregate in a single transaction.
    /// Event `i` lands at `expected_version + i + 1`; any mismatch writes
    /// nothing.
    async fn append_events(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: Vec<NewEvent>,
    ) -> Result<Vec<StoredEvent>, DomainError>;

    /// Loads an aggregate's events with `version >= from_version`, ordered
    /// by version ascending.
    async fn load_events(
        &self,
        aggregate_id: Uuid,
        from_version: i64,
    ) -> Result<Vec<StoredEvent>, DomainError>;

    /// All events that occurred at or after `since`, ordered by occurrence.
    async fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<StoredEvent>, DomainError>;

    /// All events of one type, ordered by occurrence.
    async fn events_by_type(&self, event_type: &str) -> Result<Vec<StoredEvent>, DomainError>;

    /// Highest version of the aggregate, or 0 when it has no events.
    async fn aggregate_version(&self, aggregate_id: Uuid) -> Result<i64, DomainError>;

    /// Clears the IP address and user agent recorded on a user's events.
    /// Returns the number of events touched.
    async fn scrub_actor_metadata(&self, user_id: Uuid) -> Result<u64, DomainError>;
}

/// Checks that a batch targets one aggregate and returns the batch size as a
/// version delta.
///
/// # Errors
///
/// Returns `DomainError::Validation` if any event belongs to another
/// aggregate.
pub fn validate_batch(aggregate_id: Uuid, events: &[NewEvent]) -> Result<i64, DomainError> {
    if let Some(stray) = events.iter().find(|e| e.aggregate_id != aggregate_id) {
        return Err(DomainError::Validation(format!(
            "event {} belongs to aggregate {}, not {aggregate_id}",
            stray.event_id, stray.aggregate_id
        )));
    }
    i64::try_from(events.len())
        .map_err(|_| DomainError::Validation("event batch too large".to_owned()))
}

/// Raises each event's `occurred_at` to at least that of the event before it,
/// starting from `latest`, the aggregate's newest stored timestamp.
pub fn clamp_occurred_at(events: &mut [NewEvent], latest: Option<DateTime<Utc>>) {
    let mut floor = latest;
    for event in events {
        if let Some(prev) = floor
            && event.occurred_at < prev
        {
            event.occurred_at = prev;
        }
        floor = Some(event.occurred_at);
    }
}
