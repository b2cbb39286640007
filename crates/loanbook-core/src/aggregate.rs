//! Aggregate root abstraction.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::event::DomainEvent;

/// Trait for aggregate roots that reconstitute from event history.
///
/// `version` counts persisted events only. Domain methods go through
/// [`AggregateRoot::record_event`], which applies the event immediately and
/// buffers it; the repository bumps the version once the buffer is stored.
pub trait AggregateRoot: Send + Sync + Sized {
    /// The event type this aggregate produces and consumes.
    type Event: DomainEvent;

    /// Serializable state captured by snapshots.
    type Snapshot: Serialize + DeserializeOwned + Send;

    /// Stable aggregate type name used in the event and snapshot tables.
    const AGGREGATE_TYPE: &'static str;

    /// Creates an aggregate with no history at version 0.
    fn empty(id: Uuid) -> Self;

    /// Returns the aggregate identifier.
    fn aggregate_id(&self) -> Uuid;

    /// Returns the current version (number of persisted events applied).
    fn version(&self) -> i64;

    /// Overwrites the version; used by replay, snapshot restore and save.
    fn set_version(&mut self, version: i64);

    /// Apply an event to mutate internal state.
    fn apply(&mut self, event: &Self::Event);

    /// Returns uncommitted events produced by command handling.
    fn uncommitted_events(&self) -> &[Self::Event];

    /// Mutable access to the uncommitted buffer.
    fn uncommitted_events_mut(&mut self) -> &mut Vec<Self::Event>;

    /// Captures every field needed to resume from the current version.
    fn take_snapshot(&self) -> Self::Snapshot;

    /// Inverse of [`AggregateRoot::take_snapshot`].
    fn restore_from_snapshot(&mut self, snapshot: Self::Snapshot);

    /// Clears uncommitted events after persistence.
    fn clear_uncommitted_events(&mut self) {
        self.uncommitted_events_mut().clear();
    }

    /// Returns the sequence number the next recorded event will carry.
    fn next_sequence_number(&self) -> i64 {
        let pending = i64::try_from(self.uncommitted_events().len()).unwrap_or(i64::MAX);
        self.version() + pending + 1
    }

    /// Applies a freshly produced event and buffers it for persistence.
    fn record_event(&mut self, event: Self::Event) {
        self.apply(&event);
        self.uncommitted_events_mut().push(event);
    }

    /// Applies historical events without buffering them, one version each.
    fn replay<'a, I>(&mut self, events: I)
    where
        I: IntoIterator<Item = &'a Self::Event>,
        Self::Event: 'a,
    {
        for event in events {
            self.apply(event);
            self.set_version(self.version() + 1);
        }
    }

    /// Rebuilds an aggregate from its version-ordered history.
    fn reconstitute_from_history(id: Uuid, events: &[Self::Event]) -> Self {
        let mut aggregate = Self::empty(id);
        aggregate.replay(events);
        aggregate
    }
}

/// Replays `events` in order while `occurred_at <= cutoff` and stops at the
/// first later event. Returns `None` if no event qualifies.
///
/// Pure function of its inputs: the same history and cutoff always yield the
/// same state.
pub fn replay_until<A: AggregateRoot>(
    id: Uuid,
    events: &[A::Event],
    cutoff: DateTime<Utc>,
) -> Option<A> {
    let applicable: Vec<&A::Event> = events
        .iter()
        .take_while(|e| e.metadata().occurred_at <= cutoff)
        .collect();
    if applicable.is_empty() {
        return None;
    }
    let mut aggregate = A::empty(id);
    aggregate.replay(applicable);
    Some(aggregate)
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    use super::*;
    use crate::error::DomainError;
    use crate::event::{ActorContext, EventMetadata, decode_payload};
    use crate::repository::StoredEvent;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub(crate) enum TallyEventKind {
        Added(i64),
        Reset,
    }

    #[derive(Debug, Clone)]
    pub(crate) struct TallyEvent {
        pub metadata: EventMetadata,
        pub kind: TallyEventKind,
    }

    fn tally_event_type(kind: &TallyEventKind) -> &'static str {
        match kind {
            TallyEventKind::Added(_) => "tally.added",
            TallyEventKind::Reset => "tally.reset",
        }
    }

    impl DomainEvent for TallyEvent {
        fn event_type(&self) -> &'static str {
            tally_event_type(&self.kind)
        }

        fn to_payload(&self) -> Result<serde_json::Value, DomainError> {
            Ok(serde_json::to_value(&self.kind)?)
        }

        fn metadata(&self) -> &EventMetadata {
            &self.metadata
        }

        fn from_stored(stored: &StoredEvent) -> Result<Self, DomainError> {
            Ok(Self {
                metadata: EventMetadata::from_stored(stored),
                kind: decode_payload(stored, tally_event_type)?,
            })
        }
    }

    /// Minimal aggregate used by the engine's unit tests.
    #[derive(Debug)]
    pub(crate) struct Tally {
        pub id: Uuid,
        pub version: i64,
        pub total: i64,
        uncommitted: Vec<TallyEvent>,
    }

    impl Tally {
        pub fn add(&mut self, amount: i64, at: chrono::DateTime<Utc>) {
            let kind = TallyEventKind::Added(amount);
            let event = TallyEvent {
                metadata: EventMetadata {
                    event_id: Uuid::new_v4(),
                    event_type: tally_event_type(&kind).to_owned(),
                    aggregate_id: self.id,
                    sequence_number: self.next_sequence_number(),
                    actor: ActorContext::system(),
                    occurred_at: at,
                },
                kind,
            };
            self.record_event(event);
        }
    }

    impl AggregateRoot for Tally {
        type Event = TallyEvent;
        type Snapshot = i64;

        const AGGREGATE_TYPE: &'static str = "tally";

        fn empty(id: Uuid) -> Self {
            Self {
                id,
                version: 0,
                total: 0,
                uncommitted: Vec::new(),
            }
        }

        fn aggregate_id(&self) -> Uuid {
            self.id
        }

        fn version(&self) -> i64 {
            self.version
        }

        fn set_version(&mut self, version: i64) {
            self.version = version;
        }

        fn apply(&mut self, event: &Self::Event) {
            match &event.kind {
                TallyEventKind::Added(amount) => self.total += amount,
                TallyEventKind::Reset => self.total = 0,
            }
        }

        fn uncommitted_events(&self) -> &[Self::Event] {
            &self.uncommitted
        }

        fn uncommitted_events_mut(&mut self) -> &mut Vec<Self::Event> {
            &mut self.uncommitted
        }

        fn take_snapshot(&self) -> Self::Snapshot {
            self.total
        }

        fn restore_from_snapshot(&mut self, snapshot: Self::Snapshot) {
            self.total = snapshot;
        }
    }

    #[test]
    fn test_record_event_applies_immediately_without_bumping_version() {
        // Arrange
        let at = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let mut tally = Tally::empty(Uuid::new_v4());

        // Act
        tally.add(5, at);
        tally.add(7, at);

        // Assert
        assert_eq!(tally.total, 12);
        assert_eq!(tally.version(), 0);
        assert_eq!(tally.uncommitted_events().len(), 2);
        assert_eq!(tally.uncommitted_events()[0].metadata.sequence_number, 1);
        assert_eq!(tally.uncommitted_events()[1].metadata.sequence_number, 2);
    }

    #[test]
    fn test_reconstitute_from_history_counts_versions_and_buffers_nothing() {
        // Arrange
        let id = Uuid::new_v4();
        let at = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let mut source = Tally::empty(id);
        source.add(3, at);
        source.add(4, at);
        let history = source.uncommitted_events().to_vec();

        // Act
        let rebuilt = Tally::reconstitute_from_history(id, &history);

        // Assert
        assert_eq!(rebuilt.version(), 2);
        assert_eq!(rebuilt.total, source.total);
        assert!(rebuilt.uncommitted_events().is_empty());
    }

    #[test]
    fn test_replay_until_stops_at_first_event_past_cutoff() {
        // Arrange
        let id = Uuid::new_v4();
        let start = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let mut source = Tally::empty(id);
        source.add(1, start);
        source.add(10, start + Duration::hours(1));
        source.add(100, start + Duration::hours(2));
        let history = source.uncommitted_events().to_vec();

        // Act
        let before = replay_until::<Tally>(id, &history, start - Duration::seconds(1));
        let middle = replay_until::<Tally>(id, &history, start + Duration::hours(1));
        let after = replay_until::<Tally>(id, &history, start + Duration::days(1));

        // Assert
        assert!(before.is_none());
        let middle = middle.unwrap();
        assert_eq!(middle.total, 11);
        assert_eq!(middle.version(), 2);
        assert_eq!(after.unwrap().total, 111);
    }

    #[test]
    fn test_replay_until_is_deterministic() {
        let id = Uuid::new_v4();
        let start = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let mut source = Tally::empty(id);
        source.add(2, start);
        source.add(3, start + Duration::minutes(5));
        let history = source.uncommitted_events().to_vec();
        let cutoff = start + Duration::minutes(1);

        let first = replay_until::<Tally>(id, &history, cutoff).unwrap();
        let second = replay_until::<Tally>(id, &history, cutoff).unwrap();

        assert_eq!(first.total, second.total);
        assert_eq!(first.version(), second.version());
    }
}
