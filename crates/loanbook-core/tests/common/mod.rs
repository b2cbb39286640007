//! Shared test aggregate for engine integration tests.
#![allow(dead_code)]

use loanbook_core::aggregate::AggregateRoot;
use loanbook_core::clock::Clock;
use loanbook_core::error::DomainError;
use loanbook_core::event::{ActorContext, DomainEvent, EventMetadata, decode_payload};
use loanbook_core::repository::StoredEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const COUNTER_INCREMENTED: &str = "counter.incremented";
pub const COUNTER_LABELLED: &str = "counter.labelled";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CounterEventKind {
    Incremented { by: i64 },
    Labelled { label: String },
}

fn type_of(kind: &CounterEventKind) -> &'static str {
    match kind {
        CounterEventKind::Incremented { .. } => COUNTER_INCREMENTED,
        CounterEventKind::Labelled { .. } => COUNTER_LABELLED,
    }
}

#[derive(Debug, Clone)]
pub struct CounterEvent {
    pub metadata: EventMetadata,
    pub kind: CounterEventKind,
}

impl DomainEvent for CounterEvent {
    fn event_type(&self) -> &'static str {
        type_of(&self.kind)
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
            kind: decode_payload(stored, type_of)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub total: i64,
    pub label: Option<String>,
}

#[derive(Debug)]
pub struct Counter {
    pub id: Uuid,
    pub version: i64,
    pub total: i64,
    pub label: Option<String>,
    uncommitted: Vec<CounterEvent>,
}

impl Counter {
    fn record(&mut self, kind: CounterEventKind, actor: &ActorContext, clock: &dyn Clock) {
        let event = CounterEvent {
            metadata: EventMetadata {
                event_id: Uuid::new_v4(),
                event_type: type_of(&kind).to_owned(),
                aggregate_id: self.id,
                sequence_number: self.next_sequence_number(),
                actor: actor.clone(),
                occurred_at: clock.now(),
            },
            kind,
        };
        self.record_event(event);
    }

    pub fn increment(&mut self, by: i64, actor: &ActorContext, clock: &dyn Clock) {
        self.record(CounterEventKind::Incremented { by }, actor, clock);
    }

    pub fn label(&mut self, label: &str, actor: &ActorContext, clock: &dyn Clock) {
        self.record(
            CounterEventKind::Labelled {
                label: label.to_owned(),
            },
            actor,
            clock,
        );
    }
}

impl AggregateRoot for Counter {
    type Event = CounterEvent;
    type Snapshot = CounterSnapshot;

    const AGGREGATE_TYPE: &'static str = "counter";

    fn empty(id: Uuid) -> Self {
        Self {
            id,
            version: 0,
            total: 0,
            label: None,
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
            CounterEventKind::Incremented { by } => self.total += by,
            CounterEventKind::Labelled { label } => self.label = Some(label.clone()),
        }
    }

    fn uncommitted_events(&self) -> &[Self::Event] {
        &self.uncommitted
    }

    fn uncommitted_events_mut(&mut self) -> &mut Vec<Self::Event> {
        &mut self.uncommitted
    }

    fn take_snapshot(&self) -> Self::Snapshot {
        CounterSnapshot {
            total: self.total,
            label: self.label.clone(),
        }
    }

    fn restore_from_snapshot(&mut self, snapshot: Self::Snapshot) {
        self.total = snapshot.total;
        self.label = snapshot.label;
    }
}
