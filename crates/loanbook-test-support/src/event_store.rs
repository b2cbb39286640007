//! Test event stores — in-memory and failing `EventStore` implementations.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loanbook_core::error::DomainError;
use loanbook_core::repository::{
    EventStore, NewEvent, StoredEvent, clamp_occurred_at, validate_batch,
};
use uuid::Uuid;

/// An event store backed by a `Vec`. Every operation runs under one lock, so
/// the version check and insert are atomic just like the database
/// transaction.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: Mutex<Vec<StoredEvent>>,
}

impl InMemoryEventStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every stored event in insertion order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn all_events(&self) -> Vec<StoredEvent> {
        self.events.lock().unwrap().clone()
    }

    fn current_version(events: &[StoredEvent], aggregate_id: Uuid) -> i64 {
        events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max()
            .unwrap_or(0)
    }

    fn latest_occurrence(events: &[StoredEvent], aggregate_id: Uuid) -> Option<DateTime<Utc>> {
        events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .map(|e| e.occurred_at)
            .max()
    }

    fn sorted_by_occurrence(mut events: Vec<StoredEvent>) -> Vec<StoredEvent> {
        events.sort_by(|a, b| {
            a.occurred_at
                .cmp(&b.occurred_at)
                .then(a.aggregate_id.cmp(&b.aggregate_id))
                .then(a.version.cmp(&b.version))
        });
        events
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        mut event: NewEvent,
        expected_version: Option<i64>,
    ) -> Result<StoredEvent, DomainError> {
        let mut events = self.events.lock().unwrap();
        let current = Self::current_version(&events, event.aggregate_id);
        if let Some(expected) = expected_version
            && expected != current
        {
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id: event.aggregate_id,
                expected,
                actual: current,
            });
        }
        let latest = Self::latest_occurrence(&events, event.aggregate_id);
        clamp_occurred_at(std::slice::from_mut(&mut event), latest);
        let stored = event.into_stored(current + 1);
        events.push(stored.clone());
        Ok(stored)
    }

    async fn append_events(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        mut new_events: Vec<NewEvent>,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        validate_batch(aggregate_id, &new_events)?;
        let mut events = self.events.lock().unwrap();
        let current = Self::current_version(&events, aggregate_id);
        if current != expected_version {
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual: current,
            });
        }
        clamp_occurred_at(&mut new_events, Self::latest_occurrence(&events, aggregate_id));
        let stored: Vec<StoredEvent> = new_events
            .into_iter()
            .zip(current + 1..)
            .map(|(event, version)| event.into_stored(version))
            .collect();
        events.extend(stored.iter().cloned());
        Ok(stored)
    }

    async fn load_events(
        &self,
        aggregate_id: Uuid,
        from_version: i64,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        let mut loaded: Vec<StoredEvent> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id && e.version >= from_version)
            .cloned()
            .collect();
        loaded.sort_by_key(|e| e.version);
        Ok(loaded)
    }

    async fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<StoredEvent>, DomainError> {
        let matching = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.occurred_at >= since)
            .cloned()
            .collect();
        Ok(Self::sorted_by_occurrence(matching))
    }

    async fn events_by_type(&self, event_type: &str) -> Result<Vec<StoredEvent>, DomainError> {
        let matching = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect();
        Ok(Self::sorted_by_occurrence(matching))
    }

    async fn aggregate_version(&self, aggregate_id: Uuid) -> Result<i64, DomainError> {
        Ok(Self::current_version(&self.events.lock().unwrap(), aggregate_id))
    }

    async fn scrub_actor_metadata(&self, user_id: Uuid) -> Result<u64, DomainError> {
        let mut touched = 0;
        for event in self
            .events
            .lock()
            .unwrap()
            .iter_mut()
            .filter(|e| e.actor.user_id == Some(user_id))
        {
            event.actor.ip_address = None;
            event.actor.user_agent = None;
            touched += 1;
        }
        Ok(touched)
    }
}

/// An event store that always returns a storage error. Useful for testing
/// error-handling paths.
#[derive(Debug)]
pub struct FailingEventStore;

fn connection_refused() -> DomainError {
    DomainError::Storage("connection refused".into())
}

#[async_trait]
impl EventStore for FailingEventStore {
    async fn append(
        &self,
        _event: NewEvent,
        _expected_version: Option<i64>,
    ) -> Result<StoredEvent, DomainError> {
        Err(connection_refused())
    }

    async fn append_events(
        &self,
        _aggregate_id: Uuid,
        _expected_version: i64,
        _events: Vec<NewEvent>,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        Err(connection_refused())
    }

    async fn load_events(
        &self,
        _aggregate_id: Uuid,
        _from_version: i64,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        Err(connection_refused())
    }

    async fn events_since(&self, _since: DateTime<Utc>) -> Result<Vec<StoredEvent>, DomainError> {
        Err(connection_refused())
    }

    async fn events_by_type(&self, _event_type: &str) -> Result<Vec<StoredEvent>, DomainError> {
        Err(connection_refused())
    }

    async fn aggregate_version(&self, _aggregate_id: Uuid) -> Result<i64, DomainError> {
        Err(connection_refused())
    }

    async fn scrub_actor_metadata(&self, _user_id: Uuid) -> Result<u64, DomainError> {
        Err(connection_refused())
    }
}
