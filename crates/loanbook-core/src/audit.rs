//! Audit trail: an append-only record of who did what, separate from the
//! event log, plus point-in-time reconstruction of aggregate state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::aggregate::{AggregateRoot, replay_until};
use crate::clock::Clock;
use crate::error::DomainError;
use crate::event::{ActorContext, DomainEvent};
use crate::repository::EventStore;

/// An audit entry as submitted by a caller; the service stamps id and time.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    /// Kind of entity touched, e.g. `loan_application` or `command`.
    pub entity_type: String,
    /// Identifier of the entity touched.
    pub entity_id: String,
    /// What happened.
    pub event_type: String,
    /// State before the change, when known.
    pub old_values: Option<serde_json::Value>,
    /// State after the change, when known.
    pub new_values: Option<serde_json::Value>,
    /// Who did it.
    pub actor: ActorContext,
    /// Free-form structured context.
    pub context: serde_json::Value,
}

impl AuditRecord {
    /// Creates a record with no value changes and empty context.
    #[must_use]
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        event_type: impl Into<String>,
        actor: ActorContext,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            event_type: event_type.into(),
            old_values: None,
            new_values: None,
            actor,
            context: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Attaches before/after values.
    #[must_use]
    pub fn with_changes(
        mut self,
        old_values: Option<serde_json::Value>,
        new_values: Option<serde_json::Value>,
    ) -> Self {
        self.old_values = old_values;
        self.new_values = new_values;
        self
    }

    /// Attaches structured context.
    #[must_use]
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

/// A persisted audit entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    /// Entry identifier.
    pub id: Uuid,
    /// Kind of entity touched.
    pub entity_type: String,
    /// Identifier of the entity touched.
    pub entity_id: String,
    /// What happened.
    pub event_type: String,
    /// State before the change.
    pub old_values: Option<serde_json::Value>,
    /// State after the change.
    pub new_values: Option<serde_json::Value>,
    /// Who did it; identifying fields are cleared by anonymization.
    pub actor: ActorContext,
    /// Replaces the user id after anonymization.
    pub anonymized_token: Option<String>,
    /// When it happened.
    pub occurred_at: DateTime<Utc>,
    /// Free-form structured context.
    pub context: serde_json::Value,
}

impl AuditEntry {
    /// Stable identity of the acting subject, surviving anonymization.
    #[must_use]
    pub fn subject(&self) -> Option<String> {
        self.actor
            .user_id
            .map(|id| id.to_string())
            .or_else(|| self.anonymized_token.clone())
    }
}

/// Time window and size limit for audit lookups. Bounds are inclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditFilter {
    /// Earliest occurrence.
    pub since: Option<DateTime<Utc>>,
    /// Latest occurrence.
    pub until: Option<DateTime<Utc>>,
    /// Maximum number of entries.
    pub limit: Option<i64>,
}

impl AuditFilter {
    /// Returns `true` if `at` falls inside the window.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.since.is_none_or(|since| at >= since) && self.until.is_none_or(|until| at <= until)
    }
}

/// One line of an audit report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReportRow {
    /// Entity type of the group.
    pub entity_type: String,
    /// Event type of the group.
    pub event_type: String,
    /// Number of entries.
    pub event_count: i64,
    /// Number of distinct entity ids.
    pub distinct_entities: i64,
    /// Number of distinct acting subjects.
    pub distinct_users: i64,
    /// Earliest occurrence in the group.
    pub first_occurrence: DateTime<Utc>,
    /// Latest occurrence in the group.
    pub last_occurrence: DateTime<Utc>,
}

/// Groups entries by `(entity_type, event_type)`, ordered by those keys.
#[must_use]
pub fn summarize(entries: &[AuditEntry]) -> Vec<AuditReportRow> {
    struct Group {
        count: i64,
        entities: BTreeSet<String>,
        users: BTreeSet<String>,
        first: DateTime<Utc>,
        last: DateTime<Utc>,
    }

    let mut groups: BTreeMap<(String, String), Group> = BTreeMap::new();
    for entry in entries {
        let group = groups
            .entry((entry.entity_type.clone(), entry.event_type.clone()))
            .or_insert_with(|| Group {
                count: 0,
                entities: BTreeSet::new(),
                users: BTreeSet::new(),
                first: entry.occurred_at,
                last: entry.occurred_at,
            });
        group.count += 1;
        group.entities.insert(entry.entity_id.clone());
        if let Some(subject) = entry.subject() {
            group.users.insert(subject);
        }
        group.first = group.first.min(entry.occurred_at);
        group.last = group.last.max(entry.occurred_at);
    }

    groups
        .into_iter()
        .map(|((entity_type, event_type), g)| AuditReportRow {
            entity_type,
            event_type,
            event_count: g.count,
            distinct_entities: i64::try_from(g.entities.len()).unwrap_or(i64::MAX),
            distinct_users: i64::try_from(g.users.len()).unwrap_or(i64::MAX),
            first_occurrence: g.first,
            last_occurrence: g.last,
        })
        .collect()
}

/// Storage for audit entries.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Inserts one entry.
    async fn insert(&self, entry: AuditEntry) -> Result<(), DomainError>;

    /// Entries for one entity, newest first.
    async fn history(
        &self,
        entity_type: &str,
        entity_id: &str,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditEntry>, DomainError>;

    /// Entries recorded for one user, newest first.
    async fn by_user(
        &self,
        user_id: Uuid,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditEntry>, DomainError>;

    /// Hard-deletes a user's entries. Returns the number removed.
    async fn delete_by_user(&self, user_id: Uuid) -> Result<u64, DomainError>;

    /// Replaces a user's identifying fields with `token`. Returns the number
    /// of entries rewritten.
    async fn anonymize_user(&self, user_id: Uuid, token: &str) -> Result<u64, DomainError>;

    /// Report rows for entries inside `[since, until]`.
    async fn report(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        entity_type: Option<&str>,
    ) -> Result<Vec<AuditReportRow>, DomainError>;
}

/// State of an aggregate as of a past instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointInTimeState<S> {
    /// Aggregate type.
    pub entity_type: String,
    /// Aggregate identifier.
    pub entity_id: Uuid,
    /// Requested instant.
    pub as_of: DateTime<Utc>,
    /// Number of events applied.
    pub version: i64,
    /// Occurrence of the last applied event.
    pub last_event_at: DateTime<Utc>,
    /// Snapshot of the reconstructed state.
    pub state: S,
}

/// Best-effort audit recording plus compliance and forensic queries.
#[derive(Clone)]
pub struct AuditService {
    store: Arc<dyn AuditStore>,
    events: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    anonymization_salt: String,
}

impl std::fmt::Debug for AuditService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditService").finish_non_exhaustive()
    }
}

impl AuditService {
    /// Creates a new `AuditService`.
    #[must_use]
    pub fn new(
        store: Arc<dyn AuditStore>,
        events: Arc<dyn EventStore>,
        clock: Arc<dyn Clock>,
        anonymization_salt: impl Into<String>,
    ) -> Self {
        Self {
            store,
            events,
            clock,
            anonymization_salt: anonymization_salt.into(),
        }
    }

    /// Records an entry. Failures are logged and swallowed so that auditing
    /// never fails the caller's operation.
    pub async fn record_audit_entry(&self, record: AuditRecord) {
        let entry = AuditEntry {
            id: Uuid::now_v7(),
            entity_type: record.entity_type,
            entity_id: record.entity_id,
            event_type: record.event_type,
            old_values: record.old_values,
            new_values: record.new_values,
            actor: record.actor,
            anonymized_token: None,
            occurred_at: self.clock.now(),
            context: record.context,
        };
        let (entity_type, entity_id, event_type) =
            (entry.entity_type.clone(), entry.entity_id.clone(), entry.event_type.clone());
        if let Err(err) = self.store.insert(entry).await {
            warn!(
                %entity_type,
                %entity_id,
                %event_type,
                error = %err,
                "failed to record audit entry"
            );
        }
    }

    /// Audit history of one entity, newest first.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn get_audit_history(
        &self,
        entity_type: &str,
        entity_id: &str,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditEntry>, DomainError> {
        self.store.history(entity_type, entity_id, filter).await
    }

    /// Everything recorded for a user, for subject-access requests.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn get_audit_by_user(
        &self,
        user_id: Uuid,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditEntry>, DomainError> {
        self.store.by_user(user_id, filter).await
    }

    /// Hard-deletes a user's audit entries.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    #[instrument(skip(self))]
    pub async fn delete_user_audit_data(&self, user_id: Uuid) -> Result<u64, DomainError> {
        self.store.delete_by_user(user_id).await
    }

    /// Replaces a user's identifying fields with a stable token, keeping the
    /// entries for statistics.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    #[instrument(skip(self))]
    pub async fn anonymize_user_audit_data(&self, user_id: Uuid) -> Result<u64, DomainError> {
        let token = self.anonymized_token(user_id);
        self.store.anonymize_user(user_id, &token).await
    }

    /// The token that replaces `user_id` after anonymization: stable for a
    /// given salt, not reversible.
    #[must_use]
    pub fn anonymized_token(&self, user_id: Uuid) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.anonymization_salt.as_bytes());
        hasher.update(user_id.as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
        format!("anon-{hex}")
    }

    /// Reconstructs an aggregate as it stood at `point_in_time` by replaying
    /// its events up to and including that instant. Returns `None` when the
    /// aggregate had no events yet.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if an event up to the cutoff does
    /// not decode, or the event store's error. Later events are not decoded.
    #[instrument(skip(self), fields(entity_type = A::AGGREGATE_TYPE))]
    pub async fn reconstruct_entity_state<A: AggregateRoot>(
        &self,
        entity_id: Uuid,
        point_in_time: DateTime<Utc>,
    ) -> Result<Option<PointInTimeState<A::Snapshot>>, DomainError> {
        let stored = self.events.load_events(entity_id, 1).await?;
        let history = stored
            .iter()
            .take_while(|record| record.occurred_at <= point_in_time)
            .map(A::Event::from_stored)
            .collect::<Result<Vec<_>, _>>()?;

        let Some(aggregate) = replay_until::<A>(entity_id, &history, point_in_time) else {
            return Ok(None);
        };
        let applied = usize::try_from(aggregate.version()).unwrap_or(0);
        let last_event_at = history
            .get(applied.saturating_sub(1))
            .map_or(point_in_time, |e| e.metadata().occurred_at);

        Ok(Some(PointInTimeState {
            entity_type: A::AGGREGATE_TYPE.to_owned(),
            entity_id,
            as_of: point_in_time,
            version: aggregate.version(),
            last_event_at,
            state: aggregate.take_snapshot(),
        }))
    }

    /// Counts grouped by entity type and event type for a reporting window.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn generate_audit_report(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        entity_type: Option<&str>,
    ) -> Result<Vec<AuditReportRow>, DomainError> {
        self.store.report(since, until, entity_type).await
    }
}
