//! Domain event abstractions.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::repository::{NewEvent, StoredEvent};

/// Who triggered an operation, threaded explicitly from the request layer
/// into event metadata and audit entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    /// Originating user, if authenticated.
    pub user_id: Option<Uuid>,
    /// Client IP address.
    pub ip_address: Option<String>,
    /// Client user agent.
    pub user_agent: Option<String>,
    /// Correlation ID linking every event and audit entry of one user action.
    pub correlation_id: Option<Uuid>,
}

impl ActorContext {
    /// An actor for background jobs and maintenance tasks.
    #[must_use]
    pub fn system() -> Self {
        Self::default()
    }

    /// An actor for an authenticated user.
    #[must_use]
    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    /// Sets the correlation ID.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Sets the client IP address and user agent.
    #[must_use]
    pub fn with_client(
        mut self,
        ip_address: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        self.ip_address = Some(ip_address.into());
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// Metadata attached to every domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Type name for deserialization routing.
    pub event_type: String,
    /// Aggregate/stream this event belongs to.
    pub aggregate_id: Uuid,
    /// Monotonically increasing version within the aggregate stream.
    pub sequence_number: i64,
    /// Actor that caused the event.
    pub actor: ActorContext,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
}

impl EventMetadata {
    /// Rebuilds metadata from a persisted record.
    #[must_use]
    pub fn from_stored(stored: &StoredEvent) -> Self {
        Self {
            event_id: stored.event_id,
            event_type: stored.event_type.clone(),
            aggregate_id: stored.aggregate_id,
            sequence_number: stored.version,
            actor: stored.actor.clone(),
            occurred_at: stored.occurred_at,
        }
    }
}

/// Trait that all domain events implement.
///
/// Each bounded context supplies a closed enumeration of event kinds wrapped
/// in an envelope carrying [`EventMetadata`]; dispatch happens by `match`.
pub trait DomainEvent: Send + Sync + Clone + std::fmt::Debug {
    /// Returns the event type name (used for serialization routing).
    fn event_type(&self) -> &'static str;

    /// Serializes the event payload to JSON.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload cannot be encoded.
    fn to_payload(&self) -> Result<serde_json::Value, DomainError>;

    /// Returns the metadata for this event.
    fn metadata(&self) -> &EventMetadata;

    /// Decodes a persisted record back into a typed event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` for unknown event types or
    /// payloads that do not match the stored type.
    fn from_stored(stored: &StoredEvent) -> Result<Self, DomainError>;

    /// Converts the event into an unversioned record for the event store.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload cannot be encoded.
    fn to_new_event(&self, aggregate_type: &str) -> Result<NewEvent, DomainError> {
        let meta = self.metadata();
        Ok(NewEvent {
            event_id: meta.event_id,
            aggregate_id: meta.aggregate_id,
            aggregate_type: aggregate_type.to_owned(),
            event_type: self.event_type().to_owned(),
            payload: self.to_payload()?,
            occurred_at: meta.occurred_at,
            actor: meta.actor.clone(),
        })
    }
}

/// Decodes a stored payload into a context's event-kind enumeration,
/// rejecting records whose stored type disagrees with the decoded variant.
///
/// # Errors
///
/// Returns `DomainError::Serialization` when decoding fails or the decoded
/// kind's type name differs from `stored.event_type`.
pub fn decode_payload<K, F>(stored: &StoredEvent, type_of: F) -> Result<K, DomainError>
where
    K: DeserializeOwned,
    F: Fn(&K) -> &'static str,
{
    let kind: K = serde_json::from_value(stored.payload.clone()).map_err(|e| {
        DomainError::Serialization(format!(
            "cannot decode {} event {} of aggregate {}: {e}",
            stored.event_type, stored.event_id, stored.aggregate_id
        ))
    })?;
    let decoded_type = type_of(&kind);
    if decoded_type != stored.event_type {
        return Err(DomainError::Serialization(format!(
            "event {} is stored as {} but decodes as {decoded_type}",
            stored.event_id, stored.event_type
        )));
    }
    Ok(kind)
}
