//! `PostgreSQL` implementation of the `EventStore` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use loanbook_core::error::DomainError;
use loanbook_core::event::ActorContext;
use loanbook_core::repository::{
    EventStore, NewEvent, StoredEvent, clamp_occurred_at, validate_batch,
};

use crate::error::{is_unique_violation, storage_error};

const SELECT_EVENTS: &str = "SELECT event_id, aggregate_id, aggregate_type, event_type, payload, \
     version, occurred_at, user_id, ip_address, user_agent, correlation_id \
     FROM domain_events";

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    event_id: Uuid,
    aggregate_id: Uuid,
    aggregate_type: String,
    event_type: String,
    payload: serde_json::Value,
    version: i64,
    occurred_at: DateTime<Utc>,
    user_id: Option<Uuid>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    correlation_id: Option<Uuid>,
}

impl From<EventRow> for StoredEvent {
    fn from(row: EventRow) -> Self {
        Self {
            event_id: row.event_id,
            aggregate_id: row.aggregate_id,
            aggregate_type: row.aggregate_type,
            event_type: row.event_type,
            payload: row.payload,
            version: row.version,
            occurred_at: row.occurred_at,
            actor: ActorContext {
                user_id: row.user_id,
                ip_address: row.ip_address,
                user_agent: row.user_agent,
                correlation_id: row.correlation_id,
            },
        }
    }
}

/// PostgreSQL-backed event store.
///
/// Appends take a transaction-scoped advisory lock on the aggregate before
/// reading its version, so concurrent writers to one aggregate serialize
/// while writers to different aggregates proceed in parallel. The
/// `(aggregate_id, version)` unique constraint backs this up. The latest
/// `occurred_at` is read under the same lock, and a lagging timestamp is
/// raised to it.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Creates a new `PgEventStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn append_batch(
        &self,
        aggregate_id: Uuid,
        expected_version: Option<i64>,
        mut events: Vec<NewEvent>,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        lock_stream(&mut tx, aggregate_id).await?;
        let (current, latest) = stream_head(&mut tx, aggregate_id).await?;
        if let Some(expected) = expected_version
            && expected != current
        {
            debug!(expected, actual = current, "stale expected version");
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual: current,
            });
        }

        clamp_occurred_at(&mut events, latest);
        let mut stored = Vec::with_capacity(events.len());
        for (event, version) in events.into_iter().zip(current + 1..) {
            if let Err(err) = insert_event(&mut tx, &event, version).await {
                if is_unique_violation(&err) {
                    drop(tx);
                    let actual = self.aggregate_version(aggregate_id).await?;
                    warn!(%aggregate_id, version, actual, "version already taken");
                    return Err(DomainError::ConcurrencyConflict {
                        aggregate_id,
                        expected: expected_version.unwrap_or(current),
                        actual,
                    });
                }
                return Err(storage_error(err));
            }
            stored.push(event.into_stored(version));
        }

        tx.commit().await.map_err(storage_error)?;
        Ok(stored)
    }

    async fn fetch(&self, sql: &str, bind: Bind<'_>) -> Result<Vec<StoredEvent>, DomainError> {
        let query = sqlx::query_as::<_, EventRow>(sql);
        let query = match bind {
            Bind::Stream(aggregate_id, from_version) => query.bind(aggregate_id).bind(from_version),
            Bind::Since(since) => query.bind(since),
            Bind::Type(event_type) => query.bind(event_type),
        };
        let rows = query.fetch_all(&self.pool).await.map_err(storage_error)?;
        Ok(rows.into_iter().map(StoredEvent::from).collect())
    }
}

enum Bind<'a> {
    Stream(Uuid, i64),
    Since(DateTime<Utc>),
    Type(&'a str),
}

async fn lock_stream(conn: &mut PgConnection, aggregate_id: Uuid) -> Result<(), DomainError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended(($1::uuid)::text, 0))")
        .bind(aggregate_id)
        .execute(conn)
        .await
        .map_err(storage_error)?;
    Ok(())
}

async fn current_version(conn: &mut PgConnection, aggregate_id: Uuid) -> Result<i64, DomainError> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COALESCE(MAX(version), 0) FROM domain_events WHERE aggregate_id = $1",
    )
    .bind(aggregate_id)
    .fetch_one(conn)
    .await
    .map_err(storage_error)
}

async fn stream_head(
    conn: &mut PgConnection,
    aggregate_id: Uuid,
) -> Result<(i64, Option<DateTime<Utc>>), DomainError> {
    sqlx::query_as::<_, (i64, Option<DateTime<Utc>>)>(
        "SELECT COALESCE(MAX(version), 0), MAX(occurred_at) \
         FROM domain_events WHERE aggregate_id = $1",
    )
    .bind(aggregate_id)
    .fetch_one(conn)
    .await
    .map_err(storage_error)
}

async fn insert_event(
    conn: &mut PgConnection,
    event: &NewEvent,
    version: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO domain_events (event_id, aggregate_id, aggregate_type, event_type, payload, \
         version, occurred_at, user_id, ip_address, user_agent, correlation_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(event.event_id)
    .bind(event.aggregate_id)
    .bind(&event.aggregate_type)
    .bind(&event.event_type)
    .bind(&event.payload)
    .bind(version)
    .bind(event.occurred_at)
    .bind(event.actor.user_id)
    .bind(&event.actor.ip_address)
    .bind(&event.actor.user_agent)
    .bind(event.actor.correlation_id)
    .execute(conn)
    .await?;
    Ok(())
}

#[async_trait]
impl EventStore for PgEventStore {
    #[instrument(
        skip(self, event),
        fields(aggregate_id = %event.aggregate_id, event_type = %event.event_type)
    )]
    async fn append(
        &self,
        event: NewEvent,
        expected_version: Option<i64>,
    ) -> Result<StoredEvent, DomainError> {
        let aggregate_id = event.aggregate_id;
        self.append_batch(aggregate_id, expected_version, vec![event])
            .await?
            .pop()
            .ok_or_else(|| DomainError::Storage("append stored no event".to_owned()))
    }

    #[instrument(skip(self, events), fields(count = events.len()))]
    async fn append_events(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: Vec<NewEvent>,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        validate_batch(aggregate_id, &events)?;
        self.append_batch(aggregate_id, Some(expected_version), events)
            .await
    }

    async fn load_events(
        &self,
        aggregate_id: Uuid,
        from_version: i64,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        self.fetch(
            &format!("{SELECT_EVENTS} WHERE aggregate_id = $1 AND version >= $2 ORDER BY version"),
            Bind::Stream(aggregate_id, from_version),
        )
        .await
    }

    async fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<StoredEvent>, DomainError> {
        self.fetch(
            &format!(
                "{SELECT_EVENTS} WHERE occurred_at >= $1 \
                 ORDER BY occurred_at, aggregate_id, version"
            ),
            Bind::Since(since),
        )
        .await
    }

    async fn events_by_type(&self, event_type: &str) -> Result<Vec<StoredEvent>, DomainError> {
        self.fetch(
            &format!(
                "{SELECT_EVENTS} WHERE event_type = $1 ORDER BY occurred_at, aggregate_id, version"
            ),
            Bind::Type(event_type),
        )
        .await
    }

    async fn aggregate_version(&self, aggregate_id: Uuid) -> Result<i64, DomainError> {
        let mut conn = self.pool.acquire().await.map_err(storage_error)?;
        current_version(&mut conn, aggregate_id).await
    }

    #[instrument(skip(self))]
    async fn scrub_actor_metadata(&self, user_id: Uuid) -> Result<u64, DomainError> {
        let result = sqlx::query(
            "UPDATE domain_events SET ip_address = NULL, user_agent = NULL WHERE user_id = $1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(result.rows_affected())
    }
}
