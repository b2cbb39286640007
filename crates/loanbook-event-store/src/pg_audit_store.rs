//! `PostgreSQL` implementation of the `AuditStore` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{info, instrument};
use uuid::Uuid;

use loanbook_core::audit::{AuditEntry, AuditFilter, AuditReportRow, AuditStore};
use loanbook_core::error::DomainError;
use loanbook_core::event::ActorContext;

use crate::error::storage_error;

const SELECT_ENTRIES: &str = "SELECT id, entity_type, entity_id, event_type, \
     old_values, new_values, user_id, ip_address, user_agent, correlation_id, \
     anonymized_token, occurred_at, context \
     FROM audit_entries";

#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    entity_type: String,
    entity_id: String,
    event_type: String,
    old_values: Option<serde_json::Value>,
    new_values: Option<serde_json::Value>,
    user_id: Option<Uuid>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    correlation_id: Option<Uuid>,
    anonymized_token: Option<String>,
    occurred_at: DateTime<Utc>,
    context: serde_json::Value,
}

/// Window, ordering and limit clause whose placeholders start at `$first`.
fn window_and_limit(first: usize) -> String {
    let (since, until, limit) = (first, first + 1, first + 2);
    format!(
        "AND (${since}::timestamptz IS NULL OR occurred_at >= ${since}) \
         AND (${until}::timestamptz IS NULL OR occurred_at <= ${until}) \
         ORDER BY occurred_at DESC, id DESC \
         LIMIT ${limit}"
    )
}

impl From<AuditRow> for AuditEntry {
    fn from(row: AuditRow) -> Self {
        Self {
            id: row.id,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            event_type: row.event_type,
            old_values: row.old_values,
            new_values: row.new_values,
            actor: ActorContext {
                user_id: row.user_id,
                ip_address: row.ip_address,
                user_agent: row.user_agent,
                correlation_id: row.correlation_id,
            },
            anonymized_token: row.anonymized_token,
            occurred_at: row.occurred_at,
            context: row.context,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ReportRow {
    entity_type: String,
    event_type: String,
    event_count: i64,
    distinct_entities: i64,
    distinct_users: i64,
    first_occurrence: DateTime<Utc>,
    last_occurrence: DateTime<Utc>,
}

impl From<ReportRow> for AuditReportRow {
    fn from(row: ReportRow) -> Self {
        Self {
            entity_type: row.entity_type,
            event_type: row.event_type,
            event_count: row.event_count,
            distinct_entities: row.distinct_entities,
            distinct_users: row.distinct_users,
            first_occurrence: row.first_occurrence,
            last_occurrence: row.last_occurrence,
        }
    }
}

/// PostgreSQL-backed audit trail.
#[derive(Debug, Clone)]
pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    /// Creates a new `PgAuditStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn insert(&self, entry: AuditEntry) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO audit_entries (id, entity_type, entity_id, event_type, old_values, \
             new_values, user_id, ip_address, user_agent, correlation_id, anonymized_token, \
             occurred_at, context) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(entry.id)
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .bind(&entry.event_type)
        .bind(&entry.old_values)
        .bind(&entry.new_values)
        .bind(entry.actor.user_id)
        .bind(&entry.actor.ip_address)
        .bind(&entry.actor.user_agent)
        .bind(entry.actor.correlation_id)
        .bind(&entry.anonymized_token)
        .bind(entry.occurred_at)
        .bind(&entry.context)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn history(
        &self,
        entity_type: &str,
        entity_id: &str,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditEntry>, DomainError> {
        let rows = sqlx::query_as::<_, AuditRow>(&format!(
            "{SELECT_ENTRIES} WHERE entity_type = $1 AND entity_id = $2 {}",
            window_and_limit(3)
        ))
        .bind(entity_type)
        .bind(entity_id)
        .bind(filter.since)
        .bind(filter.until)
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(rows.into_iter().map(AuditEntry::from).collect())
    }

    async fn by_user(
        &self,
        user_id: Uuid,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditEntry>, DomainError> {
        let rows = sqlx::query_as::<_, AuditRow>(&format!(
            "{SELECT_ENTRIES} WHERE user_id = $1 {}",
            window_and_limit(2)
        ))
        .bind(user_id)
        .bind(filter.since)
        .bind(filter.until)
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(rows.into_iter().map(AuditEntry::from).collect())
    }

    #[instrument(skip(self))]
    async fn delete_by_user(&self, user_id: Uuid) -> Result<u64, DomainError> {
        let result = sqlx::query("DELETE FROM audit_entries WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        info!(removed = result.rows_affected(), "audit entries deleted");
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, token))]
    async fn anonymize_user(&self, user_id: Uuid, token: &str) -> Result<u64, DomainError> {
        let result = sqlx::query(
            "UPDATE audit_entries \
             SET user_id = NULL, ip_address = NULL, user_agent = NULL, anonymized_token = $2 \
             WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(token)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        info!(rewritten = result.rows_affected(), "audit entries anonymized");
        Ok(result.rows_affected())
    }

    async fn report(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        entity_type: Option<&str>,
    ) -> Result<Vec<AuditReportRow>, DomainError> {
        let rows = sqlx::query_as::<_, ReportRow>(
            "SELECT entity_type, event_type, \
                 COUNT(*) AS event_count, \
                 COUNT(DISTINCT entity_id) AS distinct_entities, \
                 COUNT(DISTINCT COALESCE(user_id::text, anonymized_token)) AS distinct_users, \
                 MIN(occurred_at) AS first_occurrence, \
                 MAX(occurred_at) AS last_occurrence \
             FROM audit_entries \
             WHERE occurred_at >= $1 AND occurred_at <= $2 \
               AND ($3::text IS NULL OR entity_type = $3) \
             GROUP BY entity_type, event_type \
             ORDER BY entity_type COLLATE \"C\", event_type COLLATE \"C\"",
        )
        .bind(since)
        .bind(until)
        .bind(entity_type)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(rows.into_iter().map(AuditReportRow::from).collect())
    }
}
