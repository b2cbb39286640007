//! Test audit stores — in-memory and failing `AuditStore` implementations.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loanbook_core::audit::{AuditEntry, AuditFilter, AuditReportRow, AuditStore, summarize};
use loanbook_core::error::DomainError;
use uuid::Uuid;

/// An audit store backed by a `Vec`.
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every entry in insertion order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }

    fn select<F>(&self, filter: &AuditFilter, predicate: F) -> Vec<AuditEntry>
    where
        F: Fn(&AuditEntry) -> bool,
    {
        let mut selected: Vec<AuditEntry> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| predicate(e) && filter.contains(e.occurred_at))
            .cloned()
            .collect();
        selected.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        if let Some(limit) = filter.limit {
            selected.truncate(usize::try_from(limit).unwrap_or(0));
        }
        selected
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn insert(&self, entry: AuditEntry) -> Result<(), DomainError> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }

    async fn history(
        &self,
        entity_type: &str,
        entity_id: &str,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditEntry>, DomainError> {
        Ok(self.select(filter, |e| {
            e.entity_type == entity_type && e.entity_id == entity_id
        }))
    }

    async fn by_user(
        &self,
        user_id: Uuid,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditEntry>, DomainError> {
        Ok(self.select(filter, |e| e.actor.user_id == Some(user_id)))
    }

    async fn delete_by_user(&self, user_id: Uuid) -> Result<u64, DomainError> {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|e| e.actor.user_id != Some(user_id));
        Ok(u64::try_from(before - entries.len()).unwrap_or(u64::MAX))
    }

    async fn anonymize_user(&self, user_id: Uuid, token: &str) -> Result<u64, DomainError> {
        let mut rewritten = 0;
        for entry in self
            .entries
            .lock()
            .unwrap()
            .iter_mut()
            .filter(|e| e.actor.user_id == Some(user_id))
        {
            entry.actor.user_id = None;
            entry.actor.ip_address = None;
            entry.actor.user_agent = None;
            entry.anonymized_token = Some(token.to_owned());
            rewritten += 1;
        }
        Ok(rewritten)
    }

    async fn report(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        entity_type: Option<&str>,
    ) -> Result<Vec<AuditReportRow>, DomainError> {
        let window = AuditFilter {
            since: Some(since),
            until: Some(until),
            limit: None,
        };
        let selected = self.select(&window, |e| entity_type.is_none_or(|t| e.entity_type == t));
        Ok(summarize(&selected))
    }
}

/// An audit store whose every operation fails.
#[derive(Debug)]
pub struct FailingAuditStore;

fn unavailable() -> DomainError {
    DomainError::Storage("audit table unavailable".into())
}

#[async_trait]
impl AuditStore for FailingAuditStore {
    async fn insert(&self, _entry: AuditEntry) -> Result<(), DomainError> {
        Err(unavailable())
    }

    async fn history(
        &self,
        _entity_type: &str,
        _entity_id: &str,
        _filter: &AuditFilter,
    ) -> Result<Vec<AuditEntry>, DomainError> {
        Err(unavailable())
    }

    async fn by_user(
        &self,
        _user_id: Uuid,
        _filter: &AuditFilter,
    ) -> Result<Vec<AuditEntry>, DomainError> {
        Err(unavailable())
    }

    async fn delete_by_user(&self, _user_id: Uuid) -> Result<u64, DomainError> {
        Err(unavailable())
    }

    async fn anonymize_user(&self, _user_id: Uuid, _token: &str) -> Result<u64, DomainError> {
        Err(unavailable())
    }

    async fn report(
        &self,
        _since: DateTime<Utc>,
        _until: DateTime<Utc>,
        _entity_type: Option<&str>,
    ) -> Result<Vec<AuditReportRow>, DomainError> {
        Err(unavailable())
    }
}
