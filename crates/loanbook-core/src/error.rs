//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

/// Top-level domain error type.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An aggregate was not found.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(Uuid),

    /// Optimistic concurrency conflict.
    #[error(
        "concurrency conflict on aggregate {aggregate_id}: \
         expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        /// The aggregate that had the conflict.
        aggregate_id: Uuid,
        /// The expected version.
        expected: i64,
        /// The actual version found.
        actual: i64,
    },

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// An event or snapshot payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A transport or transaction failure in the backing store.
    #[error("storage error: {0}")]
    Storage(String),
}

impl DomainError {
    /// Returns `true` when the caller should reload the aggregate and retry
    /// the whole command.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    /// Short machine-readable name of the error kind, used for metric tags
    /// and audit context.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AggregateNotFound(_) => "aggregate_not_found",
            Self::ConcurrencyConflict { .. } => "concurrency_conflict",
            Self::Validation(_) => "validation",
            Self::Serialization(_) => "serialization",
            Self::Storage(_) => "storage",
        }
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_concurrency_conflict_is_retryable() {
        let conflict = DomainError::ConcurrencyConflict {
            aggregate_id: Uuid::new_v4(),
            expected: 1,
            actual: 2,
        };

        assert!(conflict.is_retryable());
        assert!(!DomainError::Storage("connection reset".into()).is_retryable());
        assert!(!DomainError::Serialization("bad payload".into()).is_retryable());
        assert!(!DomainError::Validation("bad input".into()).is_retryable());
        assert!(!DomainError::AggregateNotFound(Uuid::new_v4()).is_retryable());
    }

    #[test]
    fn test_serde_json_error_maps_to_serialization() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();

        let domain: DomainError = err.into();

        assert_eq!(domain.kind(), "serialization");
    }
}
