//! Loanbook admin — error types.

use loanbook_core::error::DomainError;
use loanbook_event_store::config::ConfigError;
use thiserror::Error;

/// Startup and runtime errors for the admin CLI.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The engine rejected the operation.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Writing the command output failed.
    #[error("output error: {0}")]
    Output(#[from] std::io::Error),

    /// Encoding the command output failed.
    #[error("output encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl AppError {
    /// Process exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::Domain(DomainError::Validation(_) | DomainError::AggregateNotFound(_)) => 3,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn test_config_error_exits_with_2() {
        let err = AppError::from(ConfigError::Missing("DATABASE_URL"));

        assert_eq!(err.exit_code(), 2);
        assert_eq!(
            err.to_string(),
            "configuration error: DATABASE_URL environment variable must be set"
        );
    }

    #[test]
    fn test_not_found_exits_with_3() {
        let err = AppError::from(DomainError::AggregateNotFound(Uuid::new_v4()));

        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_storage_error_exits_with_1() {
        let err = AppError::from(DomainError::Storage("connection reset".into()));

        assert_eq!(err.exit_code(), 1);
        assert_eq!(err.to_string(), "storage error: connection reset");
    }
}
