//! Mapping of `sqlx` errors onto the domain error taxonomy.

use loanbook_core::error::DomainError;

/// Wraps a database failure as `DomainError::Storage`.
pub(crate) fn storage_error(err: sqlx::Error) -> DomainError {
    DomainError::Storage(err.to_string())
}

/// Returns `true` for a unique-constraint violation (SQLSTATE `23505`).
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "23505")
}
