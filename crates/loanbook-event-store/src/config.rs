//! Engine configuration read from the environment.

use std::str::FromStr;

use chrono::Duration;
use loanbook_core::snapshot::SnapshotPolicy;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("{0} environment variable must be set")]
    Missing(&'static str),

    /// A variable is set but its value is unusable.
    #[error("{name} has invalid value {value:?}: {reason}")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Runtime settings for the persistence engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Pool size.
    pub max_connections: u32,
    /// Events between snapshots.
    pub snapshot_frequency: i64,
    /// Snapshots older than this many days are removed by cleanup.
    pub snapshot_retention_days: i64,
    /// Observations buffered before an automatic metrics flush.
    pub metrics_buffer_size: usize,
    /// Salt for anonymization tokens.
    pub anonymization_salt: String,
}

impl EngineConfig {
    /// Reads configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `DATABASE_URL` is missing or any value fails
    /// to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads configuration through `lookup`, which maps a variable name to
    /// its value.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `DATABASE_URL` is missing or any value fails
    /// to parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let snapshot_frequency = parse(
            &lookup,
            "SNAPSHOT_FREQUENCY",
            SnapshotPolicy::DEFAULT_FREQUENCY,
        )?;
        if snapshot_frequency <= 0 {
            return Err(invalid("SNAPSHOT_FREQUENCY", snapshot_frequency, "must be positive"));
        }
        let snapshot_retention_days = parse(&lookup, "SNAPSHOT_RETENTION_DAYS", 90)?;
        if !(0..=SnapshotPolicy::MAX_RETENTION_DAYS).contains(&snapshot_retention_days) {
            return Err(invalid(
                "SNAPSHOT_RETENTION_DAYS",
                snapshot_retention_days,
                &format!("must be between 0 and {}", SnapshotPolicy::MAX_RETENTION_DAYS),
            ));
        }
        let metrics_buffer_size = parse(&lookup, "METRICS_BUFFER_SIZE", 100)?;
        if metrics_buffer_size == 0 {
            return Err(invalid("METRICS_BUFFER_SIZE", metrics_buffer_size, "must be positive"));
        }

        Ok(Self {
            database_url,
            max_connections: parse(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            snapshot_frequency,
            snapshot_retention_days,
            metrics_buffer_size,
            anonymization_salt: lookup("AUDIT_ANONYMIZATION_SALT")
                .unwrap_or_else(|| "loanbook".to_owned()),
        })
    }

    /// The configured snapshot policy.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if the frequency is not positive.
    pub fn snapshot_policy(&self) -> Result<SnapshotPolicy, ConfigError> {
        SnapshotPolicy::new(self.snapshot_frequency)
            .map_err(|err| invalid("SNAPSHOT_FREQUENCY", self.snapshot_frequency, &err.to_string()))
    }

    /// Age beyond which snapshots are removed.
    #[must_use]
    pub fn snapshot_retention(&self) -> Duration {
        Duration::days(self.snapshot_retention_days)
    }

    /// Opens a connection pool to the configured database.
    ///
    /// # Errors
    ///
    /// Returns the `sqlx` error if the database is unreachable.
    pub async fn connect(&self) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.database_url)
            .await
    }
}

fn parse<T, F>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
            name,
            value: raw.clone(),
            reason: err.to_string(),
        }),
    }
}

fn invalid(name: &'static str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: reason.to_owned(),
    }
}
