//! Command line surface of the admin binary.

use std::io::Write;

use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use loanbook_core::audit::AuditFilter;
use loanbook_core::event::ActorContext;
use loanbook_core::metrics::{MetricFilter, MetricTags};
use loanbook_core::repository::EventStore;
use loanbook_core::snapshot::SnapshotPolicy;
use loanbook_event_store::MIGRATOR;
use loanbook_lending::application::query_handlers::GetLoanAt;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Parser)]
#[command(name = "loanbook-admin")]
#[command(about = "Operator tooling for the loanbook event store")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Apply pending schema migrations
    Migrate,
    /// Delete snapshots older than the retention period
    CleanupSnapshots {
        /// Retention in days; defaults to SNAPSHOT_RETENTION_DAYS
        #[arg(
            long,
            value_parser = clap::value_parser!(i64).range(0..=SnapshotPolicy::MAX_RETENTION_DAYS)
        )]
        retention_days: Option<i64>,
    },
    /// Summarize audit activity for a time window
    AuditReport {
        /// Window start (RFC 3339)
        #[arg(long)]
        since: DateTime<Utc>,
        /// Window end (RFC 3339); defaults to now
        #[arg(long)]
        until: Option<DateTime<Utc>>,
        /// Restrict to one entity type
        #[arg(long)]
        entity_type: Option<String>,
    },
    /// Show the audit trail of one entity, newest first
    AuditHistory {
        /// Entity type, e.g. loan_application
        #[arg(long)]
        entity_type: String,
        /// Entity identifier
        #[arg(long)]
        entity_id: String,
        /// Earliest entry (RFC 3339)
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        /// Latest entry (RFC 3339)
        #[arg(long)]
        until: Option<DateTime<Utc>>,
        /// Maximum number of entries
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Erase a user's identifying data from the audit trail and event log
    ForgetUser {
        /// The user to forget
        #[arg(long)]
        user_id: Uuid,
        /// Hard-delete audit entries instead of anonymizing them
        #[arg(long)]
        delete: bool,
    },
    /// Reconstruct a loan as it stood at a past instant
    LoanAt {
        /// The loan
        #[arg(long)]
        loan_id: Uuid,
        /// Instant to reconstruct (RFC 3339)
        #[arg(long)]
        as_of: DateTime<Utc>,
    },
    /// Aggregate statistics for one metric
    MetricStats {
        /// Metric name, e.g. query.execution_time_ms
        #[arg(long)]
        name: String,
        /// Earliest observation (RFC 3339)
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        /// Latest observation (RFC 3339)
        #[arg(long)]
        until: Option<DateTime<Utc>>,
        /// Required tag, as key=value; repeatable
        #[arg(long = "tag", value_parser = parse_tag)]
        tags: Vec<(String, String)>,
    },
}

#[derive(Debug, Serialize)]
struct ForgetUserOutcome {
    user_id: Uuid,
    mode: &'static str,
    audit_entries: u64,
    events_scrubbed: u64,
    anonymized_token: Option<String>,
}

fn parse_tag(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_owned(), value.trim().to_owned()))
        }
        _ => Err(format!("expected key=value, got {raw:?}")),
    }
}

fn write_json<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<(), AppError> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

/// Runs one admin command, writing its JSON result to `out`.
///
/// # Errors
///
/// Returns `AppError` if the command fails; nothing useful has been written
/// to `out` in that case.
pub async fn run_command_with_writer<W: Write>(
    state: &AppState,
    command: Commands,
    now: DateTime<Utc>,
    out: &mut W,
) -> Result<(), AppError> {
    match command {
        Commands::Migrate => {
            MIGRATOR.run(&state.db_pool).await?;
            info!("migrations applied");
            write_json(out, &serde_json::json!({ "migrated": true }))?;
        }
        Commands::CleanupSnapshots { retention_days } => {
            let retention =
                retention_days.map_or_else(|| state.config.snapshot_retention(), Duration::days);
            let removed = state.snapshots.cleanup(retention).await?;
            info!(removed, retention_days = retention.num_days(), "snapshot cleanup finished");
            write_json(out, &serde_json::json!({ "removed": removed }))?;
        }
        Commands::AuditReport {
            since,
            until,
            entity_type,
        } => {
            let rows = state
                .audit
                .generate_audit_report(since, until.unwrap_or(now), entity_type.as_deref())
                .await?;
            write_json(out, &rows)?;
        }
        Commands::AuditHistory {
            entity_type,
            entity_id,
            since,
            until,
            limit,
        } => {
            let filter = AuditFilter { since, until, limit };
            let entries = state
                .audit
                .get_audit_history(&entity_type, &entity_id, &filter)
                .await?;
            write_json(out, &entries)?;
        }
        Commands::ForgetUser { user_id, delete } => {
            let (mode, audit_entries, anonymized_token) = if delete {
                ("deleted", state.audit.delete_user_audit_data(user_id).await?, None)
            } else {
                let touched = state.audit.anonymize_user_audit_data(user_id).await?;
                ("anonymized", touched, Some(state.audit.anonymized_token(user_id)))
            };
            let events_scrubbed = state.stores.events.scrub_actor_metadata(user_id).await?;
            info!(%user_id, mode, audit_entries, events_scrubbed, "user data erased");
            write_json(
                out,
                &ForgetUserOutcome {
                    user_id,
                    mode,
                    audit_entries,
                    events_scrubbed,
                    anonymized_token,
                },
            )?;
        }
        Commands::LoanAt { loan_id, as_of } => {
            let query = GetLoanAt {
                actor: ActorContext::system(),
                loan_id,
                as_of,
            };
            let state_at = state.query_bus.dispatch(&state.loans, &query).await;
            state.metrics.flush().await;
            write_json(out, &state_at?)?;
        }
        Commands::MetricStats {
            name,
            since,
            until,
            tags,
        } => {
            let filter = MetricFilter {
                since,
                until,
                tags: tags.into_iter().collect::<MetricTags>(),
            };
            let stats = state.metrics.statistics(&name, &filter).await?;
            write_json(out, &stats)?;
        }
    }
    Ok(())
}
