//! Command and query buses.
//!
//! The buses wrap handler execution with audit entries (commands only) and
//! execution-time metrics. Both collaborators are optional and best-effort:
//! whatever they do, the caller observes exactly the handler's result.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{Instrument, info_span, warn};

use crate::audit::{AuditRecord, AuditService};
use crate::command::{Command, CommandHandler, Query, QueryHandler};
use crate::error::DomainError;
use crate::metrics::{MetricsCollector, tags};

/// Audit entity type under which command lifecycle entries are filed.
pub const COMMAND_ENTITY_TYPE: &str = "command";

/// Audit event type recorded before a command runs.
pub const COMMAND_STARTED: &str = "command_started";

/// Audit event type recorded after a command succeeds.
pub const COMMAND_COMPLETED: &str = "command_completed";

/// Audit event type recorded after a command fails.
pub const COMMAND_FAILED: &str = "command_failed";

/// Metric name for command execution time.
pub const COMMAND_TIMING_METRIC: &str = "command.execution_time_ms";

/// Metric name for query execution time.
pub const QUERY_TIMING_METRIC: &str = "query.execution_time_ms";

fn outcome_of<T>(result: &Result<T, DomainError>) -> &'static str {
    if result.is_ok() { "success" } else { "failure" }
}

#[allow(clippy::cast_possible_truncation)]
fn millis(elapsed: Duration) -> u64 {
    elapsed.as_millis() as u64
}

/// Dispatches commands to their handlers.
#[derive(Debug, Clone, Default)]
pub struct CommandBus {
    audit: Option<Arc<AuditService>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl CommandBus {
    /// Creates a bus with no audit or metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records command lifecycle entries through `audit`.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<AuditService>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Records execution times through `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Runs `command` through `handler`, auditing and timing it.
    ///
    /// # Errors
    ///
    /// Returns the handler's error unchanged.
    pub async fn dispatch<C, H>(&self, handler: &H, command: &C) -> Result<H::Output, DomainError>
    where
        C: Command,
        H: CommandHandler<C>,
    {
        let command_type = command.command_type();
        let span = info_span!(
            "dispatch_command",
            command_type,
            command_id = %command.command_id(),
        );

        async {
            self.audit_command(command, COMMAND_STARTED, serde_json::json!({
                "command_type": command_type,
            }))
            .await;

            let started = Instant::now();
            let result = handler.handle(command).await;
            let elapsed = started.elapsed();

            let context = match &result {
                Ok(_) => serde_json::json!({
                    "command_type": command_type,
                    "execution_time_ms": millis(elapsed),
                    "result_type": std::any::type_name::<H::Output>(),
                }),
                Err(err) => {
                    warn!(error = %err, "command failed");
                    serde_json::json!({
                        "command_type": command_type,
                        "execution_time_ms": millis(elapsed),
                        "error_kind": err.kind(),
                        "error": err.to_string(),
                        "error_detail": format!("{err:?}"),
                    })
                }
            };
            let event_type = if result.is_ok() { COMMAND_COMPLETED } else { COMMAND_FAILED };
            self.audit_command(command, event_type, context).await;

            if let Some(metrics) = &self.metrics {
                metrics
                    .timing(
                        COMMAND_TIMING_METRIC,
                        elapsed,
                        tags([("command_type", command_type), ("outcome", outcome_of(&result))]),
                    )
                    .await;
            }

            result
        }
        .instrument(span)
        .await
    }

    async fn audit_command<C: Command>(
        &self,
        command: &C,
        event_type: &str,
        context: serde_json::Value,
    ) {
        if let Some(audit) = &self.audit {
            audit
                .record_audit_entry(
                    AuditRecord::new(
                        COMMAND_ENTITY_TYPE,
                        command.command_id().to_string(),
                        event_type,
                        command.actor().clone(),
                    )
                    .with_context(context),
                )
                .await;
        }
    }
}

/// Dispatches queries to their handlers. Queries change nothing, so only
/// execution time is recorded.
#[derive(Debug, Clone, Default)]
pub struct QueryBus {
    metrics: Option<Arc<MetricsCollector>>,
}

impl QueryBus {
    /// Creates a bus with no metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records execution times through `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Runs `query` through `handler`, timing it.
    ///
    /// # Errors
    ///
    /// Returns the handler's error unchanged.
    pub async fn dispatch<Q, H>(&self, handler: &H, query: &Q) -> Result<H::Output, DomainError>
    where
        Q: Query,
        H: QueryHandler<Q>,
    {
        let query_type = query.query_type();
        let started = Instant::now();
        let result = handler
            .handle(query)
            .instrument(info_span!("dispatch_query", query_type))
            .await;
        let elapsed = started.elapsed();

        if let Some(metrics) = &self.metrics {
            metrics
                .timing(
                    QUERY_TIMING_METRIC,
                    elapsed,
                    tags([("query_type", query_type), ("outcome", outcome_of(&result))]),
                )
                .await;
        }

        result
    }
}
