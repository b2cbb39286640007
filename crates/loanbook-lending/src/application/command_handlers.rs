//! Command handlers for the loan application context.
//!
//! Every handler follows the same shape: load the aggregate, execute the
//! domain method, persist the buffered events, then audit the change.

use std::sync::Arc;

use async_trait::async_trait;
use loanbook_core::aggregate::AggregateRoot;
use loanbook_core::audit::{AuditRecord, AuditService};
use loanbook_core::clock::Clock;
use loanbook_core::command::{Command, CommandHandler};
use loanbook_core::error::DomainError;
use loanbook_core::event_sourced::EventSourcedRepository;
use loanbook_core::repository::StoredEvent;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::aggregates::LoanApplication;
use crate::domain::commands::{
    AssessRisk, ChangeLoanStatus, FundLoan, RecordPayment, SubmitLoanApplication,
};

/// Result of a successfully handled command.
#[derive(Debug)]
pub struct LoanCommandResult {
    /// The aggregate ID affected by the command.
    pub aggregate_id: Uuid,
    /// Aggregate version after the command.
    pub version: i64,
    /// The stored events produced and persisted.
    pub stored_events: Vec<StoredEvent>,
}

/// Handles every loan command against one repository.
#[derive(Clone)]
pub struct LoanCommandHandler {
    repo: EventSourcedRepository<LoanApplication>,
    clock: Arc<dyn Clock>,
    audit: Option<Arc<AuditService>>,
}

impl std::fmt::Debug for LoanCommandHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoanCommandHandler")
            .field("repo", &self.repo)
            .finish_non_exhaustive()
    }
}

impl LoanCommandHandler {
    /// Creates a handler without entity-level auditing.
    #[must_use]
    pub fn new(repo: EventSourcedRepository<LoanApplication>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repo,
            clock,
            audit: None,
        }
    }

    /// Records a before/after audit entry for every changed loan.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<AuditService>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Loads the loan, runs `execute` on it and saves the result.
    async fn update<C, F>(
        &self,
        command: &C,
        loan_id: Uuid,
        execute: F,
    ) -> Result<LoanCommandResult, DomainError>
    where
        C: Command,
        F: FnOnce(&mut LoanApplication, &dyn Clock) -> Result<(), DomainError> + Send,
    {
        let mut loan = self.repo.load(loan_id).await?;
        let before = loan.take_snapshot();

        execute(&mut loan, self.clock.as_ref())?;

        let stored_events = self.repo.save(&mut loan).await?;
        self.audit_change(command, &loan, serde_json::to_value(&before).ok(), &stored_events)
            .await;
        Ok(LoanCommandResult {
            aggregate_id: loan_id,
            version: loan.version(),
            stored_events,
        })
    }

    async fn audit_change<C: Command>(
        &self,
        command: &C,
        loan: &LoanApplication,
        old_values: Option<serde_json::Value>,
        stored_events: &[StoredEvent],
    ) {
        let Some(audit) = &self.audit else {
            return;
        };
        let event_types: Vec<&str> = stored_events.iter().map(|e| e.event_type.as_str()).collect();
        let record = AuditRecord::new(
            LoanApplication::AGGREGATE_TYPE,
            loan.aggregate_id().to_string(),
            command.command_type(),
            command.actor().clone(),
        )
        .with_changes(old_values, serde_json::to_value(loan.take_snapshot()).ok())
        .with_context(serde_json::json!({
            "command_id": command.command_id(),
            "events": event_types,
            "version": loan.version(),
        }));
        audit.record_audit_entry(record).await;
    }
}

#[async_trait]
impl CommandHandler<SubmitLoanApplication> for LoanCommandHandler {
    type Output = LoanCommandResult;

    /// Creates the application.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the identifier is taken or the
    /// application is invalid, otherwise the repository's error.
    #[instrument(skip_all, fields(loan_id = %command.loan_id))]
    async fn handle(&self, command: &SubmitLoanApplication) -> Result<Self::Output, DomainError> {
        if self.repo.exists(command.loan_id).await? {
            return Err(DomainError::Validation(format!(
                "loan application {} already exists",
                command.loan_id
            )));
        }
        let mut loan = LoanApplication::submit(
            command.loan_id,
            command.borrower_id,
            command.requested_amount_cents,
            command.term_months,
            &command.purpose,
            &command.actor,
            self.clock.as_ref(),
        )?;

        let stored_events = self.repo.save(&mut loan).await?;
        debug!(version = loan.version(), "loan application submitted");
        self.audit_change(command, &loan, None, &stored_events).await;
        Ok(LoanCommandResult {
            aggregate_id: command.loan_id,
            version: loan.version(),
            stored_events,
        })
    }
}

#[async_trait]
impl CommandHandler<AssessRisk> for LoanCommandHandler {
    type Output = LoanCommandResult;

    #[instrument(skip_all, fields(loan_id = %command.loan_id))]
    async fn handle(&self, command: &AssessRisk) -> Result<Self::Output, DomainError> {
        self.update(command, command.loan_id, |loan, clock| {
            loan.assess_risk(command.score, command.notes.clone(), &command.actor, clock)
        })
        .await
    }
}

#[async_trait]
impl CommandHandler<ChangeLoanStatus> for LoanCommandHandler {
    type Output = LoanCommandResult;

    #[instrument(skip_all, fields(loan_id = %command.loan_id, to = %command.to))]
    async fn handle(&self, command: &ChangeLoanStatus) -> Result<Self::Output, DomainError> {
        self.update(command, command.loan_id, |loan, clock| {
            loan.change_status(command.to, command.reason.clone(), &command.actor, clock)
        })
        .await
    }
}

#[async_trait]
impl CommandHandler<FundLoan> for LoanCommandHandler {
    type Output = LoanCommandResult;

    #[instrument(skip_all, fields(loan_id = %command.loan_id))]
    async fn handle(&self, command: &FundLoan) -> Result<Self::Output, DomainError> {
        self.update(command, command.loan_id, |loan, clock| {
            loan.fund(command.amount_cents, &command.actor, clock)
        })
        .await
    }
}

#[async_trait]
impl CommandHandler<RecordPayment> for LoanCommandHandler {
    type Output = LoanCommandResult;

    #[instrument(skip_all, fields(loan_id = %command.loan_id))]
    async fn handle(&self, command: &RecordPayment) -> Result<Self::Output, DomainError> {
        self.update(command, command.loan_id, |loan, clock| {
            loan.record_payment(command.amount_cents, &command.actor, clock)
        })
        .await
    }
}
