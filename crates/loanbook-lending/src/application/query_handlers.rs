//! Query handlers for the loan application context.
//!
//! Queries reconstitute the aggregate through the repository and return
//! read-only views.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loanbook_core::aggregate::AggregateRoot;
use loanbook_core::audit::{AuditService, PointInTimeState};
use loanbook_core::command::{Query, QueryHandler};
use loanbook_core::error::DomainError;
use loanbook_core::event::ActorContext;
use loanbook_core::event_sourced::EventSourcedRepository;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::{LoanApplication, LoanSnapshot};
use crate::domain::events::LoanStatus;

/// Read-only view of a loan application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoanView {
    /// The loan identifier.
    pub loan_id: Uuid,
    /// The borrower.
    pub borrower_id: Uuid,
    /// Lifecycle status.
    pub status: LoanStatus,
    /// Requested principal in cents.
    pub requested_amount_cents: i64,
    /// Requested term.
    pub term_months: u32,
    /// Latest risk score.
    pub risk_score: Option<u16>,
    /// Disbursed principal.
    pub funded_amount_cents: Option<i64>,
    /// Principal still owed.
    pub outstanding_balance_cents: i64,
    /// Sum of payments.
    pub total_paid_cents: i64,
    /// Current version (event count).
    pub version: i64,
}

impl LoanView {
    fn from_snapshot(loan_id: Uuid, version: i64, snapshot: LoanSnapshot) -> Self {
        Self {
            loan_id,
            borrower_id: snapshot.borrower_id,
            status: snapshot.status,
            requested_amount_cents: snapshot.requested_amount_cents,
            term_months: snapshot.term_months,
            risk_score: snapshot.risk_score,
            funded_amount_cents: snapshot.funded_amount_cents,
            outstanding_balance_cents: snapshot.outstanding_balance_cents,
            total_paid_cents: snapshot.total_paid_cents,
            version,
        }
    }
}

/// Current state of one loan.
#[derive(Debug, Clone)]
pub struct GetLoan {
    /// Who asks.
    pub actor: ActorContext,
    /// The loan.
    pub loan_id: Uuid,
}

/// State of one loan as it stood at a past instant.
#[derive(Debug, Clone)]
pub struct GetLoanAt {
    /// Who asks.
    pub actor: ActorContext,
    /// The loan.
    pub loan_id: Uuid,
    /// The instant to reconstruct.
    pub as_of: DateTime<Utc>,
}

impl Query for GetLoan {
    fn query_type(&self) -> &'static str {
        "get_loan"
    }

    fn actor(&self) -> &ActorContext {
        &self.actor
    }
}

impl Query for GetLoanAt {
    fn query_type(&self) -> &'static str {
        "get_loan_at"
    }

    fn actor(&self) -> &ActorContext {
        &self.actor
    }
}

/// Serves loan queries.
#[derive(Debug, Clone)]
pub struct LoanQueryHandler {
    repo: EventSourcedRepository<LoanApplication>,
    audit: Arc<AuditService>,
}

impl LoanQueryHandler {
    /// Creates a new `LoanQueryHandler`.
    #[must_use]
    pub fn new(repo: EventSourcedRepository<LoanApplication>, audit: Arc<AuditService>) -> Self {
        Self { repo, audit }
    }
}

#[async_trait]
impl QueryHandler<GetLoan> for LoanQueryHandler {
    type Output = LoanView;

    /// # Errors
    ///
    /// Returns `DomainError::AggregateNotFound` if the loan has no events.
    async fn handle(&self, query: &GetLoan) -> Result<Self::Output, DomainError> {
        let loan = self.repo.load(query.loan_id).await?;
        Ok(LoanView::from_snapshot(query.loan_id, loan.version(), loan.take_snapshot()))
    }
}

#[async_trait]
impl QueryHandler<GetLoanAt> for LoanQueryHandler {
    type Output = Option<PointInTimeState<LoanView>>;

    /// Returns `None` if the loan did not exist yet at `as_of`.
    async fn handle(&self, query: &GetLoanAt) -> Result<Self::Output, DomainError> {
        let state = self
            .audit
            .reconstruct_entity_state::<LoanApplication>(query.loan_id, query.as_of)
            .await?;
        Ok(state.map(|found| PointInTimeState {
            state: LoanView::from_snapshot(found.entity_id, found.version, found.state),
            entity_type: found.entity_type,
            entity_id: found.entity_id,
            as_of: found.as_of,
            version: found.version,
            last_event_at: found.last_event_at,
        }))
    }
}
