//! Aggregate root for the loan application context.

use loanbook_core::aggregate::AggregateRoot;
use loanbook_core::clock::Clock;
use loanbook_core::error::DomainError;
use loanbook_core::event::{ActorContext, EventMetadata};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{
    LoanApplicationSubmitted, LoanEvent, LoanEventKind, LoanFunded, LoanStatus, LoanStatusChanged,
    PaymentReceived, RiskAssessed,
};

/// Highest accepted risk score.
pub const MAX_RISK_SCORE: u16 = 1000;

/// The aggregate root for a loan application.
#[derive(Debug)]
pub struct LoanApplication {
    /// Aggregate identifier.
    pub id: Uuid,
    /// Current version (persisted event count).
    pub(crate) version: i64,
    /// The borrower.
    pub(crate) borrower_id: Uuid,
    /// Requested principal in cents.
    pub(crate) requested_amount_cents: i64,
    /// Requested term.
    pub(crate) term_months: u32,
    /// Stated purpose.
    pub(crate) purpose: String,
    /// Lifecycle status.
    pub(crate) status: LoanStatus,
    /// Latest risk score, if assessed.
    pub(crate) risk_score: Option<u16>,
    /// Disbursed principal, once funded.
    pub(crate) funded_amount_cents: Option<i64>,
    /// Principal still owed.
    pub(crate) outstanding_balance_cents: i64,
    /// Sum of all payments.
    pub(crate) total_paid_cents: i64,
    /// Uncommitted events pending persistence.
    uncommitted_events: Vec<LoanEvent>,
}

/// Serializable state of a loan application for snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanSnapshot {
    /// The borrower.
    pub borrower_id: Uuid,
    /// Requested principal in cents.
    pub requested_amount_cents: i64,
    /// Requested term.
    pub term_months: u32,
    /// Stated purpose.
    pub purpose: String,
    /// Lifecycle status.
    pub status: LoanStatus,
    /// Latest risk score.
    pub risk_score: Option<u16>,
    /// Disbursed principal.
    pub funded_amount_cents: Option<i64>,
    /// Principal still owed.
    pub outstanding_balance_cents: i64,
    /// Sum of all payments.
    pub total_paid_cents: i64,
}

impl LoanApplication {
    /// Starts a new application, producing a `LoanApplicationSubmitted`
    /// event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the amount or term is not
    /// positive, or the purpose is blank.
    pub fn submit(
        id: Uuid,
        borrower_id: Uuid,
        requested_amount_cents: i64,
        term_months: u32,
        purpose: &str,
        actor: &ActorContext,
        clock: &dyn Clock,
    ) -> Result<Self, DomainError> {
        if requested_amount_cents <= 0 {
            return Err(DomainError::Validation(format!(
                "requested amount must be positive, got {requested_amount_cents}"
            )));
        }
        if term_months == 0 {
            return Err(DomainError::Validation("term must be at least one month".to_owned()));
        }
        if purpose.trim().is_empty() {
            return Err(DomainError::Validation("purpose must not be empty".to_owned()));
        }

        let mut loan = Self::empty(id);
        loan.record(
            LoanEventKind::LoanApplicationSubmitted(LoanApplicationSubmitted {
                borrower_id,
                requested_amount_cents,
                term_months,
                purpose: purpose.trim().to_owned(),
            }),
            actor,
            clock,
        );
        Ok(loan)
    }

    /// Records a risk assessment, producing a `RiskAssessed` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the score exceeds
    /// [`MAX_RISK_SCORE`] or the application is no longer being decided.
    pub fn assess_risk(
        &mut self,
        score: u16,
        notes: Option<String>,
        actor: &ActorContext,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        if score > MAX_RISK_SCORE {
            return Err(DomainError::Validation(format!(
                "risk score {score} exceeds {MAX_RISK_SCORE}"
            )));
        }
        if !matches!(self.status, LoanStatus::Submitted | LoanStatus::UnderReview) {
            return Err(DomainError::Validation(format!(
                "cannot assess risk of loan {} in status {}",
                self.id, self.status
            )));
        }
        self.record(
            LoanEventKind::RiskAssessed(RiskAssessed { score, notes }),
            actor,
            clock,
        );
        Ok(())
    }

    /// Changes the status, producing a `LoanStatusChanged` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the transition is not in the
    /// allowed-transition table. Nothing is recorded in that case.
    pub fn change_status(
        &mut self,
        to: LoanStatus,
        reason: Option<String>,
        actor: &ActorContext,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::Validation(format!(
                "illegal status transition for loan {}: {} -> {to}",
                self.id, self.status
            )));
        }
        self.record(
            LoanEventKind::LoanStatusChanged(LoanStatusChanged {
                from: self.status,
                to,
                reason,
            }),
            actor,
            clock,
        );
        Ok(())
    }

    /// Disburses an approved loan, producing a `LoanFunded` event that
    /// activates it.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the loan is not approved or the
    /// amount is not within `1..=requested`.
    pub fn fund(
        &mut self,
        amount_cents: i64,
        actor: &ActorContext,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        if self.status != LoanStatus::Approved {
            return Err(DomainError::Validation(format!(
                "cannot fund loan {} in status {}",
                self.id, self.status
            )));
        }
        if amount_cents <= 0 || amount_cents > self.requested_amount_cents {
            return Err(DomainError::Validation(format!(
                "funded amount {amount_cents} must be between 1 and {}",
                self.requested_amount_cents
            )));
        }
        self.record(
            LoanEventKind::LoanFunded(LoanFunded { amount_cents }),
            actor,
            clock,
        );
        Ok(())
    }

    /// Books a repayment, producing a `PaymentReceived` event. A payment
    /// that clears the balance pays the loan off.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the loan is not active or the
    /// amount is not within `1..=outstanding`.
    pub fn record_payment(
        &mut self,
        amount_cents: i64,
        actor: &ActorContext,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        if self.status != LoanStatus::Active {
            return Err(DomainError::Validation(format!(
                "cannot record payment on loan {} in status {}",
                self.id, self.status
            )));
        }
        if amount_cents <= 0 || amount_cents > self.outstanding_balance_cents {
            return Err(DomainError::Validation(format!(
                "payment {amount_cents} must be between 1 and the outstanding balance {}",
                self.outstanding_balance_cents
            )));
        }
        self.record(
            LoanEventKind::PaymentReceived(PaymentReceived {
                amount_cents,
                remaining_balance_cents: self.outstanding_balance_cents - amount_cents,
            }),
            actor,
            clock,
        );
        Ok(())
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> LoanStatus {
        self.status
    }

    /// Principal still owed, in cents.
    #[must_use]
    pub fn outstanding_balance_cents(&self) -> i64 {
        self.outstanding_balance_cents
    }

    fn record(&mut self, kind: LoanEventKind, actor: &ActorContext, clock: &dyn Clock) {
        let event = LoanEvent {
            metadata: EventMetadata {
                event_id: Uuid::new_v4(),
                event_type: kind.event_type().to_owned(),
                aggregate_id: self.id,
                sequence_number: self.next_sequence_number(),
                actor: actor.clone(),
                occurred_at: clock.now(),
            },
            kind,
        };
        self.record_event(event);
    }
}

impl AggregateRoot for LoanApplication {
    type Event = LoanEvent;
    type Snapshot = LoanSnapshot;

    const AGGREGATE_TYPE: &'static str = "loan_application";

    fn empty(id: Uuid) -> Self {
        Self {
            id,
            version: 0,
            borrower_id: Uuid::nil(),
            requested_amount_cents: 0,
            term_months: 0,
            purpose: String::new(),
            status: LoanStatus::Submitted,
            risk_score: None,
            funded_amount_cents: None,
            outstanding_balance_cents: 0,
            total_paid_cents: 0,
            uncommitted_events: Vec::new(),
        }
    }

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    fn apply(&mut self, event: &Self::Event) {
        match &event.kind {
            LoanEventKind::LoanApplicationSubmitted(payload) => {
                self.borrower_id = payload.borrower_id;
                self.requested_amount_cents = payload.requested_amount_cents;
                self.term_months = payload.term_months;
                self.purpose.clone_from(&payload.purpose);
                self.status = LoanStatus::Submitted;
            }
            LoanEventKind::RiskAssessed(payload) => {
                self.risk_score = Some(payload.score);
            }
            LoanEventKind::LoanStatusChanged(payload) => {
                self.status = payload.to;
            }
            LoanEventKind::LoanFunded(payload) => {
                self.funded_amount_cents = Some(payload.amount_cents);
                self.outstanding_balance_cents = payload.amount_cents;
                self.status = LoanStatus::Active;
            }
            LoanEventKind::PaymentReceived(payload) => {
                self.total_paid_cents += payload.amount_cents;
                self.outstanding_balance_cents = payload.remaining_balance_cents;
                if payload.remaining_balance_cents == 0 {
                    self.status = LoanStatus::PaidOff;
                }
            }
        }
    }

    fn uncommitted_events(&self) -> &[Self::Event] {
        &self.uncommitted_events
    }

    fn uncommitted_events_mut(&mut self) -> &mut Vec<Self::Event> {
        &mut self.uncommitted_events
    }

    fn take_snapshot(&self) -> Self::Snapshot {
        LoanSnapshot {
            borrower_id: self.borrower_id,
            requested_amount_cents: self.requested_amount_cents,
            term_months: self.term_months,
            purpose: self.purpose.clone(),
            status: self.status,
            risk_score: self.risk_score,
            funded_amount_cents: self.funded_amount_cents,
            outstanding_balance_cents: self.outstanding_balance_cents,
            total_paid_cents: self.total_paid_cents,
        }
    }

    fn restore_from_snapshot(&mut self, snapshot: Self::Snapshot) {
        self.borrower_id = snapshot.borrower_id;
        self.requested_amount_cents = snapshot.requested_amount_cents;
        self.term_months = snapshot.term_months;
        self.purpose = snapshot.purpose;
        self.status = snapshot.status;
        self.risk_score = snapshot.risk_score;
        self.funded_amount_cents = snapshot.funded_amount_cents;
        self.outstanding_balance_cents = snapshot.outstanding_balance_cents;
        self.total_paid_cents = snapshot.total_paid_cents;
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use loanbook_core::event::DomainEvent;
    use loanbook_test_support::FixedClock;

    use super::*;
    use crate::domain::events::{LOAN_SUBMITTED_EVENT_TYPE, PAYMENT_RECEIVED_EVENT_TYPE};

    fn clock() -> FixedClock {
        FixedClock(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap())
    }

    fn approved_loan(actor: &ActorContext) -> LoanApplication {
        let mut loan = LoanApplication::submit(
            Uuid::new_v4(),
            Uuid::new_v4(),
            1_000_000,
            36,
            "car",
            actor,
            &clock(),
        )
        .unwrap();
        loan.change_status(LoanStatus::Approved, None, actor, &clock())
            .unwrap();
        loan
    }

    #[test]
    fn test_submit_produces_submitted_event() {
        // Arrange
        let loan_id = Uuid::new_v4();
        let borrower_id = Uuid::new_v4();
        let actor = ActorContext::user(borrower_id).with_correlation_id(Uuid::new_v4());

        // Act
        let loan = LoanApplication::submit(
            loan_id,
            borrower_id,
            2_500_000,
            60,
            " home improvement ",
            &actor,
            &clock(),
        )
        .unwrap();

        // Assert
        let events = loan.uncommitted_events();
        assert_eq!(events.len(), 1);

        let event = &events[0];
        assert_eq!(event.event_type(), LOAN_SUBMITTED_EVENT_TYPE);

        let meta = event.metadata();
        assert_eq!(meta.aggregate_id, loan_id);
        assert_eq!(meta.sequence_number, 1);
        assert_eq!(meta.actor, actor);
        assert_eq!(meta.occurred_at, clock().0);

        match &event.kind {
            LoanEventKind::LoanApplicationSubmitted(payload) => {
                assert_eq!(payload.borrower_id, borrower_id);
                assert_eq!(payload.requested_amount_cents, 2_500_000);
                assert_eq!(payload.purpose, "home improvement");
            }
            other => panic!("expected LoanApplicationSubmitted, got {other:?}"),
        }
        assert_eq!(loan.status(), LoanStatus::Submitted);
        assert_eq!(loan.version(), 0);
    }

    #[test]
    fn test_submit_rejects_non_positive_amount() {
        let result = LoanApplication::submit(
            Uuid::new_v4(),
            Uuid::new_v4(),
            0,
            12,
            "car",
            &ActorContext::system(),
            &clock(),
        );

        match result {
            Err(DomainError::Validation(msg)) => assert!(msg.contains("amount")),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn test_illegal_transition_records_nothing() {
        // Arrange
        let actor = ActorContext::system();
        let mut loan = approved_loan(&actor);
        let before = loan.uncommitted_events().len();

        // Act
        let result = loan.change_status(LoanStatus::UnderReview, None, &actor, &clock());

        // Assert
        match result {
            Err(DomainError::Validation(msg)) => {
                assert!(msg.contains("approved -> under_review"));
            }
            other => panic!("expected Validation, got {other:?}"),
        }
        assert_eq!(loan.uncommitted_events().len(), before);
        assert_eq!(loan.status(), LoanStatus::Approved);
    }

    #[test]
    fn test_fund_requires_approval() {
        let actor = ActorContext::system();
        let mut loan = LoanApplication::submit(
            Uuid::new_v4(),
            Uuid::new_v4(),
            1_000,
            12,
            "car",
            &actor,
            &clock(),
        )
        .unwrap();

        let result = loan.fund(1_000, &actor, &clock());

        assert!(matches!(result, Err(DomainError::Validation(_))));
        assert_eq!(loan.uncommitted_events().len(), 1);
    }

    #[test]
    fn test_fund_activates_loan_with_balance() {
        let actor = ActorContext::system();
        let mut loan = approved_loan(&actor);

        loan.fund(800_000, &actor, &clock()).unwrap();

        assert_eq!(loan.status(), LoanStatus::Active);
        assert_eq!(loan.outstanding_balance_cents(), 800_000);
        assert_eq!(loan.uncommitted_events()[2].metadata().sequence_number, 3);
    }

    #[test]
    fn test_fund_rejects_more_than_requested() {
        let actor = ActorContext::system();
        let mut loan = approved_loan(&actor);

        let result = loan.fund(1_000_001, &actor, &clock());

        assert!(matches!(result, Err(DomainError::Validation(_))));
        assert_eq!(loan.status(), LoanStatus::Approved);
    }

    #[test]
    fn test_final_payment_pays_off_loan() {
        // Arrange
        let actor = ActorContext::system();
        let mut loan = approved_loan(&actor);
        loan.fund(1_000, &actor, &clock()).unwrap();

        // Act
        loan.record_payment(400, &actor, &clock()).unwrap();
        loan.record_payment(600, &actor, &clock()).unwrap();

        // Assert
        assert_eq!(loan.status(), LoanStatus::PaidOff);
        assert_eq!(loan.outstanding_balance_cents(), 0);
        assert_eq!(loan.total_paid_cents, 1_000);
        let last = loan.uncommitted_events().last().unwrap();
        assert_eq!(last.event_type(), PAYMENT_RECEIVED_EVENT_TYPE);
        match &last.kind {
            LoanEventKind::PaymentReceived(payload) => {
                assert_eq!(payload.remaining_balance_cents, 0);
            }
            other => panic!("expected PaymentReceived, got {other:?}"),
        }
    }

    #[test]
    fn test_overpayment_is_rejected() {
        let actor = ActorContext::system();
        let mut loan = approved_loan(&actor);
        loan.fund(1_000, &actor, &clock()).unwrap();

        let result = loan.record_payment(1_001, &actor, &clock());

        assert!(matches!(result, Err(DomainError::Validation(_))));
        assert_eq!(loan.outstanding_balance_cents(), 1_000);
    }

    #[test]
    fn test_risk_score_out_of_range_is_rejected() {
        let actor = ActorContext::system();
        let mut loan = LoanApplication::submit(
            Uuid::new_v4(),
            Uuid::new_v4(),
            1_000,
            12,
            "car",
            &actor,
            &clock(),
        )
        .unwrap();

        let result = loan.assess_risk(MAX_RISK_SCORE + 1, None, &actor, &clock());

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_snapshot_restores_identical_state() {
        // Arrange
        let actor = ActorContext::system();
        let mut loan = LoanApplication::submit(
            Uuid::new_v4(),
            Uuid::new_v4(),
            1_000_000,
            36,
            "car",
            &actor,
            &clock(),
        )
        .unwrap();
        loan.assess_risk(720, Some("stable income".to_owned()), &actor, &clock())
            .unwrap();
        loan.change_status(LoanStatus::Approved, None, &actor, &clock())
            .unwrap();
        loan.fund(900_000, &actor, &clock()).unwrap();
        loan.record_payment(100_000, &actor, &clock()).unwrap();

        // Act
        let mut restored = LoanApplication::empty(loan.id);
        restored.restore_from_snapshot(loan.take_snapshot());

        // Assert
        assert_eq!(restored.take_snapshot(), loan.take_snapshot());
        assert_eq!(restored.outstanding_balance_cents(), 800_000);
        assert_eq!(restored.risk_score, Some(720));
    }
}
