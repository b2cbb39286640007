//! Domain events for the loan application context.

use loanbook_core::error::DomainError;
use loanbook_core::event::{DomainEvent, EventMetadata, decode_payload};
use loanbook_core::repository::StoredEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event type string for `LoanApplicationSubmitted`.
pub const LOAN_SUBMITTED_EVENT_TYPE: &str = "loan.application_submitted";

/// Event type string for `RiskAssessed`.
pub const RISK_ASSESSED_EVENT_TYPE: &str = "loan.risk_assessed";

/// Event type string for `LoanStatusChanged`.
pub const STATUS_CHANGED_EVENT_TYPE: &str = "loan.status_changed";

/// Event type string for `LoanFunded`.
pub const LOAN_FUNDED_EVENT_TYPE: &str = "loan.funded";

/// Event type string for `PaymentReceived`.
pub const PAYMENT_RECEIVED_EVENT_TYPE: &str = "loan.payment_received";

/// Lifecycle status of a loan application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    /// Received, not yet looked at.
    Submitted,
    /// Being reviewed by an underwriter.
    UnderReview,
    /// Approved, awaiting funding.
    Approved,
    /// Declined.
    Rejected,
    /// Withdrawn before funding.
    Cancelled,
    /// Funded and being repaid.
    Active,
    /// Fully repaid.
    PaidOff,
    /// Written off.
    Defaulted,
}

impl LoanStatus {
    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::UnderReview => "under_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Active => "active",
            Self::PaidOff => "paid_off",
            Self::Defaulted => "defaulted",
        }
    }

    /// Statuses reachable from `self` through a status change.
    ///
    /// `Active` is absent everywhere: only funding activates a loan. Terminal
    /// statuses allow nothing.
    #[must_use]
    pub fn allowed_transitions(self) -> &'static [LoanStatus] {
        match self {
            Self::Submitted => &[
                Self::UnderReview,
                Self::Approved,
                Self::Rejected,
                Self::Cancelled,
            ],
            Self::UnderReview => &[Self::Approved, Self::Rejected, Self::Cancelled],
            Self::Approved => &[Self::Cancelled],
            Self::Active => &[Self::PaidOff, Self::Defaulted],
            Self::Rejected | Self::Cancelled | Self::PaidOff | Self::Defaulted => &[],
        }
    }

    /// Returns `true` if a status change from `self` to `to` is legal.
    #[must_use]
    pub fn can_transition_to(self, to: LoanStatus) -> bool {
        self.allowed_transitions().contains(&to)
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LoanStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitted" => Ok(Self::Submitted),
            "under_review" => Ok(Self::UnderReview),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "cancelled" => Ok(Self::Cancelled),
            "active" => Ok(Self::Active),
            "paid_off" => Ok(Self::PaidOff),
            "defaulted" => Ok(Self::Defaulted),
            other => Err(DomainError::Validation(format!("unknown loan status: {other}"))),
        }
    }
}

/// Emitted when a borrower submits an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanApplicationSubmitted {
    /// The borrower.
    pub borrower_id: Uuid,
    /// Requested principal in cents.
    pub requested_amount_cents: i64,
    /// Requested term.
    pub term_months: u32,
    /// Stated purpose.
    pub purpose: String,
}

/// Emitted when a risk assessment is attached to the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessed {
    /// Score between 0 and 1000.
    pub score: u16,
    /// Free-form assessor notes.
    pub notes: Option<String>,
}

/// Emitted on every explicit status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanStatusChanged {
    /// Status before the change.
    pub from: LoanStatus,
    /// Status after the change.
    pub to: LoanStatus,
    /// Why the status changed.
    pub reason: Option<String>,
}

/// Emitted when an approved loan is disbursed. Activates the loan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanFunded {
    /// Disbursed principal in cents.
    pub amount_cents: i64,
}

/// Emitted when a repayment is booked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceived {
    /// Amount paid in cents.
    pub amount_cents: i64,
    /// Outstanding balance after the payment.
    pub remaining_balance_cents: i64,
}

/// Event payload variants for the loan application context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanEventKind {
    /// An application has been submitted.
    LoanApplicationSubmitted(LoanApplicationSubmitted),
    /// A risk assessment has been recorded.
    RiskAssessed(RiskAssessed),
    /// The status has changed.
    LoanStatusChanged(LoanStatusChanged),
    /// The loan has been funded.
    LoanFunded(LoanFunded),
    /// A payment has been received.
    PaymentReceived(PaymentReceived),
}

impl LoanEventKind {
    /// Event type string of this variant.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::LoanApplicationSubmitted(_) => LOAN_SUBMITTED_EVENT_TYPE,
            Self::RiskAssessed(_) => RISK_ASSESSED_EVENT_TYPE,
            Self::LoanStatusChanged(_) => STATUS_CHANGED_EVENT_TYPE,
            Self::LoanFunded(_) => LOAN_FUNDED_EVENT_TYPE,
            Self::PaymentReceived(_) => PAYMENT_RECEIVED_EVENT_TYPE,
        }
    }
}

/// Domain event envelope for the loan application context.
#[derive(Debug, Clone)]
pub struct LoanEvent {
    /// Event metadata.
    pub metadata: EventMetadata,
    /// Event-specific payload.
    pub kind: LoanEventKind,
}

impl DomainEvent for LoanEvent {
    fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    fn to_payload(&self) -> Result<serde_json::Value, DomainError> {
        Ok(serde_json::to_value(&self.kind)?)
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    fn from_stored(stored: &StoredEvent) -> Result<Self, DomainError> {
        Ok(Self {
            metadata: EventMetadata::from_stored(stored),
            kind: decode_payload(stored, LoanEventKind::event_type)?,
        })
    }
}
