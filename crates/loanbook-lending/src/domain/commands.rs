//! Commands for the loan application context.

use loanbook_core::command::Command;
use loanbook_core::event::ActorContext;
use uuid::Uuid;

use super::events::LoanStatus;

/// Command to submit a new loan application.
#[derive(Debug, Clone)]
pub struct SubmitLoanApplication {
    /// Unique identifier of this command.
    pub command_id: Uuid,
    /// Who issued the command.
    pub actor: ActorContext,
    /// Identifier for the new application.
    pub loan_id: Uuid,
    /// The borrower.
    pub borrower_id: Uuid,
    /// Requested principal in cents.
    pub requested_amount_cents: i64,
    /// Requested term.
    pub term_months: u32,
    /// Stated purpose.
    pub purpose: String,
}

/// Command to attach a risk assessment.
#[derive(Debug, Clone)]
pub struct AssessRisk {
    /// Unique identifier of this command.
    pub command_id: Uuid,
    /// Who issued the command.
    pub actor: ActorContext,
    /// The application.
    pub loan_id: Uuid,
    /// Score between 0 and 1000.
    pub score: u16,
    /// Assessor notes.
    pub notes: Option<String>,
}

/// Command to move an application to another status.
#[derive(Debug, Clone)]
pub struct ChangeLoanStatus {
    /// Unique identifier of this command.
    pub command_id: Uuid,
    /// Who issued the command.
    pub actor: ActorContext,
    /// The application.
    pub loan_id: Uuid,
    /// Target status.
    pub to: LoanStatus,
    /// Why.
    pub reason: Option<String>,
}

/// Command to disburse an approved loan.
#[derive(Debug, Clone)]
pub struct FundLoan {
    /// Unique identifier of this command.
    pub command_id: Uuid,
    /// Who issued the command.
    pub actor: ActorContext,
    /// The loan.
    pub loan_id: Uuid,
    /// Disbursed principal in cents.
    pub amount_cents: i64,
}

/// Command to book a repayment.
#[derive(Debug, Clone)]
pub struct RecordPayment {
    /// Unique identifier of this command.
    pub command_id: Uuid,
    /// Who issued the command.
    pub actor: ActorContext,
    /// The loan.
    pub loan_id: Uuid,
    /// Amount paid in cents.
    pub amount_cents: i64,
}

macro_rules! impl_command {
    ($command:ty, $name:literal) => {
        impl Command for $command {
            fn command_type(&self) -> &'static str {
                $name
            }

            fn command_id(&self) -> Uuid {
                self.command_id
            }

            fn actor(&self) -> &ActorContext {
                &self.actor
            }
        }
    };
}

impl_command!(SubmitLoanApplication, "submit_loan_application");
impl_command!(AssessRisk, "assess_risk");
impl_command!(ChangeLoanStatus, "change_loan_status");
impl_command!(FundLoan, "fund_loan");
impl_command!(RecordPayment, "record_payment");
