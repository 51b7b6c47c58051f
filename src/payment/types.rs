//! Payment Core Types
//!
//! Entities and canonical shapes for the payment orchestration core.
//! Ids are uuid-v4 newtypes generated client-side so a whole payment with
//! its steps can be written in one transaction without id round-trips.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::{LoanPaymentState, LoanState, PaymentStepState, TransferState};

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new unique id
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn inner(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

entity_id!(
    /// Loan identifier
    LoanId
);
entity_id!(
    /// Loan payment identifier
    PaymentId
);
entity_id!(
    /// Loan payment step identifier
    StepId
);
entity_id!(
    /// Transfer identifier
    TransferId
);
entity_id!(
    /// Payment account identifier
    AccountId
);

/// Lifecycle stage a payment belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanPaymentType {
    Funding,
    Disbursement,
    Fee,
    Repayment,
    Refund,
}

impl LoanPaymentType {
    /// All payment types; factories iterate this to stay exhaustive.
    pub const ALL: [LoanPaymentType; 5] = [
        LoanPaymentType::Funding,
        LoanPaymentType::Disbursement,
        LoanPaymentType::Fee,
        LoanPaymentType::Repayment,
        LoanPaymentType::Refund,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoanPaymentType::Funding => "funding",
            LoanPaymentType::Disbursement => "disbursement",
            LoanPaymentType::Fee => "fee",
            LoanPaymentType::Repayment => "repayment",
            LoanPaymentType::Refund => "refund",
        }
    }
}

impl fmt::Display for LoanPaymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanType {
    Personal,
    BillPay,
}

/// External funds-movement integration behind the canonical
/// execute/parse interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentAccountProvider {
    Checkbook,
    Fiserv,
    Tabapay,
}

impl PaymentAccountProvider {
    /// All providers; the execution factory must map every one at startup.
    pub const ALL: [PaymentAccountProvider; 3] = [
        PaymentAccountProvider::Checkbook,
        PaymentAccountProvider::Fiserv,
        PaymentAccountProvider::Tabapay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentAccountProvider::Checkbook => "checkbook",
            PaymentAccountProvider::Fiserv => "fiserv",
            PaymentAccountProvider::Tabapay => "tabapay",
        }
    }
}

impl fmt::Display for PaymentAccountProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    BankAccount,
    DebitCard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountOwnership {
    Personal,
    Internal,
}

/// Payment account view, the routing key source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAccount {
    pub id: AccountId,
    pub account_type: AccountType,
    pub ownership: AccountOwnership,
    pub provider: PaymentAccountProvider,
}

/// Loan view with the relations payment initiation needs.
///
/// The loan itself is owned by the lending core; this is the read model
/// consumed here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub loan_type: LoanType,
    pub state: LoanState,
    pub amount: Decimal,
    pub fee_amount: Decimal,
    /// Total number of repayment installments on the plan
    pub payments_count: u32,
    pub lender_account_id: Option<AccountId>,
    pub borrower_account_id: Option<AccountId>,
    /// The biller's payment account, when the loan targets a biller
    pub biller_payment_account_id: Option<AccountId>,
}

/// One lifecycle-stage payment for a loan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanPayment {
    pub id: PaymentId,
    pub loan_id: LoanId,
    pub payment_type: LoanPaymentType,
    pub amount: Decimal,
    /// Orders multiple occurrences; meaningful only for Repayment
    pub payment_number: Option<u32>,
    pub state: LoanPaymentState,
    pub created_at: DateTime<Utc>,
    pub initiated_at: Option<DateTime<Utc>>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One ordered leg of a payment, owning a sequence of transfer attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanPaymentStep {
    pub id: StepId,
    pub loan_payment_id: PaymentId,
    /// 0-based, unique within the payment
    pub order: u32,
    pub amount: Decimal,
    pub source_payment_account_id: AccountId,
    pub target_payment_account_id: AccountId,
    pub state: PaymentStepState,
    /// State the awaited step must reach before this one may begin;
    /// None for the first step
    pub await_step_state: Option<PaymentStepState>,
    /// Step awaited on; defaults to the step at order-1 when unset
    pub await_step_id: Option<StepId>,
}

/// One concrete attempt to execute a step's funds movement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    /// Owning step; a transfer may be free-standing
    pub loan_payment_step_id: Option<StepId>,
    /// Attempt number within the owning step
    pub order: u32,
    pub amount: Decimal,
    pub state: TransferState,
    pub source_account_id: AccountId,
    pub destination_account_id: AccountId,
    /// Provider-side reference, filled in by transfer updates
    pub provider_ref: Option<String>,
    /// Last provider-reported status string
    pub provider_status: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transfer {
    /// Create a transfer attempt from the owning step's movement data
    pub fn for_step(step: &LoanPaymentStep, order: u32) -> Self {
        let now = Utc::now();
        Self {
            id: TransferId::new(),
            loan_payment_step_id: Some(step.id),
            order,
            amount: step.amount,
            state: TransferState::Created,
            source_account_id: step.source_payment_account_id,
            destination_account_id: step.target_payment_account_id,
            provider_ref: None,
            provider_status: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl fmt::Display for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transfer[{}] {} -> {} amount={} state={}",
            self.id, self.source_account_id, self.destination_account_id, self.amount, self.state
        )
    }
}

/// Immutable failure record, written exactly once per failed transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferErrorRecord {
    pub transfer_id: TransferId,
    /// Denormalized for support lookups
    pub loan_id: Option<LoanId>,
    pub code: String,
    pub display_message: String,
    /// Provider-native payload as received
    pub raw: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Canonical error shape produced by provider-specific parsing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferErrorDetails {
    pub code: String,
    pub display_message: String,
    pub raw: serde_json::Value,
}

/// Canonical field updates merged into a transfer record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferUpdates {
    pub provider_ref: Option<String>,
    pub provider_status: Option<String>,
}

/// Canonical shape of a parsed provider callback: either an error payload
/// to fail the transfer with, or updates to merge, or both absent (no-op).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferUpdateDetails {
    /// Raw provider error payload; present when the callback reports failure
    pub error: Option<serde_json::Value>,
    pub updates: Option<TransferUpdates>,
}
