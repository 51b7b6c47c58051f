//! Payment State Definitions
//!
//! State ids are stable SMALLINT-style codes so stores can persist them
//! without string parsing. Terminal states never transition further.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Loan lifecycle states (owned by the lending core, consumed here as
/// event payloads only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanState {
    Created,
    Requested,
    Offered,
    Bound,
    Accepted,
    Funding,
    FundingPaused,
    Funded,
    Disbursing,
    DisbursingPaused,
    Disbursed,
    Repaying,
    RepaymentPaused,
    Repaid,
    Closed,
}

impl LoanState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanState::Created => "created",
            LoanState::Requested => "requested",
            LoanState::Offered => "offered",
            LoanState::Bound => "bound",
            LoanState::Accepted => "accepted",
            LoanState::Funding => "funding",
            LoanState::FundingPaused => "funding_paused",
            LoanState::Funded => "funded",
            LoanState::Disbursing => "disbursing",
            LoanState::DisbursingPaused => "disbursing_paused",
            LoanState::Disbursed => "disbursed",
            LoanState::Repaying => "repaying",
            LoanState::RepaymentPaused => "repayment_paused",
            LoanState::Repaid => "repaid",
            LoanState::Closed => "closed",
        }
    }
}

impl fmt::Display for LoanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Loan payment states
///
/// Completed and Failed are terminal for the normal flow; recovery out of
/// Failed requires an explicit reopen which is not modeled here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum LoanPaymentState {
    Created = 0,
    Pending = 10,
    Completed = 20,
    Failed = -10,
}

impl LoanPaymentState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoanPaymentState::Completed | LoanPaymentState::Failed)
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(LoanPaymentState::Created),
            10 => Some(LoanPaymentState::Pending),
            20 => Some(LoanPaymentState::Completed),
            -10 => Some(LoanPaymentState::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoanPaymentState::Created => "CREATED",
            LoanPaymentState::Pending => "PENDING",
            LoanPaymentState::Completed => "COMPLETED",
            LoanPaymentState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for LoanPaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payment step states
///
/// The step's recorded state selects the advance handler; a Failed step
/// must never observe further transfer activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum PaymentStepState {
    Created = 0,
    Pending = 10,
    Completed = 20,
    Failed = -10,
}

impl PaymentStepState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStepState::Completed | PaymentStepState::Failed)
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(PaymentStepState::Created),
            10 => Some(PaymentStepState::Pending),
            20 => Some(PaymentStepState::Completed),
            -10 => Some(PaymentStepState::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStepState::Created => "CREATED",
            PaymentStepState::Pending => "PENDING",
            PaymentStepState::Completed => "COMPLETED",
            PaymentStepState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PaymentStepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transfer states
///
/// The latest transfer (by attempt order) is authoritative for step
/// advancement. A transfer with a recorded error is permanently Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum TransferState {
    Created = 0,
    Pending = 10,
    Completed = 20,
    Failed = -10,
}

impl TransferState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Completed | TransferState::Failed)
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransferState::Created),
            10 => Some(TransferState::Pending),
            20 => Some(TransferState::Completed),
            -10 => Some(TransferState::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Created => "CREATED",
            TransferState::Pending => "PENDING",
            TransferState::Completed => "COMPLETED",
            TransferState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_state_roundtrip() {
        for state in [
            LoanPaymentState::Created,
            LoanPaymentState::Pending,
            LoanPaymentState::Completed,
            LoanPaymentState::Failed,
        ] {
            assert_eq!(LoanPaymentState::from_id(state.id()), Some(state));
        }
        assert_eq!(LoanPaymentState::from_id(99), None);
    }

    #[test]
    fn test_step_state_roundtrip() {
        for state in [
            PaymentStepState::Created,
            PaymentStepState::Pending,
            PaymentStepState::Completed,
            PaymentStepState::Failed,
        ] {
            assert_eq!(PaymentStepState::from_id(state.id()), Some(state));
        }
        assert_eq!(PaymentStepState::from_id(1), None);
    }

    #[test]
    fn test_transfer_state_terminal() {
        assert!(!TransferState::Created.is_terminal());
        assert!(!TransferState::Pending.is_terminal());
        assert!(TransferState::Completed.is_terminal());
        assert!(TransferState::Failed.is_terminal());
    }

    #[test]
    fn test_loan_state_display() {
        assert_eq!(LoanState::FundingPaused.to_string(), "funding_paused");
        assert_eq!(LoanState::Repaying.to_string(), "repaying");
    }
}
