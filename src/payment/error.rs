//! Payment Error Types
//!
//! The taxonomy separates hard faults (surfaced as errors) from soft
//! validation failures, which never become errors: initiation
//! preconditions that are not met log and yield `Ok(None)` instead.

use thiserror::Error;

/// Hard faults surfaced to callers. Event handlers catch these, log them
/// and treat the delivery as failed without killing the process.
#[derive(Error, Debug, Clone)]
pub enum PaymentError {
    /// A required id was absent; fails before any I/O
    #[error("missing input: {0}")]
    MissingInput(&'static str),

    #[error("{entity} not found: {id}")]
    EntityNotFound { entity: &'static str, id: String },

    /// A step/transfer state combination that must be impossible,
    /// e.g. a Failed step observing new transfer activity
    #[error("state out of sync: {0}")]
    OutOfSync(String),

    #[error("store error: {0}")]
    Store(String),

    /// A factory was built without a mapping for an enum value
    #[error("unmapped {kind}: {value}")]
    Unmapped { kind: &'static str, value: String },
}

impl PaymentError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        PaymentError::EntityNotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable code for operator-facing logs
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::MissingInput(_) => "MISSING_INPUT",
            PaymentError::EntityNotFound { .. } => "ENTITY_NOT_FOUND",
            PaymentError::OutOfSync(_) => "OUT_OF_SYNC",
            PaymentError::Store(_) => "STORE_ERROR",
            PaymentError::Unmapped { .. } => "UNMAPPED_VARIANT",
        }
    }

    #[inline]
    pub fn is_out_of_sync(&self) -> bool {
        matches!(self, PaymentError::OutOfSync(_))
    }
}

pub type PaymentResult<T> = Result<T, PaymentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(PaymentError::MissingInput("loan id").code(), "MISSING_INPUT");
        assert_eq!(
            PaymentError::not_found("Transfer", "t-1").code(),
            "ENTITY_NOT_FOUND"
        );
        assert_eq!(PaymentError::OutOfSync("x".into()).code(), "OUT_OF_SYNC");
    }

    #[test]
    fn test_display() {
        let err = PaymentError::not_found("Loan", "abc");
        assert_eq!(err.to_string(), "Loan not found: abc");
        assert!(PaymentError::OutOfSync("step".into()).is_out_of_sync());
    }
}
