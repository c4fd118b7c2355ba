//! Application-wide error taxonomy.
//!
//! Every engine error converts into one of these variants before it reaches
//! the caller. Business-rule violations are surfaced verbatim and never
//! retried; only `Infrastructure` represents an exhausted transient failure.

use thiserror::Error;

use crate::types::Money;

/// Result type alias using `AppError`.
pub type AppResult<T> = Result<T, AppError>;

/// Application error types.
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed or out-of-range input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Duplicate open record for the same key.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Action not permitted in the current lifecycle state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Actor's role does not satisfy the requirement.
    #[error("Access denied: {0}")]
    Forbidden(String),

    /// Contract completion attempted while the patient still owes money.
    #[error("Payment incomplete: outstanding balance {outstanding}")]
    PaymentIncomplete {
        /// Amount the patient still owes.
        outstanding: Money,
    },

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transient persistence failure that survived all retries.
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),

    /// Internal error (misconfiguration, broken invariant).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) | Self::InvalidState(_) => 409,
            Self::PaymentIncomplete { .. } => 422,
            Self::Infrastructure(_) => 503,
            Self::Internal(_) => 500,
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::PaymentIncomplete { .. } => "PAYMENT_INCOMPLETE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Infrastructure(_) => "INFRASTRUCTURE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns true if the caller may retry the request unchanged.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Infrastructure(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(AppError::Validation(String::new()), 400, "VALIDATION_ERROR")]
    #[case(AppError::Conflict(String::new()), 409, "CONFLICT")]
    #[case(AppError::InvalidState(String::new()), 409, "INVALID_STATE")]
    #[case(AppError::Forbidden(String::new()), 403, "FORBIDDEN")]
    #[case(
        AppError::PaymentIncomplete { outstanding: Money::new(1) },
        422,
        "PAYMENT_INCOMPLETE"
    )]
    #[case(AppError::NotFound(String::new()), 404, "NOT_FOUND")]
    #[case(AppError::Infrastructure(String::new()), 503, "INFRASTRUCTURE_ERROR")]
    #[case(AppError::Internal(String::new()), 500, "INTERNAL_ERROR")]
    fn test_error_codes(#[case] err: AppError, #[case] status: u16, #[case] code: &str) {
        assert_eq!(err.status_code(), status);
        assert_eq!(err.error_code(), code);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            AppError::Validation("msg".into()).to_string(),
            "Validation error: msg"
        );
        assert_eq!(
            AppError::InvalidState("msg".into()).to_string(),
            "Invalid state: msg"
        );
        assert_eq!(
            AppError::Forbidden("msg".into()).to_string(),
            "Access denied: msg"
        );
        assert_eq!(
            AppError::PaymentIncomplete {
                outstanding: Money::new(200_000)
            }
            .to_string(),
            "Payment incomplete: outstanding balance Rp 200.000"
        );
    }

    #[test]
    fn test_only_infrastructure_is_transient() {
        assert!(AppError::Infrastructure("timeout".into()).is_transient());
        assert!(!AppError::Conflict("dup".into()).is_transient());
        assert!(!AppError::InvalidState("settled".into()).is_transient());
    }
}
