//! Gated request error types.

use thiserror::Error;

use carehome_shared::AppError;
use carehome_shared::types::{Money, OperationalExpenseId, PaymentId, ProcurementId};

use super::types::RequestStatus;
use crate::billing::BillingError;
use crate::gate::GateError;
use crate::ledger::LedgerError;
use crate::store::{StoreError, TransientError};

/// Errors that can occur while submitting or concluding a gated request.
#[derive(Debug, Error)]
pub enum RequestError {
    // ========== Validation Errors ==========
    /// Amount must be strictly positive.
    #[error("Amount must be positive, got {0}")]
    NonPositiveAmount(Money),

    /// Other malformed input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========== Lookup Errors ==========
    /// Operational expense not found.
    #[error("Operational expense {0} not found")]
    ExpenseNotFound(OperationalExpenseId),

    /// Procurement request not found.
    #[error("Procurement request {0} not found")]
    ProcurementNotFound(ProcurementId),

    // ========== State Errors ==========
    /// The request already concluded the other way.
    #[error("Request {code} is {status}")]
    NotPending {
        /// Document code.
        code: String,
        /// Current status.
        status: RequestStatus,
    },

    /// Only pending bank transfers go through verification.
    #[error("Payment {0} is not a pending bank transfer")]
    NotVerifiable(PaymentId),

    // ========== Wrapped Errors ==========
    /// Approval gate failure.
    #[error(transparent)]
    Gate(#[from] GateError),

    /// Billing rule violated by a payment callback.
    #[error(transparent)]
    Billing(#[from] BillingError),

    /// Ledger rule violated.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Transient failures outlasted the retry budget.
    #[error("{operation} gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Operation name.
        operation: &'static str,
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        source: StoreError,
    },
}

impl RequestError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NonPositiveAmount(_) | Self::InvalidInput(_) => 400,
            Self::ExpenseNotFound(_) | Self::ProcurementNotFound(_) => 404,
            Self::NotPending { .. } | Self::NotVerifiable(_) => 409,
            Self::Gate(e) => e.status_code(),
            Self::Billing(e) => e.status_code(),
            Self::Ledger(e) => e.status_code(),
            Self::Store(e) => AppError::from(e.clone()).status_code(),
            Self::RetriesExhausted { .. } => 503,
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NonPositiveAmount(_) => "NON_POSITIVE_AMOUNT",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::ExpenseNotFound(_) => "OPERATIONAL_EXPENSE_NOT_FOUND",
            Self::ProcurementNotFound(_) => "PROCUREMENT_NOT_FOUND",
            Self::NotPending { .. } => "REQUEST_NOT_PENDING",
            Self::NotVerifiable(_) => "PAYMENT_NOT_VERIFIABLE",
            Self::Gate(e) => e.error_code(),
            Self::Billing(e) => e.error_code(),
            Self::Ledger(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
            Self::RetriesExhausted { .. } => "RETRIES_EXHAUSTED",
        }
    }
}

impl TransientError for RequestError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_retryable())
    }

    fn exhausted(operation: &'static str, attempts: u32, last: Self) -> Self {
        match last {
            Self::Store(source) => Self::RetriesExhausted {
                operation,
                attempts,
                source,
            },
            other => other,
        }
    }
}

impl From<RequestError> for AppError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::NonPositiveAmount(_) | RequestError::InvalidInput(_) => {
                Self::Validation(err.to_string())
            }
            RequestError::ExpenseNotFound(_) | RequestError::ProcurementNotFound(_) => {
                Self::NotFound(err.to_string())
            }
            RequestError::NotPending { .. } | RequestError::NotVerifiable(_) => {
                Self::InvalidState(err.to_string())
            }
            RequestError::Gate(e) => e.into(),
            RequestError::Billing(e) => e.into(),
            RequestError::Ledger(e) => e.into(),
            RequestError::Store(e) => e.into(),
            RequestError::RetriesExhausted { .. } => Self::Infrastructure(err.to_string()),
        }
    }
}
