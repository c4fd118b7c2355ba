//! Ledger error types.

use thiserror::Error;

use carehome_shared::AppError;
use carehome_shared::types::{Money, TransactionId};

use crate::store::StoreError;

/// Errors that can occur during ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Amount must be strictly positive.
    #[error("Transaction amount must be positive, got {0}")]
    NonPositiveAmount(Money),

    /// Amount exceeds the storable range.
    #[error("Transaction amount {0} is out of range")]
    AmountOutOfRange(Money),

    /// Realization happens exactly once.
    #[error("Transaction {0} is already realized")]
    AlreadyRealized(TransactionId),

    /// Deferred transaction was dropped.
    #[error("Transaction {0} was cancelled")]
    Cancelled(TransactionId),

    /// Transaction not found.
    #[error("Transaction {0} not found")]
    TransactionNotFound(TransactionId),

    /// Month outside 1..=12 or unrepresentable year.
    #[error("Invalid reporting month {year}-{month}")]
    InvalidMonth {
        /// Requested year.
        year: i32,
        /// Requested month.
        month: u32,
    },

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        AppError::from(self.clone()).status_code()
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NonPositiveAmount(_) => "NON_POSITIVE_AMOUNT",
            Self::AmountOutOfRange(_) => "AMOUNT_OUT_OF_RANGE",
            Self::AlreadyRealized(_) => "ALREADY_REALIZED",
            Self::Cancelled(_) => "TRANSACTION_CANCELLED",
            Self::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            Self::InvalidMonth { .. } => "INVALID_MONTH",
            Self::Store(e) => e.error_code(),
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NonPositiveAmount(_)
            | LedgerError::AmountOutOfRange(_)
            | LedgerError::InvalidMonth { .. } => Self::Validation(err.to_string()),
            LedgerError::AlreadyRealized(_) | LedgerError::Cancelled(_) => {
                Self::InvalidState(err.to_string())
            }
            LedgerError::TransactionNotFound(_) => Self::NotFound(err.to_string()),
            LedgerError::Store(e) => e.into(),
        }
    }
}
