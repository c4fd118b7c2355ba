//! Billing error types.
//!
//! Errors carry the entity id and the state that blocked the operation so
//! the caller can render a specific message.

use thiserror::Error;

use carehome_shared::AppError;
use carehome_shared::types::{BillingPeriodId, ContractId, Money, PaymentId};

use super::types::{ChargeType, ContractStatus, PaymentStatus, PeriodStatus};
use crate::identity::Role;
use crate::ledger::LedgerError;
use crate::store::{StoreError, TransientError};

/// Errors that can occur during billing operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BillingError {
    // ========== Validation Errors ==========
    /// Amount must be strictly positive.
    #[error("Amount must be positive, got {0}")]
    NonPositiveAmount(Money),

    /// Arithmetic left the storable range.
    #[error("Amount overflow computing {0}")]
    AmountOverflow(&'static str),

    /// Cash payment above what the patient owes.
    #[error("Cash payment {amount} exceeds outstanding balance {outstanding}")]
    ExceedsOutstanding {
        /// Requested amount.
        amount: Money,
        /// What the patient owes.
        outstanding: Money,
    },

    /// Bank transfers need a reference.
    #[error("Bank transfer requires a bank reference")]
    MissingBankReference,

    /// Engine-only charge type posted by a user.
    #[error("{0} charges are posted by the engine only")]
    ReservedChargeType(ChargeType),

    /// Other malformed input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========== Lookup Errors ==========
    /// Contract not found.
    #[error("Contract {0} not found")]
    ContractNotFound(ContractId),

    /// Period not found.
    #[error("Billing period {0} not found")]
    PeriodNotFound(BillingPeriodId),

    /// Payment not found.
    #[error("Payment {0} not found")]
    PaymentNotFound(PaymentId),

    // ========== Conflict Errors ==========
    /// An ACTIVE or OVERDUE period already exists.
    #[error("Contract {contract_id} already has open period {period_id}")]
    PeriodAlreadyOpen {
        /// Contract.
        contract_id: ContractId,
        /// The open period.
        period_id: BillingPeriodId,
    },

    /// A period for the month already exists.
    #[error("Contract {contract_id} already has a period for {year}-{month:02}")]
    DuplicateMonth {
        /// Contract.
        contract_id: ContractId,
        /// Year.
        year: i32,
        /// Month.
        month: u32,
    },

    // ========== State Errors ==========
    /// Contract is not ACTIVE.
    #[error("Contract {contract_id} is {status}")]
    ContractNotActive {
        /// Contract.
        contract_id: ContractId,
        /// Current status.
        status: ContractStatus,
    },

    /// Period does not accept this posting in its current status.
    #[error("Billing period {period_id} is {status} and does not accept {posting}")]
    PeriodClosed {
        /// Period.
        period_id: BillingPeriodId,
        /// Current status.
        status: PeriodStatus,
        /// What was attempted.
        posting: &'static str,
    },

    /// Payment is not PENDING.
    #[error("Payment {payment_id} is {status}")]
    PaymentNotPending {
        /// Payment.
        payment_id: PaymentId,
        /// Current status.
        status: PaymentStatus,
    },

    /// Contract has no ACTIVE or OVERDUE period to pay into.
    #[error("Contract {0} has no open billing period")]
    NoOpenPeriod(ContractId),

    /// Deferral needs a non-negative balance.
    #[error("Billing period {period_id} cannot be deferred with balance {balance}")]
    CannotDefer {
        /// Period.
        period_id: BillingPeriodId,
        /// Current balance.
        balance: Money,
    },

    /// Completion blocked by money owed.
    #[error("Contract {contract_id} still owes {outstanding}")]
    PaymentIncomplete {
        /// Contract.
        contract_id: ContractId,
        /// Total owed.
        outstanding: Money,
    },

    // ========== Authorization Errors ==========
    /// Actor lacks the verification role.
    #[error("Verifying payments requires role {0}")]
    NotVerifier(Role),

    // ========== Wrapped Errors ==========
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

impl BillingError {
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
            Self::AmountOverflow(_) => "AMOUNT_OVERFLOW",
            Self::ExceedsOutstanding { .. } => "EXCEEDS_OUTSTANDING",
            Self::MissingBankReference => "MISSING_BANK_REFERENCE",
            Self::ReservedChargeType(_) => "RESERVED_CHARGE_TYPE",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::ContractNotFound(_) => "CONTRACT_NOT_FOUND",
            Self::PeriodNotFound(_) => "PERIOD_NOT_FOUND",
            Self::PaymentNotFound(_) => "PAYMENT_NOT_FOUND",
            Self::PeriodAlreadyOpen { .. } => "PERIOD_ALREADY_OPEN",
            Self::DuplicateMonth { .. } => "DUPLICATE_PERIOD_MONTH",
            Self::ContractNotActive { .. } => "CONTRACT_NOT_ACTIVE",
            Self::PeriodClosed { .. } => "PERIOD_CLOSED",
            Self::PaymentNotPending { .. } => "PAYMENT_NOT_PENDING",
            Self::NoOpenPeriod(_) => "NO_OPEN_PERIOD",
            Self::CannotDefer { .. } => "CANNOT_DEFER",
            Self::PaymentIncomplete { .. } => "PAYMENT_INCOMPLETE",
            Self::NotVerifier(_) => "NOT_VERIFIER",
            Self::Ledger(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
            Self::RetriesExhausted { .. } => "RETRIES_EXHAUSTED",
        }
    }
}

impl TransientError for BillingError {
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

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        use BillingError as E;
        match err {
            E::NonPositiveAmount(_)
            | E::AmountOverflow(_)
            | E::ExceedsOutstanding { .. }
            | E::MissingBankReference
            | E::ReservedChargeType(_)
            | E::InvalidInput(_) => Self::Validation(err.to_string()),
            E::ContractNotFound(_) | E::PeriodNotFound(_) | E::PaymentNotFound(_) => {
                Self::NotFound(err.to_string())
            }
            E::PeriodAlreadyOpen { .. } | E::DuplicateMonth { .. } => {
                Self::Conflict(err.to_string())
            }
            E::ContractNotActive { .. }
            | E::PeriodClosed { .. }
            | E::PaymentNotPending { .. }
            | E::NoOpenPeriod(_)
            | E::CannotDefer { .. } => Self::InvalidState(err.to_string()),
            E::PaymentIncomplete { outstanding, .. } => Self::PaymentIncomplete { outstanding },
            E::NotVerifier(_) => Self::Forbidden(err.to_string()),
            E::Ledger(e) => e.into(),
            E::Store(e) => e.into(),
            E::RetriesExhausted { .. } => Self::Infrastructure(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use uuid::Uuid;

    fn period_id() -> BillingPeriodId {
        BillingPeriodId::from_uuid(Uuid::nil())
    }

    #[rstest]
    #[case(BillingError::NonPositiveAmount(Money::ZERO), 400, "NON_POSITIVE_AMOUNT")]
    #[case(
        BillingError::ExceedsOutstanding { amount: Money::new(2), outstanding: Money::new(1) },
        400,
        "EXCEEDS_OUTSTANDING"
    )]
    #[case(
        BillingError::PeriodAlreadyOpen {
            contract_id: ContractId::from_uuid(Uuid::nil()),
            period_id: period_id(),
        },
        409,
        "PERIOD_ALREADY_OPEN"
    )]
    #[case(
        BillingError::PeriodClosed {
            period_id: period_id(),
            status: PeriodStatus::Settled,
            posting: "charges",
        },
        409,
        "PERIOD_CLOSED"
    )]
    #[case(
        BillingError::PaymentIncomplete {
            contract_id: ContractId::from_uuid(Uuid::nil()),
            outstanding: Money::new(200_000),
        },
        422,
        "PAYMENT_INCOMPLETE"
    )]
    #[case(BillingError::NotVerifier(Role::new(Role::BENDAHARA)), 403, "NOT_VERIFIER")]
    #[case(BillingError::PeriodNotFound(period_id()), 404, "PERIOD_NOT_FOUND")]
    fn test_error_mapping(#[case] err: BillingError, #[case] status: u16, #[case] code: &str) {
        assert_eq!(err.status_code(), status);
        assert_eq!(err.error_code(), code);
    }

    #[test]
    fn test_payment_incomplete_carries_outstanding() {
        let err = BillingError::PaymentIncomplete {
            contract_id: ContractId::new(),
            outstanding: Money::new(200_000),
        };
        match AppError::from(err) {
            AppError::PaymentIncomplete { outstanding } => {
                assert_eq!(outstanding, Money::new(200_000));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_closed_period_message_names_state() {
        let err = BillingError::PeriodClosed {
            period_id: period_id(),
            status: PeriodStatus::Settled,
            posting: "expenses",
        };
        assert!(err.to_string().contains("SETTLED"));
        assert!(err.to_string().contains("expenses"));
    }
}
