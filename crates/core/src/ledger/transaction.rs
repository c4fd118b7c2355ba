//! Organization ledger transaction.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use carehome_shared::types::{
    BankAccountId, CodePrefix, DocumentCode, Money, OrganizationId, TransactionId, UserId,
};

use super::error::LedgerError;

/// Transaction type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    /// Income recognized by the organization.
    Revenue,
    /// Money spent by the organization.
    Expense,
    /// Owner capital paid in.
    CapitalInjection,
    /// Movement between cash and bank.
    Transfer,
}

/// Where the money sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    /// Petty cash.
    Cash,
    /// A bank account.
    Bank,
}

/// Kind of record that generated a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
    /// A patient payment.
    PatientPayment,
    /// A patient expense.
    PatientExpense,
    /// An operational expense.
    OperationalExpense,
    /// A settled or deferred billing period.
    BillingPeriod,
    /// A procurement request.
    Procurement,
    /// A capital injection.
    Capital,
}

impl ReferenceType {
    /// Returns the stored name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PatientPayment => "PATIENT_PAYMENT",
            Self::PatientExpense => "PATIENT_EXPENSE",
            Self::OperationalExpense => "OPERATIONAL_EXPENSE",
            Self::BillingPeriod => "BILLING_PERIOD",
            Self::Procurement => "PROCUREMENT",
            Self::Capital => "CAPITAL",
        }
    }
}

/// Polymorphic pointer to the record that generated a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceRef {
    /// Source record family.
    pub kind: ReferenceType,
    /// Source record id.
    pub id: Uuid,
}

impl SourceRef {
    /// Creates a source reference.
    pub fn new(kind: ReferenceType, id: impl Into<Uuid>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// Input for a new ledger transaction.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Transaction type.
    pub kind: TransactionType,
    /// Free-form category label.
    pub category: String,
    /// Amount, strictly positive.
    pub amount: Money,
    /// Cash or bank.
    pub account: AccountType,
    /// Bank account for `Bank` transactions.
    pub bank_account_id: Option<BankAccountId>,
    /// Generating record.
    pub source: SourceRef,
    /// Booking date.
    pub date: NaiveDate,
    /// Description.
    pub description: String,
    /// Recognize immediately, or defer until realization.
    pub realized: bool,
    /// Recording user.
    pub created_by: UserId,
}

/// An organization-wide ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique identifier.
    pub id: TransactionId,
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Document code (`TRX-...`).
    pub code: String,
    /// Transaction type.
    pub kind: TransactionType,
    /// Category label.
    pub category: String,
    /// Amount.
    pub amount: Money,
    /// Cash or bank.
    pub account: AccountType,
    /// Bank account reference.
    pub bank_account_id: Option<BankAccountId>,
    /// Generating record.
    pub source: SourceRef,
    /// Booking date.
    pub date: NaiveDate,
    /// Description.
    pub description: String,
    /// Whether the amount has been recognized.
    pub is_realized: bool,
    /// When it was recognized.
    pub realized_at: Option<DateTime<Utc>>,
    /// Set when a deferred transaction is dropped before realization.
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Recording user.
    pub created_by: UserId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Optimistic concurrency version.
    pub version: u64,
}

impl Transaction {
    /// Builds a transaction from validated input.
    pub fn new(input: NewTransaction, now: DateTime<Utc>) -> Result<Self, LedgerError> {
        if !input.amount.is_positive() {
            return Err(LedgerError::NonPositiveAmount(input.amount));
        }
        if !input.amount.in_range() {
            return Err(LedgerError::AmountOutOfRange(input.amount));
        }
        Ok(Self {
            id: TransactionId::new(),
            organization_id: input.organization_id,
            code: DocumentCode::generate(CodePrefix::Transaction, input.date),
            kind: input.kind,
            category: input.category,
            amount: input.amount,
            account: input.account,
            bank_account_id: input.bank_account_id,
            source: input.source,
            date: input.date,
            description: input.description,
            is_realized: input.realized,
            realized_at: input.realized.then_some(now),
            cancelled_at: None,
            created_by: input.created_by,
            created_at: now,
            version: 0,
        })
    }

    /// Returns true while the transaction awaits realization.
    #[must_use]
    pub fn is_pending_realization(&self) -> bool {
        !self.is_realized && self.cancelled_at.is_none()
    }

    /// Recognizes a deferred transaction. Happens exactly once.
    pub fn realize(&mut self, now: DateTime<Utc>) -> Result<(), LedgerError> {
        if self.is_realized {
            return Err(LedgerError::AlreadyRealized(self.id));
        }
        if self.cancelled_at.is_some() {
            return Err(LedgerError::Cancelled(self.id));
        }
        self.is_realized = true;
        self.realized_at = Some(now);
        Ok(())
    }

    /// Replaces the amount of a deferred transaction.
    pub fn restate(&mut self, amount: Money) -> Result<(), LedgerError> {
        if !self.is_pending_realization() {
            return Err(LedgerError::AlreadyRealized(self.id));
        }
        if !amount.is_positive() {
            return Err(LedgerError::NonPositiveAmount(amount));
        }
        self.amount = amount;
        Ok(())
    }

    /// Drops a deferred transaction that will never be recognized.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), LedgerError> {
        if self.is_realized {
            return Err(LedgerError::AlreadyRealized(self.id));
        }
        if self.cancelled_at.is_some() {
            return Err(LedgerError::Cancelled(self.id));
        }
        self.cancelled_at = Some(now);
        Ok(())
    }
}
