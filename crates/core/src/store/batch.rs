//! Write batches committed all-or-nothing.
//!
//! Mutable entities carry the `version` they were read at. A store accepts a
//! versioned write only if the stored version still matches, then bumps it.
//! New records are written with version 0. Append-only records (charges,
//! patient expenses, approval actions) are insert-only.

use crate::billing::{BillingPeriod, Charge, Contract, PatientExpense, Payment};
use crate::ledger::Transaction;
use crate::requests::{OperationalExpense, ProcurementRequest};
use crate::workflow::{Approval, ApprovalAction, ApprovalWorkflow};

/// An entity that participates in optimistic concurrency control.
pub trait Versioned {
    /// Version the entity was read at (0 for a new record).
    fn version(&self) -> u64;

    /// Overwrites the version (stores only).
    fn set_version(&mut self, version: u64);
}

macro_rules! versioned {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Versioned for $ty {
                fn version(&self) -> u64 {
                    self.version
                }

                fn set_version(&mut self, version: u64) {
                    self.version = version;
                }
            }
        )+
    };
}

versioned!(
    Contract,
    BillingPeriod,
    Payment,
    Transaction,
    ApprovalWorkflow,
    Approval,
    OperationalExpense,
    ProcurementRequest,
);

/// One record write inside a batch.
#[derive(Debug, Clone)]
pub enum Write {
    /// Insert or versioned update of a contract.
    Contract(Contract),
    /// Insert or versioned update of a billing period.
    Period(BillingPeriod),
    /// Insert of a charge line.
    Charge(Charge),
    /// Insert of a patient expense.
    PatientExpense(PatientExpense),
    /// Insert or versioned update of a payment.
    Payment(Payment),
    /// Insert or versioned update of a ledger transaction.
    Transaction(Transaction),
    /// Insert or versioned update of a workflow template.
    Workflow(ApprovalWorkflow),
    /// Insert or versioned update of an approval.
    Approval(Approval),
    /// Insert of an approval audit action.
    ApprovalAction(ApprovalAction),
    /// Insert or versioned update of an operational expense.
    OperationalExpense(OperationalExpense),
    /// Insert or versioned update of a procurement request.
    Procurement(ProcurementRequest),
}

macro_rules! write_from {
    ($($variant:ident => $ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for Write {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )+
    };
}

write_from!(
    Contract => Contract,
    Period => BillingPeriod,
    Charge => Charge,
    PatientExpense => PatientExpense,
    Payment => Payment,
    Transaction => Transaction,
    Workflow => ApprovalWorkflow,
    Approval => Approval,
    ApprovalAction => ApprovalAction,
    OperationalExpense => OperationalExpense,
    Procurement => ProcurementRequest,
);

/// An ordered set of writes that commit together or not at all.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a write.
    pub fn push(&mut self, write: impl Into<Write>) {
        self.writes.push(write.into());
    }

    /// Appends a write, builder style.
    #[must_use]
    pub fn with(mut self, write: impl Into<Write>) -> Self {
        self.push(write);
        self
    }

    /// Number of writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Returns true if the batch holds no writes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Iterates over the writes in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Write> {
        self.writes.iter()
    }

    /// Consumes the batch.
    #[must_use]
    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }
}

impl IntoIterator for WriteBatch {
    type Item = Write;
    type IntoIter = std::vec::IntoIter<Write>;

    fn into_iter(self) -> Self::IntoIter {
        self.writes.into_iter()
    }
}
