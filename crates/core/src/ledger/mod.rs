//! Organization-wide ledger.
//!
//! Transactions record revenue, expenses, capital and transfers, each
//! pointing back at the record that generated it. Revenue accrued while a
//! patient is still resident stays unrealized until settlement or checkout.

pub mod error;
pub mod summary;
pub mod transaction;

pub use error::LedgerError;
pub use summary::{FinancialSummary, LedgerService, month_bounds};
pub use transaction::{
    AccountType, NewTransaction, ReferenceType, SourceRef, Transaction, TransactionType,
};
