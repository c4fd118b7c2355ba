//! Patient contracts and their monthly billing periods.
//!
//! A period tracks what the patient paid against what was charged and spent
//! on their behalf:
//!
//! ```text
//! balance = total_paid - (total_charged + total_expenses)
//! ```
//!
//! A negative balance means the patient owes money. Settling recognizes a
//! positive balance as revenue; a negative one is carried into the next
//! period as a charge line.
//!
//! # Modules
//!
//! - `types` - Contracts, periods, postings and service inputs
//! - `balance` - Totals rebuilt from postings
//! - `posting` - Validated construction of postings
//! - `error` - Billing-specific error types
//! - `service` - Billing service over the repository port

pub mod balance;
pub mod error;
pub mod posting;
pub mod service;
pub mod types;

#[cfg(test)]
mod balance_props;

pub use balance::{PeriodTotals, Postings};
pub use error::BillingError;
pub use service::{
    BillingPolicy, BillingService, Closing, Completion, Posted, REVENUE_CATEGORY,
    ReconciliationReport,
};
pub use types::{
    BillingPeriod, CarriedDebt, Charge, ChargeType, Contract, ContractStatus, NewContract,
    OpenPeriod, OpeningPayment, PatientExpense, Payment, PaymentMethod, PaymentStatus,
    PeriodCalendar, PeriodStatus, PostCharge, PostExpense, RecordPayment,
};
