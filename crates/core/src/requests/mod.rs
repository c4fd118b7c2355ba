//! Gated domain records.
//!
//! Operational expenses and procurement requests are created PENDING and
//! concluded by their approval: approval books an expense transaction,
//! rejection voids the record and releases its reservations. Pending bank
//! transfers can be routed through the same gate for verification.

pub mod error;
pub mod handlers;
pub mod service;
pub mod types;

pub use error::RequestError;
pub use handlers::{
    OperationalExpenseHandler, PROCUREMENT_CATEGORY, PaymentVerificationHandler,
    ProcurementHandler,
};
pub use service::{RequestService, Submitted};
pub use types::{
    NewOperationalExpense, NewProcurement, NewProcurementItem, OperationalExpense,
    ProcurementItem, ProcurementRequest, RequestStatus,
};
