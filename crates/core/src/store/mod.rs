//! Persistence ports, write batches and the retrying unit of work.
//!
//! # Modules
//!
//! - `batch` - All-or-nothing write batches and optimistic versioning
//! - `error` - Store error types
//! - `ports` - Repository traits implemented by the store crate
//! - `retry` - Bounded retry of transient store failures

pub mod batch;
pub mod error;
pub mod ports;
pub mod retry;

pub use batch::{Versioned, Write, WriteBatch};
pub use error::StoreError;
pub use ports::{
    ApprovalRepository, BillingRepository, LedgerRepository, LedgerStore, RequestRepository,
};
pub use retry::{RetryPolicy, TransientError};
