//! Approval gate adapter.
//!
//! Wraps domain actions whose completion waits on an approval. The domain
//! record is created in a held state, an approval is opened for it, and the
//! registered [`ResourceHandler`] is called back when the approval concludes:
//! `on_approved` finalizes the record, `on_rejected` voids it.

pub mod error;
pub mod handler;
pub mod service;

pub use error::GateError;
pub use handler::{GateContext, HandlerRegistry, ResourceHandler};
pub use service::ApprovalGate;
