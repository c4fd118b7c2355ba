//! Multi-step, role-gated approval workflows.
//!
//! A workflow is an ordered list of steps, each naming a role and an optional
//! condition over the gated resource's attributes. An approval walks the
//! applicable steps in order until it is approved, rejected, cancelled or
//! timed out.
//!
//! # Modules
//!
//! - `types` - Resource references, statuses and action kinds
//! - `condition` - Typed step conditions and the attribute bag
//! - `definition` - Workflow templates and steps
//! - `approval` - Approval records and the stateless state machine
//! - `error` - Workflow-specific error types
//! - `service` - Approval service over the repository port

pub mod approval;
pub mod condition;
pub mod definition;
pub mod error;
pub mod service;
pub mod types;

#[cfg(test)]
mod approval_props;
#[cfg(test)]
mod condition_props;

pub use approval::{
    ActInput, Approval, ApprovalAction, ApprovalMachine, Decision, Outcome,
};
pub use condition::{AMOUNT, AttributeValue, Attributes, Operator, Predicate, StepCondition};
pub use definition::{ApprovalStep, ApprovalWorkflow};
pub use error::WorkflowError;
pub use service::{ApprovalService, OpenApproval};
pub use types::{ActionKind, ApprovalStatus, ResourceKind, ResourceRef};
