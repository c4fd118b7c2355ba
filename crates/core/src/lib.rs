//! Core business logic for the care-facility finance engine.
//!
//! This crate contains the financial state machines with ZERO storage
//! dependencies. Persistence, identity and notification are consumed through
//! the ports declared in [`store`], [`identity`] and [`notify`].
//!
//! # Modules
//!
//! - `billing` - Contracts, monthly billing periods, charges, expenses and payments
//! - `ledger` - Organization-wide transactions and realization
//! - `workflow` - Multi-step, role-gated approval workflows
//! - `gate` - Wraps domain actions behind an approval
//! - `requests` - Gated domain records (operational expenses, procurement, payment verification)
//! - `store` - Repository ports, write batches and the retrying unit of work
//! - `identity` - Roles and explicit actor context
//! - `notify` - Fire-and-forget domain events and document generation

pub mod billing;
pub mod gate;
pub mod identity;
pub mod ledger;
pub mod notify;
pub mod requests;
pub mod store;
pub mod workflow;
