//! In-process persistence for the care-facility finance engine.
//!
//! [`MemoryStore`] implements every repository port of `carehome-core` with
//! the same guarantees a database-backed store must give: all-or-nothing
//! batches, optimistic version checks and the cross-record uniqueness
//! constraints (one open approval per resource, one active workflow per
//! resource kind, one billing period per contract month).
//! [`MemoryDirectory`] answers role membership lookups.

mod directory;
mod memory;

pub use directory::MemoryDirectory;
pub use memory::MemoryStore;
