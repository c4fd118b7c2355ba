//! Common types used across the application.

pub mod code;
pub mod id;
pub mod money;

pub use code::{CodePrefix, DocumentCode};
pub use id::*;
pub use money::{Money, MoneyError};
