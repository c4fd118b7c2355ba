//! Shared types, errors, and configuration for the care-facility finance engine.
//!
//! This crate provides common types used across all other crates:
//! - Whole-unit money type
//! - Typed IDs for type-safe entity references
//! - Human-readable document codes
//! - Application-wide error taxonomy
//! - Configuration management

pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{AppError, AppResult};
