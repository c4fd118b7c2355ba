//! Persistence collaborator error types.

use thiserror::Error;
use uuid::Uuid;

use carehome_shared::AppError;

/// Errors returned by a store implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Optimistic version check failed: someone committed first.
    #[error("Concurrent modification of {entity} {id}: expected version {expected}, found {found}")]
    VersionConflict {
        /// Entity family.
        entity: &'static str,
        /// Entity id.
        id: Uuid,
        /// Version the writer read.
        expected: u64,
        /// Version currently stored.
        found: u64,
    },

    /// Insert of an id that already exists.
    #[error("{entity} {id} already exists")]
    Duplicate {
        /// Entity family.
        entity: &'static str,
        /// Entity id.
        id: Uuid,
    },

    /// Update of an id that does not exist.
    #[error("{entity} {id} does not exist")]
    Missing {
        /// Entity family.
        entity: &'static str,
        /// Entity id.
        id: Uuid,
    },

    /// A uniqueness constraint across records was violated.
    #[error("Unique constraint {constraint} violated for {key}")]
    UniqueViolation {
        /// Constraint name.
        constraint: &'static str,
        /// Offending key.
        key: String,
    },

    /// Transient failure (timeout, deadlock, connection loss).
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Returns true if the operation may succeed when re-run from a fresh read.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::VersionConflict { .. } | Self::Unavailable(_))
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::VersionConflict { .. } => "CONCURRENT_MODIFICATION",
            Self::Duplicate { .. } => "DUPLICATE_RECORD",
            Self::Missing { .. } => "MISSING_RECORD",
            Self::UniqueViolation { .. } => "UNIQUE_VIOLATION",
            Self::Unavailable(_) => "STORE_UNAVAILABLE",
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation { .. } => Self::Conflict(err.to_string()),
            StoreError::VersionConflict { .. } | StoreError::Unavailable(_) => {
                Self::Infrastructure(err.to_string())
            }
            StoreError::Duplicate { .. } | StoreError::Missing { .. } => {
                Self::Internal(err.to_string())
            }
        }
    }
}
