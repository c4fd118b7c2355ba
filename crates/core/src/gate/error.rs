//! Gate adapter error types.

use thiserror::Error;
use uuid::Uuid;

use carehome_shared::AppError;

use crate::workflow::{ResourceKind, WorkflowError};

/// Errors raised while gating a resource behind an approval.
#[derive(Debug, Error)]
pub enum GateError {
    /// No callback pair registered for the resource kind.
    #[error("No resource handler registered for {0}")]
    NoHandler(ResourceKind),

    /// The approval workflow refused the operation.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// The approval concluded but the resource callback failed.
    ///
    /// The approval stays committed; the callback can be redelivered.
    #[error("{kind} handler failed for resource {resource_id}: {source}")]
    Handler {
        /// Resource family.
        kind: ResourceKind,
        /// Resource id.
        resource_id: Uuid,
        /// Callback failure.
        source: AppError,
    },
}

impl GateError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NoHandler(_) => 500,
            Self::Workflow(e) => e.status_code(),
            Self::Handler { source, .. } => source.status_code(),
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NoHandler(_) => "NO_RESOURCE_HANDLER",
            Self::Workflow(e) => e.error_code(),
            Self::Handler { .. } => "RESOURCE_HANDLER_FAILED",
        }
    }
}

impl From<GateError> for AppError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::NoHandler(_) => Self::Internal(err.to_string()),
            GateError::Workflow(e) => e.into(),
            GateError::Handler { source, .. } => source,
        }
    }
}
