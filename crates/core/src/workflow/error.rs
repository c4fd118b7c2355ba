//! Workflow error types for approval lifecycle management.
//!
//! This module defines all error types that can occur during workflow
//! configuration, approval creation, decisions, cancellation and timeouts.

use thiserror::Error;

use carehome_shared::AppError;
use carehome_shared::types::{ApprovalId, WorkflowId};

use crate::identity::Role;
use crate::store::{StoreError, TransientError};
use crate::workflow::types::{ActionKind, ApprovalStatus, ResourceKind, ResourceRef};

/// Errors that can occur during workflow operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    // ========== Configuration Errors ==========
    /// Workflow definition is malformed.
    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    /// Two steps share the same order.
    #[error("Duplicate step order {0} in workflow")]
    DuplicateStepOrder(u32),

    /// Step condition blob could not be parsed.
    #[error("Invalid step condition: {0}")]
    InvalidCondition(String),

    /// Resource type name is not known.
    #[error("Unknown resource type {0}")]
    UnknownResourceKind(String),

    /// Another active workflow already gates this resource kind.
    #[error("An active workflow {existing} already gates {kind}")]
    ActiveWorkflowExists {
        /// Resource kind.
        kind: ResourceKind,
        /// Existing active workflow.
        existing: WorkflowId,
    },

    // ========== Lookup Errors ==========
    /// Workflow not found.
    #[error("Workflow {0} not found")]
    WorkflowNotFound(WorkflowId),

    /// No active workflow gates the resource kind.
    #[error("No active workflow for {0}")]
    NoActiveWorkflow(ResourceKind),

    /// Approval not found.
    #[error("Approval {0} not found")]
    ApprovalNotFound(ApprovalId),

    /// Workflow no longer contains the step the approval points at.
    #[error("Workflow {workflow_id} has no step {order}")]
    StepMissing {
        /// Workflow.
        workflow_id: WorkflowId,
        /// Missing step order.
        order: u32,
    },

    // ========== State Errors ==========
    /// Inactive workflows cannot open approvals.
    #[error("Workflow {0} is inactive")]
    WorkflowInactive(WorkflowId),

    /// Workflow is bound to another resource kind.
    #[error("Workflow {workflow_id} gates {expected}, not {actual}")]
    ResourceKindMismatch {
        /// Workflow.
        workflow_id: WorkflowId,
        /// Kind the workflow gates.
        expected: ResourceKind,
        /// Kind requested.
        actual: ResourceKind,
    },

    /// A non-terminal approval already exists for the resource.
    #[error(
        "Resource {resource} already has an open approval{}",
        existing.map(|id| format!(" {id}")).unwrap_or_default()
    )]
    AlreadyOpen {
        /// Gated resource.
        resource: ResourceRef,
        /// Existing approval, when known.
        existing: Option<ApprovalId>,
    },

    /// Approval is terminal.
    #[error("Approval {approval_id} is already {status}")]
    AlreadyTerminal {
        /// Approval.
        approval_id: ApprovalId,
        /// Its terminal status.
        status: ApprovalStatus,
    },

    /// Someone else moved the approval past the step the actor decided on.
    #[error("Approval {approval_id} moved from step {expected} to step {current}")]
    StepAlreadyAdvanced {
        /// Approval.
        approval_id: ApprovalId,
        /// Step the actor decided on.
        expected: u32,
        /// Step the approval is at now.
        current: u32,
    },

    /// Cancellation after a decision was recorded.
    #[error("Approval {0} already has recorded decisions; reject it instead")]
    DecisionsRecorded(ApprovalId),

    /// Timeout sweep found the deadline not yet passed.
    #[error("Approval {0} has not timed out")]
    NotExpired(ApprovalId),

    // ========== Authorization Errors ==========
    /// Actor lacks the step's role.
    #[error("Approval {approval_id} requires role {required}")]
    RoleMismatch {
        /// Approval.
        approval_id: ApprovalId,
        /// Required role.
        required: Role,
    },

    /// Only the requester or an administrator may cancel.
    #[error("Only the requester or an administrator may cancel approval {0}")]
    NotRequester(ApprovalId),

    // ========== Validation Errors ==========
    /// Rejections and change requests need comments.
    #[error("Comments are required for {0:?}")]
    CommentsRequired(ActionKind),

    // ========== Infrastructure Errors ==========
    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Transient failures outlasted the retry budget.
    #[error("{operation} gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Operation name.
        operation: &'static str,
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        source: StoreError,
    },
}

impl WorkflowError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        AppError::from(self.clone()).status_code()
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidWorkflow(_) => "INVALID_WORKFLOW",
            Self::DuplicateStepOrder(_) => "DUPLICATE_STEP_ORDER",
            Self::InvalidCondition(_) => "INVALID_CONDITION",
            Self::UnknownResourceKind(_) => "UNKNOWN_RESOURCE_TYPE",
            Self::ActiveWorkflowExists { .. } => "ACTIVE_WORKFLOW_EXISTS",
            Self::WorkflowNotFound(_) => "WORKFLOW_NOT_FOUND",
            Self::NoActiveWorkflow(_) => "NO_ACTIVE_WORKFLOW",
            Self::ApprovalNotFound(_) => "APPROVAL_NOT_FOUND",
            Self::StepMissing { .. } => "STEP_MISSING",
            Self::WorkflowInactive(_) => "WORKFLOW_INACTIVE",
            Self::ResourceKindMismatch { .. } => "RESOURCE_TYPE_MISMATCH",
            Self::AlreadyOpen { .. } => "APPROVAL_ALREADY_OPEN",
            Self::AlreadyTerminal { .. } => "APPROVAL_TERMINAL",
            Self::StepAlreadyAdvanced { .. } => "STEP_ALREADY_ADVANCED",
            Self::DecisionsRecorded(_) => "DECISIONS_RECORDED",
            Self::NotExpired(_) => "NOT_EXPIRED",
            Self::RoleMismatch { .. } => "ROLE_MISMATCH",
            Self::NotRequester(_) => "NOT_REQUESTER",
            Self::CommentsRequired(_) => "COMMENTS_REQUIRED",
            Self::Store(e) => e.error_code(),
            Self::RetriesExhausted { .. } => "RETRIES_EXHAUSTED",
        }
    }
}

impl TransientError for WorkflowError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_retryable())
    }

    fn exhausted(operation: &'static str, attempts: u32, last: Self) -> Self {
        match last {
            Self::Store(source) => Self::RetriesExhausted {
                operation,
                attempts,
                source,
            },
            other => other,
        }
    }
}

impl From<WorkflowError> for AppError {
    fn from(err: WorkflowError) -> Self {
        use WorkflowError as E;
        match err {
            E::InvalidWorkflow(_)
            | E::DuplicateStepOrder(_)
            | E::InvalidCondition(_)
            | E::UnknownResourceKind(_)
            | E::CommentsRequired(_) => Self::Validation(err.to_string()),
            E::ActiveWorkflowExists { .. } | E::AlreadyOpen { .. } => {
                Self::Conflict(err.to_string())
            }
            E::WorkflowNotFound(_) | E::NoActiveWorkflow(_) | E::ApprovalNotFound(_) => {
                Self::NotFound(err.to_string())
            }
            E::WorkflowInactive(_)
            | E::ResourceKindMismatch { .. }
            | E::AlreadyTerminal { .. }
            | E::StepAlreadyAdvanced { .. }
            | E::DecisionsRecorded(_)
            | E::NotExpired(_) => Self::InvalidState(err.to_string()),
            E::RoleMismatch { .. } | E::NotRequester(_) => Self::Forbidden(err.to_string()),
            E::StepMissing { .. } => Self::Internal(err.to_string()),
            E::RetriesExhausted { .. } => Self::Infrastructure(err.to_string()),
            E::Store(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use uuid::Uuid;

    #[rstest]
    #[case(WorkflowError::DuplicateStepOrder(2), 400, "DUPLICATE_STEP_ORDER")]
    #[case(WorkflowError::CommentsRequired(ActionKind::Rejected), 400, "COMMENTS_REQUIRED")]
    #[case(
        WorkflowError::AlreadyOpen {
            resource: ResourceRef::new(ResourceKind::Procurement, Uuid::nil()),
            existing: None,
        },
        409,
        "APPROVAL_ALREADY_OPEN"
    )]
    #[case(
        WorkflowError::AlreadyTerminal {
            approval_id: ApprovalId::from_uuid(Uuid::nil()),
            status: ApprovalStatus::Approved,
        },
        409,
        "APPROVAL_TERMINAL"
    )]
    #[case(
        WorkflowError::RoleMismatch {
            approval_id: ApprovalId::from_uuid(Uuid::nil()),
            required: Role::new(Role::KETUA),
        },
        403,
        "ROLE_MISMATCH"
    )]
    #[case(WorkflowError::NoActiveWorkflow(ResourceKind::Procurement), 404, "NO_ACTIVE_WORKFLOW")]
    #[case(
        WorkflowError::RetriesExhausted {
            operation: "act",
            attempts: 4,
            source: StoreError::Unavailable("timeout".into()),
        },
        503,
        "RETRIES_EXHAUSTED"
    )]
    fn test_error_mapping(#[case] err: WorkflowError, #[case] status: u16, #[case] code: &str) {
        assert_eq!(err.status_code(), status);
        assert_eq!(err.error_code(), code);
    }

    #[rstest]
    #[case(None, "Resource PROCUREMENT:00000000-0000-0000-0000-000000000000 already has an open approval")]
    #[case(
        Some(ApprovalId::from_uuid(Uuid::nil())),
        "Resource PROCUREMENT:00000000-0000-0000-0000-000000000000 already has an open approval 00000000-0000-0000-0000-000000000000"
    )]
    fn test_already_open_message(#[case] existing: Option<ApprovalId>, #[case] expected: &str) {
        let err = WorkflowError::AlreadyOpen {
            resource: ResourceRef::new(ResourceKind::Procurement, Uuid::nil()),
            existing,
        };
        assert_eq!(err.to_string(), expected);
    }

    #[test]
    fn test_terminal_error_mentions_status() {
        let err = WorkflowError::AlreadyTerminal {
            approval_id: ApprovalId::from_uuid(Uuid::nil()),
            status: ApprovalStatus::Rejected,
        };
        assert!(err.to_string().contains("REJECTED"));
    }

    #[test]
    fn test_exhausted_wraps_store_error() {
        let last = WorkflowError::Store(StoreError::Unavailable("deadlock".into()));
        assert!(last.is_transient());
        let wrapped = WorkflowError::exhausted("open", 4, last);
        assert!(matches!(wrapped, WorkflowError::RetriesExhausted { attempts: 4, .. }));
        assert!(!wrapped.is_transient());
    }
}
