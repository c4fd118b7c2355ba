//! Approval instances and the stateless approval state machine.
//!
//! `PENDING(step) -> APPROVED | REJECTED | CANCELLED`. Every transition is
//! computed here from a snapshot; the service commits the resulting approval
//! and audit action together under the approval's version check.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use carehome_shared::types::{ApprovalActionId, ApprovalId, OrganizationId, UserId, WorkflowId};

use super::condition::Attributes;
use super::definition::ApprovalWorkflow;
use super::error::WorkflowError;
use super::types::{ActionKind, ApprovalStatus, ResourceRef};
use crate::identity::{ActorContext, Role};

/// One in-flight or concluded run of a workflow against a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    /// Unique identifier.
    pub id: ApprovalId,
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Gated resource.
    pub resource: ResourceRef,
    /// Workflow template.
    pub workflow_id: WorkflowId,
    /// Step the approval waits on (or concluded at).
    pub current_step_order: u32,
    /// Role required by the current step while pending.
    pub current_role: Option<Role>,
    /// Lifecycle status.
    pub status: ApprovalStatus,
    /// Attributes the step conditions are evaluated against.
    pub attributes: Attributes,
    /// Deadline of the current step.
    pub timeout_at: Option<DateTime<Utc>>,
    /// Requesting user.
    pub requested_by: UserId,
    /// Request time.
    pub requested_at: DateTime<Utc>,
    /// Set when the approval becomes terminal.
    pub completed_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency version.
    pub version: u64,
}

impl Approval {
    /// Returns true if the approval is pending and its step deadline passed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::Pending && self.timeout_at.is_some_and(|t| t <= now)
    }
}

/// Immutable audit record of one decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalAction {
    /// Unique identifier.
    pub id: ApprovalActionId,
    /// Owning approval.
    pub approval_id: ApprovalId,
    /// Step the decision was made at.
    pub step_order: u32,
    /// Acting user ([`UserId::SYSTEM`] for timeouts).
    pub actor: UserId,
    /// Role the actor acted in.
    pub role: Option<Role>,
    /// Decision.
    pub kind: ActionKind,
    /// Comments; mandatory for rejections and change requests.
    pub comments: Option<String>,
    /// Decision time.
    pub created_at: DateTime<Utc>,
}

/// What a transition did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Moved to the next applicable step.
    Advanced {
        /// Step now pending.
        to_step: u32,
    },
    /// Final applicable step approved.
    Approved,
    /// Rejected by a role-holder.
    Rejected,
    /// Changes requested; still pending at the same step.
    ChangesRequested,
    /// Rejected by the timeout sweep.
    TimedOut,
}

impl Outcome {
    /// Returns true if the gated resource must be finalized.
    #[must_use]
    pub const fn finalizes(&self) -> bool {
        matches!(self, Self::Approved)
    }

    /// Returns true if the gated resource must be voided.
    #[must_use]
    pub const fn voids(&self) -> bool {
        matches!(self, Self::Rejected | Self::TimedOut)
    }
}

/// Result of deciding on an approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Approval after the transition.
    pub approval: Approval,
    /// Audit action to append.
    pub action: ApprovalAction,
    /// What happened.
    pub outcome: Outcome,
}

/// A role-holder's decision request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActInput {
    /// Decision.
    pub kind: ActionKind,
    /// Comments.
    pub comments: Option<String>,
    /// Step the actor saw when deciding. A mismatch means someone else
    /// already advanced the approval.
    pub expected_step: Option<u32>,
}

impl ActInput {
    /// Approve without comments.
    #[must_use]
    pub fn approve() -> Self {
        Self {
            kind: ActionKind::Approved,
            comments: None,
            expected_step: None,
        }
    }

    /// Reject with a reason.
    #[must_use]
    pub fn reject(reason: &str) -> Self {
        Self {
            kind: ActionKind::Rejected,
            comments: Some(reason.to_string()),
            expected_step: None,
        }
    }

    /// Request changes with a note.
    #[must_use]
    pub fn request_changes(note: &str) -> Self {
        Self {
            kind: ActionKind::RequestedChanges,
            comments: Some(note.to_string()),
            expected_step: None,
        }
    }

    /// Pins the decision to a step, builder style.
    #[must_use]
    pub fn at_step(mut self, step: u32) -> Self {
        self.expected_step = Some(step);
        self
    }
}

/// Stateless approval state machine.
pub struct ApprovalMachine;

impl ApprovalMachine {
    /// Opens an approval against `workflow`.
    ///
    /// The approval waits on the first applicable step. When no step applies
    /// the approval is created already APPROVED.
    pub fn open(
        workflow: &ApprovalWorkflow,
        resource: ResourceRef,
        attributes: Attributes,
        requested_by: UserId,
        now: DateTime<Utc>,
    ) -> Result<Approval, WorkflowError> {
        if !workflow.active {
            return Err(WorkflowError::WorkflowInactive(workflow.id));
        }
        if workflow.resource_kind != resource.kind {
            return Err(WorkflowError::ResourceKindMismatch {
                workflow_id: workflow.id,
                expected: workflow.resource_kind,
                actual: resource.kind,
            });
        }

        let mut approval = Approval {
            id: ApprovalId::new(),
            organization_id: workflow.organization_id,
            resource,
            workflow_id: workflow.id,
            current_step_order: 1,
            current_role: None,
            status: ApprovalStatus::Pending,
            attributes,
            timeout_at: None,
            requested_by,
            requested_at: now,
            completed_at: None,
            version: 0,
        };

        match workflow.first_applicable(&approval.attributes) {
            Some(step) => {
                approval.current_step_order = step.order;
                approval.current_role = Some(step.role.clone());
                approval.timeout_at = step.deadline(now);
            }
            None => {
                approval.status = ApprovalStatus::Approved;
                approval.completed_at = Some(now);
            }
        }
        Ok(approval)
    }

    /// Applies a role-holder's decision.
    ///
    /// Checks, in order: terminal state, stale step, role, comments.
    pub fn decide(
        workflow: &ApprovalWorkflow,
        approval: &Approval,
        actor: &ActorContext,
        input: &ActInput,
        now: DateTime<Utc>,
    ) -> Result<Decision, WorkflowError> {
        Self::ensure_pending(approval)?;
        if let Some(expected) = input.expected_step
            && expected != approval.current_step_order
        {
            return Err(WorkflowError::StepAlreadyAdvanced {
                approval_id: approval.id,
                expected,
                current: approval.current_step_order,
            });
        }

        let step = workflow
            .step(approval.current_step_order)
            .ok_or(WorkflowError::StepMissing {
                workflow_id: workflow.id,
                order: approval.current_step_order,
            })?;
        if !actor.has_role(&step.role) {
            return Err(WorkflowError::RoleMismatch {
                approval_id: approval.id,
                required: step.role.clone(),
            });
        }

        let comments = input
            .comments
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        if input.kind.requires_comments() && comments.is_none() {
            return Err(WorkflowError::CommentsRequired(input.kind));
        }

        let mut next = approval.clone();
        let outcome = match input.kind {
            ActionKind::Approved => {
                match workflow.next_applicable_after(step.order, &approval.attributes) {
                    Some(following) => {
                        next.current_step_order = following.order;
                        next.current_role = Some(following.role.clone());
                        next.timeout_at = following.deadline(now);
                        Outcome::Advanced {
                            to_step: following.order,
                        }
                    }
                    None => {
                        Self::conclude(&mut next, ApprovalStatus::Approved, now);
                        Outcome::Approved
                    }
                }
            }
            ActionKind::Rejected => {
                Self::conclude(&mut next, ApprovalStatus::Rejected, now);
                Outcome::Rejected
            }
            ActionKind::RequestedChanges => Outcome::ChangesRequested,
        };

        let action = ApprovalAction {
            id: ApprovalActionId::new(),
            approval_id: approval.id,
            step_order: step.order,
            actor: actor.user_id,
            role: Some(step.role.clone()),
            kind: input.kind,
            comments,
            created_at: now,
        };

        Ok(Decision {
            approval: next,
            action,
            outcome,
        })
    }

    /// Cancels a pending approval on behalf of its requester or an admin.
    pub fn cancel(
        approval: &Approval,
        actor: &ActorContext,
        admin_role: &Role,
        actions_recorded: usize,
        now: DateTime<Utc>,
    ) -> Result<Approval, WorkflowError> {
        Self::ensure_pending(approval)?;
        if actor.user_id != approval.requested_by && !actor.has_role(admin_role) {
            return Err(WorkflowError::NotRequester(approval.id));
        }
        if actions_recorded > 0 {
            return Err(WorkflowError::DecisionsRecorded(approval.id));
        }

        let mut next = approval.clone();
        Self::conclude(&mut next, ApprovalStatus::Cancelled, now);
        Ok(next)
    }

    /// Rejects a pending approval whose step deadline has passed.
    pub fn expire(approval: &Approval, now: DateTime<Utc>) -> Result<Decision, WorkflowError> {
        Self::ensure_pending(approval)?;
        if !approval.is_expired(now) {
            return Err(WorkflowError::NotExpired(approval.id));
        }

        let mut next = approval.clone();
        Self::conclude(&mut next, ApprovalStatus::Rejected, now);
        let action = ApprovalAction {
            id: ApprovalActionId::new(),
            approval_id: approval.id,
            step_order: approval.current_step_order,
            actor: UserId::SYSTEM,
            role: approval.current_role.clone(),
            kind: ActionKind::Rejected,
            comments: Some(format!(
                "Timed out at step {} without a decision",
                approval.current_step_order
            )),
            created_at: now,
        };

        Ok(Decision {
            approval: next,
            action,
            outcome: Outcome::TimedOut,
        })
    }

    fn ensure_pending(approval: &Approval) -> Result<(), WorkflowError> {
        if approval.status.is_terminal() {
            return Err(WorkflowError::AlreadyTerminal {
                approval_id: approval.id,
                status: approval.status,
            });
        }
        Ok(())
    }

    fn conclude(approval: &mut Approval, status: ApprovalStatus, now: DateTime<Utc>) {
        approval.status = status;
        approval.completed_at = Some(now);
        approval.current_role = None;
        approval.timeout_at = None;
    }
}
