//! Approval workflow service.
//!
//! Every operation reads a fresh snapshot, runs [`ApprovalMachine`] on it and
//! commits the approval together with its audit action. The approval's
//! version makes each transition a single atomic read-modify-write: of two
//! concurrent decisions only one commits, the other is re-run against the
//! winner's state and fails with an invalid-state error.

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use carehome_shared::config::ApprovalConfig;
use carehome_shared::types::{ApprovalId, WorkflowId};

use super::approval::{ActInput, Approval, ApprovalAction, ApprovalMachine, Decision, Outcome};
use super::condition::Attributes;
use super::definition::ApprovalWorkflow;
use super::error::WorkflowError;
use super::types::{ApprovalStatus, ResourceKind, ResourceRef};
use crate::identity::{ActorContext, Role};
use crate::notify::{DomainEvent, EventSink};
use crate::store::{ApprovalRepository, RetryPolicy, StoreError, WriteBatch};

/// Request to open an approval.
#[derive(Debug, Clone)]
pub struct OpenApproval {
    /// Gated resource.
    pub resource: ResourceRef,
    /// Attributes for step conditions.
    pub attributes: Attributes,
    /// Explicit workflow; defaults to the active workflow for the kind.
    pub workflow_id: Option<WorkflowId>,
}

/// Approval workflow engine over an [`ApprovalRepository`].
pub struct ApprovalService<R: ApprovalRepository> {
    repo: Arc<R>,
    events: Arc<dyn EventSink>,
    admin_role: Role,
    default_timeout_hours: Option<u32>,
    retry: RetryPolicy,
}

impl<R: ApprovalRepository> ApprovalService<R> {
    /// Creates a new approval service.
    #[must_use]
    pub fn new(repo: Arc<R>, events: Arc<dyn EventSink>, config: &ApprovalConfig) -> Self {
        Self {
            repo,
            events,
            admin_role: Role::new(&config.admin_role),
            default_timeout_hours: config.default_step_timeout_hours,
            retry: RetryPolicy::default(),
        }
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Step timeout applied to workflows built from configuration.
    #[must_use]
    pub fn default_timeout_hours(&self) -> Option<u32> {
        self.default_timeout_hours
    }

    /// Registers a workflow template for the actor's organization.
    ///
    /// At most one active workflow may gate a resource kind.
    pub async fn register_workflow(
        &self,
        ctx: &ActorContext,
        mut workflow: ApprovalWorkflow,
    ) -> Result<ApprovalWorkflow, WorkflowError> {
        workflow.organization_id = ctx.organization_id;
        workflow.version = 0;
        if workflow.active {
            self.ensure_no_active(&workflow).await?;
        }
        self.repo
            .commit(WriteBatch::new().with(workflow.clone()))
            .await?;
        info!(
            workflow_id = %workflow.id,
            kind = %workflow.resource_kind,
            steps = workflow.steps().len(),
            "workflow registered"
        );
        Ok(workflow)
    }

    /// Activates or deactivates a workflow.
    pub async fn set_workflow_active(
        &self,
        ctx: &ActorContext,
        workflow_id: WorkflowId,
        active: bool,
    ) -> Result<ApprovalWorkflow, WorkflowError> {
        self.retry
            .run("set_workflow_active", move || {
                self.try_set_workflow_active(ctx, workflow_id, active)
            })
            .await
    }

    async fn try_set_workflow_active(
        &self,
        ctx: &ActorContext,
        workflow_id: WorkflowId,
        active: bool,
    ) -> Result<ApprovalWorkflow, WorkflowError> {
        let mut workflow = self.load_workflow(ctx, workflow_id).await?;
        if workflow.active == active {
            return Ok(workflow);
        }
        if active {
            self.ensure_no_active(&workflow).await?;
        }
        workflow.active = active;
        self.repo
            .commit(WriteBatch::new().with(workflow.clone()))
            .await?;
        workflow.version += 1;
        info!(workflow_id = %workflow.id, active, "workflow activity changed");
        Ok(workflow)
    }

    /// The active workflow gating `kind` in the actor's organization.
    pub async fn active_workflow_for(
        &self,
        ctx: &ActorContext,
        kind: ResourceKind,
    ) -> Result<ApprovalWorkflow, WorkflowError> {
        self.repo
            .workflows_for(ctx.organization_id, kind)
            .await?
            .into_iter()
            .find(|w| w.active)
            .ok_or(WorkflowError::NoActiveWorkflow(kind))
    }

    /// Opens an approval for a resource.
    pub async fn open(
        &self,
        ctx: &ActorContext,
        request: OpenApproval,
    ) -> Result<Approval, WorkflowError> {
        let approval = self
            .retry
            .run("open_approval", move || self.try_open(ctx, request.clone()))
            .await?;
        info!(
            approval_id = %approval.id,
            resource = %approval.resource,
            status = %approval.status,
            step = approval.current_step_order,
            "approval opened"
        );
        self.publish(&approval);
        Ok(approval)
    }

    async fn try_open(
        &self,
        ctx: &ActorContext,
        request: OpenApproval,
    ) -> Result<Approval, WorkflowError> {
        if let Some(existing) = self.repo.open_approval_for(request.resource).await? {
            return Err(WorkflowError::AlreadyOpen {
                resource: request.resource,
                existing: Some(existing.id),
            });
        }

        let workflow = match request.workflow_id {
            Some(id) => self.load_workflow(ctx, id).await?,
            None => self.active_workflow_for(ctx, request.resource.kind).await?,
        };

        let approval = ApprovalMachine::open(
            &workflow,
            request.resource,
            request.attributes,
            ctx.user_id,
            Utc::now(),
        )?;
        if approval.status == ApprovalStatus::Approved {
            debug!(resource = %request.resource, "no workflow step applies, approved on open");
        }

        self.repo
            .commit(WriteBatch::new().with(approval.clone()))
            .await
            .map_err(|e| match e {
                StoreError::UniqueViolation { .. } => WorkflowError::AlreadyOpen {
                    resource: request.resource,
                    existing: None,
                },
                other => other.into(),
            })?;
        Ok(approval)
    }

    /// Records a role-holder's decision on the current step.
    pub async fn act(
        &self,
        ctx: &ActorContext,
        approval_id: ApprovalId,
        input: ActInput,
    ) -> Result<Decision, WorkflowError> {
        let observed_step = OnceLock::new();
        let observed = &observed_step;
        let decision = self
            .retry
            .run("act_on_approval", move || {
                self.try_act(ctx, approval_id, input.clone(), observed)
            })
            .await?;

        info!(
            approval_id = %approval_id,
            actor = %ctx.user_id,
            action = ?decision.action.kind,
            outcome = ?decision.outcome,
            status = %decision.approval.status,
            step = decision.approval.current_step_order,
            "approval decision recorded"
        );
        self.publish(&decision.approval);
        Ok(decision)
    }

    async fn try_act(
        &self,
        ctx: &ActorContext,
        approval_id: ApprovalId,
        mut input: ActInput,
        observed_step: &OnceLock<u32>,
    ) -> Result<Decision, WorkflowError> {
        let approval = self.load_approval(ctx, approval_id).await?;
        // A retry must decide on the step the actor originally saw.
        let first_seen = *observed_step.get_or_init(|| approval.current_step_order);
        input.expected_step.get_or_insert(first_seen);

        let workflow = self.load_workflow(ctx, approval.workflow_id).await?;
        let decision = ApprovalMachine::decide(&workflow, &approval, ctx, &input, Utc::now())?;
        if let Outcome::Advanced { to_step } = decision.outcome {
            debug!(approval_id = %approval_id, to_step, "skipping to next applicable step");
        }

        self.repo
            .commit(
                WriteBatch::new()
                    .with(decision.approval.clone())
                    .with(decision.action.clone()),
            )
            .await?;
        Ok(bump(decision))
    }

    /// Cancels a pending approval with no recorded decisions.
    pub async fn cancel(
        &self,
        ctx: &ActorContext,
        approval_id: ApprovalId,
    ) -> Result<Approval, WorkflowError> {
        let approval = self
            .retry
            .run("cancel_approval", move || self.try_cancel(ctx, approval_id))
            .await?;
        info!(approval_id = %approval_id, actor = %ctx.user_id, "approval cancelled");
        self.publish(&approval);
        Ok(approval)
    }

    async fn try_cancel(
        &self,
        ctx: &ActorContext,
        approval_id: ApprovalId,
    ) -> Result<Approval, WorkflowError> {
        let approval = self.load_approval(ctx, approval_id).await?;
        let actions = self.repo.actions_for(approval_id).await?;
        let mut cancelled = ApprovalMachine::cancel(
            &approval,
            ctx,
            &self.admin_role,
            actions.len(),
            Utc::now(),
        )?;
        self.repo
            .commit(WriteBatch::new().with(cancelled.clone()))
            .await?;
        cancelled.version += 1;
        Ok(cancelled)
    }

    /// Rejects every pending approval whose step deadline is at or before `now`.
    ///
    /// Approvals decided concurrently by a human are skipped: whichever
    /// transition commits first wins.
    pub async fn sweep_timeouts(&self, now: DateTime<Utc>) -> Result<Vec<Decision>, WorkflowError> {
        let expired = self.repo.expired_approvals(now).await?;
        let mut decisions = Vec::with_capacity(expired.len());

        for candidate in expired {
            let id = candidate.id;
            let result = self
                .retry
                .run("expire_approval", move || self.try_expire(id, now))
                .await;
            match result {
                Ok(decision) => {
                    info!(
                        approval_id = %id,
                        step = decision.action.step_order,
                        "approval timed out"
                    );
                    self.publish(&decision.approval);
                    decisions.push(decision);
                }
                Err(
                    WorkflowError::AlreadyTerminal { .. } | WorkflowError::NotExpired(_),
                ) => {
                    debug!(approval_id = %id, "approval decided before timeout sweep");
                }
                Err(e) => {
                    warn!(approval_id = %id, error = %e, "timeout sweep failed for approval");
                }
            }
        }
        Ok(decisions)
    }

    async fn try_expire(
        &self,
        approval_id: ApprovalId,
        now: DateTime<Utc>,
    ) -> Result<Decision, WorkflowError> {
        let approval = self
            .repo
            .approval(approval_id)
            .await?
            .ok_or(WorkflowError::ApprovalNotFound(approval_id))?;
        let decision = ApprovalMachine::expire(&approval, now)?;
        self.repo
            .commit(
                WriteBatch::new()
                    .with(decision.approval.clone())
                    .with(decision.action.clone()),
            )
            .await?;
        Ok(bump(decision))
    }

    /// Pending approvals the actor can decide on.
    pub async fn pending_for(&self, ctx: &ActorContext) -> Result<Vec<Approval>, WorkflowError> {
        let mut pending = self
            .repo
            .approvals_with_status(ctx.organization_id, ApprovalStatus::Pending)
            .await?;
        pending.retain(|a| a.current_role.as_ref().is_some_and(|r| ctx.has_role(r)));
        pending.sort_by_key(|a| a.requested_at);
        Ok(pending)
    }

    /// An approval with its audit trail.
    pub async fn history(
        &self,
        ctx: &ActorContext,
        approval_id: ApprovalId,
    ) -> Result<(Approval, Vec<ApprovalAction>), WorkflowError> {
        let approval = self.load_approval(ctx, approval_id).await?;
        let actions = self.repo.actions_for(approval_id).await?;
        Ok((approval, actions))
    }

    /// Loads an approval visible to the actor.
    pub async fn approval(
        &self,
        ctx: &ActorContext,
        approval_id: ApprovalId,
    ) -> Result<Approval, WorkflowError> {
        self.load_approval(ctx, approval_id).await
    }

    async fn load_approval(
        &self,
        ctx: &ActorContext,
        approval_id: ApprovalId,
    ) -> Result<Approval, WorkflowError> {
        self.repo
            .approval(approval_id)
            .await?
            .filter(|a| a.organization_id == ctx.organization_id)
            .ok_or(WorkflowError::ApprovalNotFound(approval_id))
    }

    async fn load_workflow(
        &self,
        ctx: &ActorContext,
        workflow_id: WorkflowId,
    ) -> Result<ApprovalWorkflow, WorkflowError> {
        self.repo
            .workflow(workflow_id)
            .await?
            .filter(|w| w.organization_id == ctx.organization_id)
            .ok_or(WorkflowError::WorkflowNotFound(workflow_id))
    }

    async fn ensure_no_active(&self, workflow: &ApprovalWorkflow) -> Result<(), WorkflowError> {
        let existing = self
            .repo
            .workflows_for(workflow.organization_id, workflow.resource_kind)
            .await?
            .into_iter()
            .find(|w| w.active && w.id != workflow.id);
        match existing {
            Some(other) => Err(WorkflowError::ActiveWorkflowExists {
                kind: workflow.resource_kind,
                existing: other.id,
            }),
            None => Ok(()),
        }
    }

    fn publish(&self, approval: &Approval) {
        self.events.publish(DomainEvent::ApprovalStateChanged {
            organization_id: approval.organization_id,
            approval_id: approval.id,
            resource: approval.resource,
            status: approval.status,
            step_order: approval.current_step_order,
        });
    }
}

/// Reflects the version bump applied by the committed write.
fn bump(mut decision: Decision) -> Decision {
    decision.approval.version += 1;
    decision
}
