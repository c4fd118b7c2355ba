//! Approval gate over the approval service.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use carehome_shared::types::ApprovalId;

use super::error::GateError;
use super::handler::{GateContext, HandlerRegistry, ResourceHandler};
use crate::identity::ActorContext;
use crate::store::ApprovalRepository;
use crate::workflow::{
    ActInput, Approval, ApprovalService, ApprovalStatus, Attributes, Decision, OpenApproval,
    ResourceRef,
};

const CANCELLED_REASON: &str = "Approval cancelled";

/// Holds domain records until their approval concludes, then runs the
/// registered callback.
pub struct ApprovalGate<R: ApprovalRepository> {
    approvals: Arc<ApprovalService<R>>,
    handlers: HandlerRegistry,
}

impl<R: ApprovalRepository> ApprovalGate<R> {
    /// Creates a gate.
    #[must_use]
    pub fn new(approvals: Arc<ApprovalService<R>>, handlers: HandlerRegistry) -> Self {
        Self {
            approvals,
            handlers,
        }
    }

    /// The underlying approval service.
    #[must_use]
    pub fn approvals(&self) -> &ApprovalService<R> {
        &self.approvals
    }

    /// Opens an approval for a freshly created domain record.
    ///
    /// When no workflow step applies the approval concludes immediately and
    /// the record is finalized before this returns.
    pub async fn request_gate(
        &self,
        ctx: &ActorContext,
        resource: ResourceRef,
        attributes: Attributes,
    ) -> Result<Approval, GateError> {
        let handler = self.handler(resource)?;
        let approval = self
            .approvals
            .open(
                ctx,
                OpenApproval {
                    resource,
                    attributes,
                    workflow_id: None,
                },
            )
            .await?;

        if approval.status == ApprovalStatus::Approved {
            let gate_ctx = GateContext::without_action(&approval, ctx.user_id, None);
            self.deliver(handler.as_ref(), &gate_ctx, resource, true)
                .await?;
        }
        Ok(approval)
    }

    /// Records a decision and, if it concluded the approval, notifies the
    /// resource.
    pub async fn act(
        &self,
        ctx: &ActorContext,
        approval_id: ApprovalId,
        input: ActInput,
    ) -> Result<Decision, GateError> {
        let decision = self.approvals.act(ctx, approval_id, input).await?;
        self.dispatch(&decision).await?;
        Ok(decision)
    }

    /// Cancels a pending approval and voids its resource.
    pub async fn cancel(
        &self,
        ctx: &ActorContext,
        approval_id: ApprovalId,
    ) -> Result<Approval, GateError> {
        let approval = self.approvals.cancel(ctx, approval_id).await?;
        let handler = self.handler(approval.resource)?;
        let gate_ctx = GateContext::without_action(&approval, ctx.user_id, Some(CANCELLED_REASON));
        self.deliver(handler.as_ref(), &gate_ctx, approval.resource, false)
            .await?;
        Ok(approval)
    }

    /// Times out expired approvals and voids their resources.
    ///
    /// A failing callback is logged and left for [`Self::redeliver`]; it does
    /// not stop the sweep.
    pub async fn sweep_timeouts(&self, now: DateTime<Utc>) -> Result<Vec<Decision>, GateError> {
        let decisions = self.approvals.sweep_timeouts(now).await?;
        for decision in &decisions {
            if let Err(e) = self.dispatch(decision).await {
                warn!(
                    approval_id = %decision.approval.id,
                    error = %e,
                    "timeout callback failed, awaiting redelivery"
                );
            }
        }
        Ok(decisions)
    }

    /// Delivers the callback of a concluded approval again.
    ///
    /// Safe to call any number of times; pending approvals are ignored.
    pub async fn redeliver(
        &self,
        ctx: &ActorContext,
        approval_id: ApprovalId,
    ) -> Result<Approval, GateError> {
        let (approval, actions) = self.approvals.history(ctx, approval_id).await?;
        let handler = self.handler(approval.resource)?;
        let gate_ctx = match actions.last() {
            Some(last) => GateContext::from_action(&approval, last),
            None => GateContext::without_action(&approval, approval.requested_by, None),
        };
        match approval.status {
            ApprovalStatus::Pending => {
                debug!(approval_id = %approval_id, "approval still pending, nothing to deliver");
            }
            ApprovalStatus::Approved => {
                self.deliver(handler.as_ref(), &gate_ctx, approval.resource, true)
                    .await?;
            }
            ApprovalStatus::Rejected | ApprovalStatus::Cancelled => {
                self.deliver(handler.as_ref(), &gate_ctx, approval.resource, false)
                    .await?;
            }
        }
        Ok(approval)
    }

    async fn dispatch(&self, decision: &Decision) -> Result<(), GateError> {
        let resource = decision.approval.resource;
        let approved = if decision.outcome.finalizes() {
            true
        } else if decision.outcome.voids() {
            false
        } else {
            return Ok(());
        };
        let handler = self.handler(resource)?;
        let gate_ctx = GateContext::from_action(&decision.approval, &decision.action);
        self.deliver(handler.as_ref(), &gate_ctx, resource, approved)
            .await
    }

    async fn deliver(
        &self,
        handler: &dyn ResourceHandler,
        ctx: &GateContext,
        resource: ResourceRef,
        approved: bool,
    ) -> Result<(), GateError> {
        let result = if approved {
            handler.on_approved(ctx, resource.id).await
        } else {
            handler.on_rejected(ctx, resource.id).await
        };
        match result {
            Ok(()) => {
                info!(
                    approval_id = %ctx.approval_id,
                    %resource,
                    approved,
                    "resource notified"
                );
                Ok(())
            }
            Err(source) => {
                error!(
                    approval_id = %ctx.approval_id,
                    %resource,
                    approved,
                    error = %source,
                    "resource callback failed"
                );
                Err(GateError::Handler {
                    kind: resource.kind,
                    resource_id: resource.id,
                    source,
                })
            }
        }
    }

    fn handler(&self, resource: ResourceRef) -> Result<Arc<dyn ResourceHandler>, GateError> {
        self.handlers
            .get(resource.kind)
            .ok_or(GateError::NoHandler(resource.kind))
    }
}
