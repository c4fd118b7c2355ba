//! Resource callbacks and their registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use carehome_shared::AppError;
use carehome_shared::types::{ApprovalId, OrganizationId, UserId};

use crate::identity::{ActorContext, Role};
use crate::workflow::{Approval, ApprovalAction, ResourceKind};

/// Who concluded an approval, and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateContext {
    /// Organization.
    pub organization_id: OrganizationId,
    /// Concluded approval.
    pub approval_id: ApprovalId,
    /// Deciding user ([`UserId::SYSTEM`] for timeouts).
    pub decided_by: UserId,
    /// Decision time.
    pub decided_at: DateTime<Utc>,
    /// Decision comments, e.g. the rejection reason.
    pub reason: Option<String>,
}

impl GateContext {
    /// Context for the action that concluded `approval`.
    #[must_use]
    pub fn from_action(approval: &Approval, action: &ApprovalAction) -> Self {
        Self {
            organization_id: approval.organization_id,
            approval_id: approval.id,
            decided_by: action.actor,
            decided_at: action.created_at,
            reason: action.comments.clone(),
        }
    }

    /// Context for an approval concluded without an action: approved on
    /// open, or cancelled.
    #[must_use]
    pub fn without_action(approval: &Approval, decided_by: UserId, reason: Option<&str>) -> Self {
        Self {
            organization_id: approval.organization_id,
            approval_id: approval.id,
            decided_by,
            decided_at: approval.completed_at.unwrap_or(approval.requested_at),
            reason: reason.map(str::to_string),
        }
    }

    /// Actor context for domain operations run by a callback.
    ///
    /// Carries no roles: the workflow already checked them.
    #[must_use]
    pub fn actor(&self) -> ActorContext {
        ActorContext::new(
            self.organization_id,
            self.decided_by,
            std::iter::empty::<Role>(),
        )
    }

    /// The decision comments, or `fallback`.
    #[must_use]
    pub fn reason_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.reason.as_deref().unwrap_or(fallback)
    }
}

/// Callback pair of one resource family.
///
/// Both callbacks must be idempotent: a second delivery of the same terminal
/// transition is a no-op.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Resource family handled.
    fn kind(&self) -> ResourceKind;

    /// Moves the resource to its finalized state.
    async fn on_approved(&self, ctx: &GateContext, resource_id: Uuid) -> Result<(), AppError>;

    /// Voids the resource and releases anything it reserved.
    async fn on_rejected(&self, ctx: &GateContext, resource_id: Uuid) -> Result<(), AppError>;
}

/// Maps each resource kind to its callbacks.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<ResourceKind, Arc<dyn ResourceHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, returning the one it replaced.
    pub fn register(
        &mut self,
        handler: Arc<dyn ResourceHandler>,
    ) -> Option<Arc<dyn ResourceHandler>> {
        self.handlers.insert(handler.kind(), handler)
    }

    /// Builder form of [`Self::register`].
    #[must_use]
    pub fn with(mut self, handler: Arc<dyn ResourceHandler>) -> Self {
        self.register(handler);
        self
    }

    /// Handler for `kind`.
    #[must_use]
    pub fn get(&self, kind: ResourceKind) -> Option<Arc<dyn ResourceHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// Registered kinds, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<ResourceKind> {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(ResourceKind);

    #[async_trait]
    impl ResourceHandler for Noop {
        fn kind(&self) -> ResourceKind {
            self.0
        }

        async fn on_approved(&self, _: &GateContext, _: Uuid) -> Result<(), AppError> {
            Ok(())
        }

        async fn on_rejected(&self, _: &GateContext, _: Uuid) -> Result<(), AppError> {
            Ok(())
        }
    }

    #[test]
    fn test_register_replaces_by_kind() {
        let mut registry = HandlerRegistry::new().with(Arc::new(Noop(ResourceKind::Procurement)));
        assert!(registry.get(ResourceKind::Procurement).is_some());
        assert!(registry.get(ResourceKind::OperationalExpense).is_none());

        let previous = registry.register(Arc::new(Noop(ResourceKind::Procurement)));
        assert!(previous.is_some());
        assert_eq!(registry.kinds(), vec![ResourceKind::Procurement]);
    }

    #[test]
    fn test_gate_context_actor_has_no_roles() {
        let ctx = GateContext {
            organization_id: OrganizationId::new(),
            approval_id: ApprovalId::new(),
            decided_by: UserId::SYSTEM,
            decided_at: Utc::now(),
            reason: None,
        };
        let actor = ctx.actor();
        assert!(actor.roles.is_empty());
        assert!(actor.user_id.is_system());
        assert_eq!(ctx.reason_or("timed out"), "timed out");
    }
}
