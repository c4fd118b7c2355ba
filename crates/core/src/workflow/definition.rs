//! Workflow templates and their ordered steps.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use carehome_shared::config::WorkflowConfig;
use carehome_shared::types::{Money, OrganizationId, WorkflowId};

use super::condition::{Attributes, StepCondition};
use super::error::WorkflowError;
use super::types::ResourceKind;
use crate::identity::Role;

/// One role-gated step of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    /// Position in the chain, starting at 1.
    pub order: u32,
    /// Role that must act on this step.
    pub role: Role,
    /// When the step applies.
    #[serde(default)]
    pub condition: StepCondition,
    /// Hours a pending step may wait before the timeout sweep rejects it.
    #[serde(default)]
    pub timeout_hours: Option<u32>,
}

impl ApprovalStep {
    /// Creates an unconditional step.
    pub fn new(order: u32, role: impl Into<Role>) -> Self {
        Self {
            order,
            role: role.into(),
            condition: StepCondition::always(),
            timeout_hours: None,
        }
    }

    /// Sets the condition, builder style.
    #[must_use]
    pub fn when(mut self, condition: StepCondition) -> Self {
        self.condition = condition;
        self
    }

    /// Sets the timeout, builder style.
    #[must_use]
    pub fn timeout_after_hours(mut self, hours: u32) -> Self {
        self.timeout_hours = Some(hours);
        self
    }

    /// Deadline for a step entered at `entered_at`.
    #[must_use]
    pub fn deadline(&self, entered_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.timeout_hours
            .and_then(|h| entered_at.checked_add_signed(TimeDelta::hours(i64::from(h))))
    }
}

/// A named, reusable approval template bound to one resource kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalWorkflow {
    /// Unique identifier.
    pub id: WorkflowId,
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Workflow name.
    pub name: String,
    /// Gated resource kind.
    pub resource_kind: ResourceKind,
    /// Description.
    pub description: Option<String>,
    /// Inactive workflows cannot open new approvals.
    pub active: bool,
    /// Steps sorted by order; orders are unique.
    steps: Vec<ApprovalStep>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Optimistic concurrency version.
    pub version: u64,
}

impl ApprovalWorkflow {
    /// Validates and builds a workflow.
    ///
    /// Rejects an empty name, an empty step list, order 0 and duplicate orders.
    pub fn new(
        organization_id: OrganizationId,
        name: &str,
        resource_kind: ResourceKind,
        mut steps: Vec<ApprovalStep>,
    ) -> Result<Self, WorkflowError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(WorkflowError::InvalidWorkflow("name is required".into()));
        }
        if steps.is_empty() {
            return Err(WorkflowError::InvalidWorkflow(format!(
                "workflow `{name}` has no steps"
            )));
        }
        steps.sort_by_key(|s| s.order);
        if steps[0].order == 0 {
            return Err(WorkflowError::InvalidWorkflow("step order starts at 1".into()));
        }
        if let Some(dup) = steps.windows(2).find(|w| w[0].order == w[1].order) {
            return Err(WorkflowError::DuplicateStepOrder(dup[0].order));
        }

        Ok(Self {
            id: WorkflowId::new(),
            organization_id,
            name: name.to_string(),
            resource_kind,
            description: None,
            active: true,
            steps,
            created_at: Utc::now(),
            version: 0,
        })
    }

    /// Builds a workflow from its configuration entry.
    pub fn from_config(
        organization_id: OrganizationId,
        config: &WorkflowConfig,
        default_timeout_hours: Option<u32>,
    ) -> Result<Self, WorkflowError> {
        let kind: ResourceKind = config.resource_type.parse()?;
        let steps = config
            .steps
            .iter()
            .map(|s| {
                let mut condition = StepCondition::always();
                if let Some(min) = s.min_amount {
                    condition = condition.min_amount(Money::new(min));
                }
                if let Some(max) = s.max_amount {
                    condition = condition.max_amount(Money::new(max));
                }
                ApprovalStep {
                    order: s.order,
                    role: Role::new(&s.role),
                    condition,
                    timeout_hours: s.timeout_hours.or(default_timeout_hours),
                }
            })
            .collect();

        let mut workflow = Self::new(organization_id, &config.name, kind, steps)?;
        workflow.description.clone_from(&config.description);
        workflow.active = config.active;
        Ok(workflow)
    }

    /// Steps in order.
    #[must_use]
    pub fn steps(&self) -> &[ApprovalStep] {
        &self.steps
    }

    /// Finds a step by order.
    #[must_use]
    pub fn step(&self, order: u32) -> Option<&ApprovalStep> {
        self.steps.iter().find(|s| s.order == order)
    }

    /// First step whose condition applies.
    #[must_use]
    pub fn first_applicable(&self, attributes: &Attributes) -> Option<&ApprovalStep> {
        self.steps.iter().find(|s| s.condition.applies_to(attributes))
    }

    /// Next applicable step strictly after `order`.
    #[must_use]
    pub fn next_applicable_after(
        &self,
        order: u32,
        attributes: &Attributes,
    ) -> Option<&ApprovalStep> {
        self.steps
            .iter()
            .filter(|s| s.order > order)
            .find(|s| s.condition.applies_to(attributes))
    }

    /// Number of steps that apply to `attributes`.
    #[must_use]
    pub fn applicable_count(&self, attributes: &Attributes) -> usize {
        self.steps
            .iter()
            .filter(|s| s.condition.applies_to(attributes))
            .count()
    }
}
