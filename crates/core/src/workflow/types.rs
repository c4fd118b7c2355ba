//! Approval workflow domain types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::WorkflowError;

/// Resource families that can be gated by an approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceKind {
    /// Organization-level operational expense.
    OperationalExpense,
    /// Verification of a pending bank transfer.
    PaymentVerification,
    /// Procurement request.
    Procurement,
}

impl ResourceKind {
    /// Returns the stored name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OperationalExpense => "OPERATIONAL_EXPENSE",
            Self::PaymentVerification => "PAYMENT_VERIFICATION",
            Self::Procurement => "PROCUREMENT",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "OPERATIONAL_EXPENSE" => Ok(Self::OperationalExpense),
            "PAYMENT_VERIFICATION" => Ok(Self::PaymentVerification),
            "PROCUREMENT" => Ok(Self::Procurement),
            _ => Err(WorkflowError::UnknownResourceKind(s.to_string())),
        }
    }
}

/// Weak reference from an approval to the record it gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Resource family.
    pub kind: ResourceKind,
    /// Resource id.
    pub id: Uuid,
}

impl ResourceRef {
    /// Creates a resource reference.
    pub fn new(kind: ResourceKind, id: impl Into<Uuid>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Approval lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    /// Waiting on the current step.
    Pending,
    /// Every applicable step approved.
    Approved,
    /// Rejected by a role-holder or by timeout.
    Rejected,
    /// Withdrawn before any decision.
    Cancelled,
}

impl ApprovalStatus {
    /// Returns the stored name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Terminal states are immutable.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision recorded by a role-holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    /// Approve the current step.
    Approved,
    /// Reject the approval.
    Rejected,
    /// Ask the requester for changes; the step stays pending.
    RequestedChanges,
}

impl ActionKind {
    /// Returns true if the action must carry comments.
    #[must_use]
    pub const fn requires_comments(&self) -> bool {
        matches!(self, Self::Rejected | Self::RequestedChanges)
    }
}
