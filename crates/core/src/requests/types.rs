//! Gated request records.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use carehome_shared::types::{
    BankAccountId, Money, OperationalExpenseId, OrganizationId, ProcurementId, TransactionId,
    UserId,
};

use crate::ledger::AccountType;

/// Lifecycle of a gated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    /// Held until its approval concludes.
    Pending,
    /// Finalized; a ledger transaction is linked.
    Approved,
    /// Voided; nothing was booked.
    Rejected,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        })
    }
}

/// Organization-level spending (utilities, salaries, supplies).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationalExpense {
    /// Unique identifier.
    pub id: OperationalExpenseId,
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Document code (`OEX-...`).
    pub code: String,
    /// Category label.
    pub category: String,
    /// Description.
    pub description: String,
    /// Amount.
    pub amount: Money,
    /// Cash or bank.
    pub account: AccountType,
    /// Paying bank account for `Bank`.
    pub bank_account_id: Option<BankAccountId>,
    /// Expense date.
    pub date: NaiveDate,
    /// Receipt reference.
    pub receipt: Option<String>,
    /// Whether the expense waits for an approval.
    pub requires_approval: bool,
    /// Lifecycle status.
    pub status: RequestStatus,
    /// Expense transaction created on approval.
    pub transaction_id: Option<TransactionId>,
    /// Submitting user.
    pub created_by: UserId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// When the request left PENDING.
    pub decided_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency version.
    pub version: u64,
}

/// One line of a procurement request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcurementItem {
    /// Existing inventory item, if restocking.
    pub inventory_item_id: Option<Uuid>,
    /// Item name.
    pub name: String,
    /// Requested quantity.
    pub quantity: u32,
    /// Unit label (`box`, `pcs`).
    pub unit: String,
    /// Price per unit.
    pub unit_price: Money,
    /// Quantity held while the request is pending.
    pub reserved_quantity: u32,
}

impl ProcurementItem {
    /// `quantity * unit_price`, if it fits.
    #[must_use]
    pub fn line_total(&self) -> Option<Money> {
        self.unit_price.checked_mul(self.quantity)
    }
}

/// A request to buy items for the facility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcurementRequest {
    /// Unique identifier.
    pub id: ProcurementId,
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Document code (`PRC-...`).
    pub code: String,
    /// What the purchase is for.
    pub description: String,
    /// Item lines.
    pub items: Vec<ProcurementItem>,
    /// Sum of line totals; the gated amount.
    pub total: Money,
    /// Request date.
    pub date: NaiveDate,
    /// Lifecycle status.
    pub status: RequestStatus,
    /// Expense transaction created on approval.
    pub transaction_id: Option<TransactionId>,
    /// Submitting user.
    pub created_by: UserId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// When the request left PENDING.
    pub decided_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency version.
    pub version: u64,
}

impl ProcurementRequest {
    /// Total quantity still reserved across lines.
    #[must_use]
    pub fn reserved_quantity(&self) -> u64 {
        self.items
            .iter()
            .map(|i| u64::from(i.reserved_quantity))
            .sum()
    }
}

/// Input for an operational expense.
#[derive(Debug, Clone)]
pub struct NewOperationalExpense {
    /// Category label.
    pub category: String,
    /// Description.
    pub description: String,
    /// Amount (positive).
    pub amount: Money,
    /// Cash or bank.
    pub account: AccountType,
    /// Required for `Bank`.
    pub bank_account_id: Option<BankAccountId>,
    /// Expense date.
    pub date: NaiveDate,
    /// Receipt reference.
    pub receipt: Option<String>,
    /// Route through the approval workflow.
    pub requires_approval: bool,
}

/// Input for one procurement line.
#[derive(Debug, Clone)]
pub struct NewProcurementItem {
    /// Existing inventory item, if restocking.
    pub inventory_item_id: Option<Uuid>,
    /// Item name.
    pub name: String,
    /// Quantity (at least 1).
    pub quantity: u32,
    /// Unit label.
    pub unit: String,
    /// Unit price (positive).
    pub unit_price: Money,
}

/// Input for a procurement request.
#[derive(Debug, Clone)]
pub struct NewProcurement {
    /// What the purchase is for.
    pub description: String,
    /// Item lines (at least one).
    pub items: Vec<NewProcurementItem>,
    /// Request date.
    pub date: NaiveDate,
}
