//! Billing domain types: contracts, periods and their postings.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use carehome_shared::types::{
    BillingPeriodId, ChargeId, ContractId, Money, OrganizationId, PatientExpenseId, PatientId,
    PaymentId, RoomId, TransactionId, UserId,
};

use crate::ledger::month_bounds;

/// Contract lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractStatus {
    /// Patient is resident.
    Active,
    /// Patient checked out with nothing owed.
    Completed,
    /// Ended early; immutable.
    Terminated,
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Terminated => "TERMINATED",
        })
    }
}

/// A patient's stay agreement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    /// Unique identifier.
    pub id: ContractId,
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Document code (`CTR-...`).
    pub code: String,
    /// Patient.
    pub patient_id: PatientId,
    /// Assigned room.
    pub room_id: RoomId,
    /// Monthly rate copied into each period.
    pub monthly_rate: Money,
    /// Day of month payment is due (1-28).
    pub payment_due_day: u32,
    /// Stay start.
    pub start_date: NaiveDate,
    /// Planned stay end; `None` means ongoing.
    pub end_date: Option<NaiveDate>,
    /// Lifecycle status.
    pub status: ContractStatus,
    /// Actual checkout date.
    pub checkout_date: Option<NaiveDate>,
    /// When the contract left ACTIVE.
    pub closed_at: Option<DateTime<Utc>>,
    /// Who closed it.
    pub closed_by: Option<UserId>,
    /// Reason recorded on termination.
    pub termination_reason: Option<String>,
    /// Creating user.
    pub created_by: UserId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Optimistic concurrency version.
    pub version: u64,
}

/// Billing period lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeriodStatus {
    /// Current cycle.
    Active,
    /// Due date passed with money owed.
    Overdue,
    /// Cycle closed; revenue deferred until settlement or checkout.
    Unrealized,
    /// Closed and immutable.
    Settled,
}

impl PeriodStatus {
    /// ACTIVE and OVERDUE periods block opening another period.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Active | Self::Overdue)
    }

    /// Everything but SETTLED still accepts expenses and payments.
    #[must_use]
    pub const fn accepts_postings(&self) -> bool {
        !matches!(self, Self::Settled)
    }
}

impl fmt::Display for PeriodStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "ACTIVE",
            Self::Overdue => "OVERDUE",
            Self::Unrealized => "UNREALIZED",
            Self::Settled => "SETTLED",
        })
    }
}

/// One monthly cycle of a contract.
///
/// The totals and balance are derived from the period's postings and are
/// rewritten together on every mutation; see [`super::balance::PeriodTotals`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPeriod {
    /// Unique identifier.
    pub id: BillingPeriodId,
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Owning contract.
    pub contract_id: ContractId,
    /// Document code (`PER-YYYYMM-...`).
    pub code: String,
    /// Calendar year.
    pub year: i32,
    /// Calendar month (1-12).
    pub month: u32,
    /// First day of the month.
    pub start_date: NaiveDate,
    /// Last day of the month.
    pub end_date: NaiveDate,
    /// Payment due date.
    pub due_date: NaiveDate,
    /// Monthly rate copied from the contract.
    pub base_monthly_rate: Money,
    /// Sum of mandatory charges.
    pub nursing_charge: Money,
    /// Sum of optional charges, carried debt included.
    pub additional_charges: Money,
    /// `base + nursing + additional`.
    pub total_charged: Money,
    /// Sum of patient expenses.
    pub total_expenses: Money,
    /// Sum of verified payments.
    pub total_paid: Money,
    /// `total_paid - (total_charged + total_expenses)`.
    pub balance: Money,
    /// Lifecycle status.
    pub status: PeriodStatus,
    /// Settlement time.
    pub settled_at: Option<DateTime<Utc>>,
    /// Settling user.
    pub settled_by: Option<UserId>,
    /// Deferred revenue transaction created when the period went UNREALIZED.
    pub deferred_transaction_id: Option<TransactionId>,
    /// Period that took over this period's unpaid balance.
    pub debt_carried_to: Option<BillingPeriodId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Optimistic concurrency version.
    pub version: u64,
}

impl BillingPeriod {
    /// Money the patient still owes on this period.
    #[must_use]
    pub fn outstanding(&self) -> Money {
        (-self.balance).clamp_non_negative()
    }

    /// Returns true if the period was settled owing money that no later
    /// period has taken over.
    #[must_use]
    pub fn has_uncarried_debt(&self) -> bool {
        self.status == PeriodStatus::Settled
            && self.balance.is_negative()
            && self.debt_carried_to.is_none()
    }
}

/// Calendar placement of a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodCalendar {
    /// First day.
    pub start_date: NaiveDate,
    /// Last day.
    pub end_date: NaiveDate,
    /// Due date.
    pub due_date: NaiveDate,
}

impl PeriodCalendar {
    /// Places a period for `year`/`month` with the contract's due day,
    /// clamped to the end of the month.
    #[must_use]
    pub fn for_month(year: i32, month: u32, due_day: u32) -> Option<Self> {
        let (start_date, end_date) = month_bounds(year, month)?;
        let day = due_day.clamp(1, end_date.day());
        let due_date = NaiveDate::from_ymd_opt(year, month, day)?;
        Some(Self {
            start_date,
            end_date,
            due_date,
        })
    }
}

/// Charge category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeType {
    /// Mandatory nursing charge, posted when the period opens.
    Nursing,
    /// Doctor visit.
    Doctor,
    /// Medication.
    Medication,
    /// Equipment rental or purchase.
    Equipment,
    /// Anything else.
    Other,
    /// Unpaid balance carried from an earlier period.
    CarriedDebt,
}

impl ChargeType {
    /// Returns true for charge types only the engine may post.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::Nursing | Self::CarriedDebt)
    }
}

impl fmt::Display for ChargeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Nursing => "NURSING",
            Self::Doctor => "DOCTOR",
            Self::Medication => "MEDICATION",
            Self::Equipment => "EQUIPMENT",
            Self::Other => "OTHER",
            Self::CarriedDebt => "CARRIED_DEBT",
        })
    }
}

/// A billable line posted to a period. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charge {
    /// Unique identifier.
    pub id: ChargeId,
    /// Owning period.
    pub period_id: BillingPeriodId,
    /// Document code (`CHG-...`).
    pub code: String,
    /// Category.
    pub charge_type: ChargeType,
    /// Description.
    pub description: String,
    /// `quantity * unit_price`.
    pub amount: Money,
    /// Quantity.
    pub quantity: u32,
    /// Unit price.
    pub unit_price: Money,
    /// Charge date.
    pub date: NaiveDate,
    /// Mandatory charges count toward `nursing_charge`.
    pub is_mandatory: bool,
    /// Source period for carried debt.
    pub carried_from: Option<BillingPeriodId>,
    /// Recording user.
    pub recorded_by: UserId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// How money changed hands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// Cash, verified on receipt.
    Cash,
    /// Bank transfer, verified later.
    BankTransfer,
}

/// Money the facility spent on the patient's behalf. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientExpense {
    /// Unique identifier.
    pub id: PatientExpenseId,
    /// Owning period.
    pub period_id: BillingPeriodId,
    /// Document code (`PEX-...`).
    pub code: String,
    /// Category label.
    pub category: String,
    /// Description.
    pub description: String,
    /// Amount.
    pub amount: Money,
    /// How the facility paid.
    pub payment_method: PaymentMethod,
    /// Expense date.
    pub date: NaiveDate,
    /// Receipt reference.
    pub receipt: Option<String>,
    /// Recording user.
    pub recorded_by: UserId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Payment verification state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Awaiting verification.
    Pending,
    /// Counts toward the balance.
    Verified,
    /// Never counts.
    Rejected,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "PENDING",
            Self::Verified => "VERIFIED",
            Self::Rejected => "REJECTED",
        })
    }
}

/// Money received from the patient or family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Unique identifier.
    pub id: PaymentId,
    /// Owning organization.
    pub organization_id: OrganizationId,
    /// Contract paid for.
    pub contract_id: ContractId,
    /// Period the payment applies to.
    pub period_id: BillingPeriodId,
    /// Document code (`PAY-...`).
    pub code: String,
    /// Amount.
    pub amount: Money,
    /// Cash or bank transfer.
    pub method: PaymentMethod,
    /// Transfer reference.
    pub bank_reference: Option<String>,
    /// Payer name.
    pub payer_name: String,
    /// Payment date.
    pub date: NaiveDate,
    /// Verification state.
    pub status: PaymentStatus,
    /// Receiving user.
    pub received_by: UserId,
    /// Verifying (or rejecting) user.
    pub verified_by: Option<UserId>,
    /// Verification (or rejection) time.
    pub verified_at: Option<DateTime<Utc>>,
    /// Rejection reason.
    pub rejection_reason: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Optimistic concurrency version.
    pub version: u64,
}

/// Input for a new contract.
#[derive(Debug, Clone)]
pub struct NewContract {
    /// Patient.
    pub patient_id: PatientId,
    /// Room.
    pub room_id: RoomId,
    /// Monthly rate.
    pub monthly_rate: Money,
    /// Payment due day (1-28).
    pub payment_due_day: u32,
    /// Stay start.
    pub start_date: NaiveDate,
    /// Planned end.
    pub end_date: Option<NaiveDate>,
}

/// Payment collected when a period opens.
#[derive(Debug, Clone)]
pub struct OpeningPayment {
    /// Prepaid amount for the new cycle, carried debt excluded.
    pub prepaid: Money,
    /// Method.
    pub method: PaymentMethod,
    /// Transfer reference.
    pub bank_reference: Option<String>,
    /// Payer name.
    pub payer_name: String,
}

/// Unpaid balance carried into a new period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarriedDebt {
    /// Period the debt comes from, if tracked.
    pub from_period: Option<BillingPeriodId>,
    /// Description on the carried line.
    pub description: String,
    /// Amount owed.
    pub amount: Money,
}

/// Input for opening a period.
#[derive(Debug, Clone)]
pub struct OpenPeriod {
    /// Contract.
    pub contract_id: ContractId,
    /// Calendar year.
    pub year: i32,
    /// Calendar month.
    pub month: u32,
    /// Mandatory nursing charge; defaults to the configured amount.
    pub nursing_charge: Option<Money>,
    /// Opening payment: prepaid plus all carried debt.
    pub opening_payment: Option<OpeningPayment>,
    /// Unpaid charges carried from earlier periods.
    pub carried_debt: Vec<CarriedDebt>,
}

/// Input for an optional charge.
#[derive(Debug, Clone)]
pub struct PostCharge {
    /// Period.
    pub period_id: BillingPeriodId,
    /// Category (not NURSING or CARRIED_DEBT).
    pub charge_type: ChargeType,
    /// Description.
    pub description: String,
    /// Quantity (at least 1).
    pub quantity: u32,
    /// Unit price (positive).
    pub unit_price: Money,
    /// Charge date.
    pub date: NaiveDate,
}

/// Input for a patient expense.
#[derive(Debug, Clone)]
pub struct PostExpense {
    /// Period.
    pub period_id: BillingPeriodId,
    /// Category label.
    pub category: String,
    /// Description.
    pub description: String,
    /// Amount (positive).
    pub amount: Money,
    /// How the facility paid.
    pub payment_method: PaymentMethod,
    /// Expense date.
    pub date: NaiveDate,
    /// Receipt reference.
    pub receipt: Option<String>,
}

/// Input for a payment.
#[derive(Debug, Clone)]
pub struct RecordPayment {
    /// Contract.
    pub contract_id: ContractId,
    /// Period; defaults to the contract's open period.
    pub period_id: Option<BillingPeriodId>,
    /// Amount (positive; at most the outstanding balance for cash).
    pub amount: Money,
    /// Method.
    pub method: PaymentMethod,
    /// Required for bank transfers.
    pub bank_reference: Option<String>,
    /// Payer name.
    pub payer_name: String,
    /// Payment date.
    pub date: NaiveDate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calendar_for_month() {
        let cal = PeriodCalendar::for_month(2025, 2, 10).unwrap();
        assert_eq!(cal.start_date, NaiveDate::from_ymd_opt(2025, 2, 1).unwrap());
        assert_eq!(cal.end_date, NaiveDate::from_ymd_opt(2025, 2, 28).unwrap());
        assert_eq!(cal.due_date, NaiveDate::from_ymd_opt(2025, 2, 10).unwrap());
        assert!(PeriodCalendar::for_month(2025, 0, 10).is_none());
    }

    #[test]
    fn test_period_status_rules() {
        assert!(PeriodStatus::Active.is_open());
        assert!(PeriodStatus::Overdue.is_open());
        assert!(!PeriodStatus::Unrealized.is_open());
        assert!(PeriodStatus::Unrealized.accepts_postings());
        assert!(!PeriodStatus::Settled.accepts_postings());
    }

    #[test]
    fn test_system_charge_types() {
        assert!(ChargeType::Nursing.is_system());
        assert!(ChargeType::CarriedDebt.is_system());
        assert!(!ChargeType::Doctor.is_system());
    }
}
