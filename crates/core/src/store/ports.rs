//! Repository ports implemented by persistence collaborators.
//!
//! Reads return owned snapshots. All mutation goes through
//! [`LedgerStore::commit`] so that every multi-entity change (period update
//! plus revenue transaction, approval plus audit action) is atomic.

use chrono::{DateTime, NaiveDate, Utc};

use carehome_shared::types::{
    ApprovalId, BillingPeriodId, ContractId, OperationalExpenseId, OrganizationId, PaymentId,
    ProcurementId, TransactionId, WorkflowId,
};

use crate::billing::{BillingPeriod, Charge, Contract, PatientExpense, Payment, PeriodStatus};
use crate::ledger::{SourceRef, Transaction};
use crate::requests::{OperationalExpense, ProcurementRequest};
use crate::store::{StoreError, WriteBatch};
use crate::workflow::{
    Approval, ApprovalAction, ApprovalStatus, ApprovalWorkflow, ResourceKind, ResourceRef,
};

/// Atomic multi-entity commit.
pub trait LedgerStore: Send + Sync {
    /// Applies every write in `batch` or none of them.
    ///
    /// Fails with [`StoreError::VersionConflict`] when any versioned write was
    /// read at a stale version.
    fn commit(
        &self,
        batch: WriteBatch,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;
}

/// Organization ledger reads.
pub trait LedgerRepository: LedgerStore {
    /// Find a transaction by id.
    fn transaction(
        &self,
        id: TransactionId,
    ) -> impl std::future::Future<Output = Result<Option<Transaction>, StoreError>> + Send;

    /// Transactions generated by a source record.
    fn transactions_for_source(
        &self,
        source: SourceRef,
    ) -> impl std::future::Future<Output = Result<Vec<Transaction>, StoreError>> + Send;

    /// Transactions of an organization dated within `[from, to]`.
    fn transactions_between(
        &self,
        organization_id: OrganizationId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> impl std::future::Future<Output = Result<Vec<Transaction>, StoreError>> + Send;
}

/// Billing reads.
pub trait BillingRepository: LedgerRepository {
    /// Find a contract by id.
    fn contract(
        &self,
        id: ContractId,
    ) -> impl std::future::Future<Output = Result<Option<Contract>, StoreError>> + Send;

    /// Find a billing period by id.
    fn period(
        &self,
        id: BillingPeriodId,
    ) -> impl std::future::Future<Output = Result<Option<BillingPeriod>, StoreError>> + Send;

    /// All periods of a contract, oldest first.
    fn periods_for_contract(
        &self,
        contract_id: ContractId,
    ) -> impl std::future::Future<Output = Result<Vec<BillingPeriod>, StoreError>> + Send;

    /// Periods in `status` across organizations (sweeps).
    fn periods_with_status(
        &self,
        status: PeriodStatus,
    ) -> impl std::future::Future<Output = Result<Vec<BillingPeriod>, StoreError>> + Send;

    /// Charge lines posted to a period.
    fn charges_for_period(
        &self,
        period_id: BillingPeriodId,
    ) -> impl std::future::Future<Output = Result<Vec<Charge>, StoreError>> + Send;

    /// Patient expenses posted to a period.
    fn expenses_for_period(
        &self,
        period_id: BillingPeriodId,
    ) -> impl std::future::Future<Output = Result<Vec<PatientExpense>, StoreError>> + Send;

    /// Payments posted to a period, any status.
    fn payments_for_period(
        &self,
        period_id: BillingPeriodId,
    ) -> impl std::future::Future<Output = Result<Vec<Payment>, StoreError>> + Send;

    /// Payments of a contract, any status.
    fn payments_for_contract(
        &self,
        contract_id: ContractId,
    ) -> impl std::future::Future<Output = Result<Vec<Payment>, StoreError>> + Send;

    /// Find a payment by id.
    fn payment(
        &self,
        id: PaymentId,
    ) -> impl std::future::Future<Output = Result<Option<Payment>, StoreError>> + Send;
}

/// Approval workflow reads.
pub trait ApprovalRepository: LedgerStore {
    /// Find a workflow template by id.
    fn workflow(
        &self,
        id: WorkflowId,
    ) -> impl std::future::Future<Output = Result<Option<ApprovalWorkflow>, StoreError>> + Send;

    /// Workflow templates of an organization bound to `kind`.
    fn workflows_for(
        &self,
        organization_id: OrganizationId,
        kind: ResourceKind,
    ) -> impl std::future::Future<Output = Result<Vec<ApprovalWorkflow>, StoreError>> + Send;

    /// Find an approval by id.
    fn approval(
        &self,
        id: ApprovalId,
    ) -> impl std::future::Future<Output = Result<Option<Approval>, StoreError>> + Send;

    /// The non-terminal approval of a resource, if any.
    fn open_approval_for(
        &self,
        resource: ResourceRef,
    ) -> impl std::future::Future<Output = Result<Option<Approval>, StoreError>> + Send;

    /// Approvals of an organization in `status`.
    fn approvals_with_status(
        &self,
        organization_id: OrganizationId,
        status: ApprovalStatus,
    ) -> impl std::future::Future<Output = Result<Vec<Approval>, StoreError>> + Send;

    /// Pending approvals whose step timed out at or before `now`.
    fn expired_approvals(
        &self,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<Approval>, StoreError>> + Send;

    /// Audit actions of an approval, oldest first.
    fn actions_for(
        &self,
        approval_id: ApprovalId,
    ) -> impl std::future::Future<Output = Result<Vec<ApprovalAction>, StoreError>> + Send;
}

/// Gated request reads.
pub trait RequestRepository: LedgerRepository {
    /// Find an operational expense by id.
    fn operational_expense(
        &self,
        id: OperationalExpenseId,
    ) -> impl std::future::Future<Output = Result<Option<OperationalExpense>, StoreError>> + Send;

    /// Find a procurement request by id.
    fn procurement(
        &self,
        id: ProcurementId,
    ) -> impl std::future::Future<Output = Result<Option<ProcurementRequest>, StoreError>> + Send;
}
