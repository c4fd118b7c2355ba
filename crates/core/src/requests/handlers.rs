//! Approval callbacks of the gated resource families.
//!
//! Every callback is idempotent. Delivering the same terminal transition a
//! second time finds the record already there and does nothing; delivering
//! the opposite transition fails with [`RequestError::NotPending`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use carehome_shared::AppError;
use carehome_shared::types::{OperationalExpenseId, PaymentId, ProcurementId, UserId};

use super::error::RequestError;
use super::types::{OperationalExpense, ProcurementRequest, RequestStatus};
use crate::billing::{BillingError, BillingService, PaymentStatus};
use crate::gate::{GateContext, ResourceHandler};
use crate::ledger::{
    AccountType, NewTransaction, ReferenceType, SourceRef, Transaction, TransactionType,
};
use crate::store::{BillingRepository, RequestRepository, RetryPolicy, WriteBatch};
use crate::workflow::ResourceKind;

/// Ledger category of approved procurement.
pub const PROCUREMENT_CATEGORY: &str = "Procurement";

/// Fallback reason when a rejection carried no comments.
const REJECTED_REASON: &str = "Rejected through approval";

// ========== Transitions ==========

/// Approves a pending expense and books its expense transaction.
///
/// Returns `None` when the expense is already approved.
pub(crate) fn approve_expense(
    expense: &OperationalExpense,
    approved_by: UserId,
    now: DateTime<Utc>,
) -> Result<Option<(OperationalExpense, Transaction)>, RequestError> {
    match expense.status {
        RequestStatus::Approved => return Ok(None),
        RequestStatus::Rejected => return Err(not_pending(&expense.code, expense.status)),
        RequestStatus::Pending => {}
    }
    let transaction = Transaction::new(
        NewTransaction {
            organization_id: expense.organization_id,
            kind: TransactionType::Expense,
            category: expense.category.clone(),
            amount: expense.amount,
            account: expense.account,
            bank_account_id: expense.bank_account_id,
            source: SourceRef::new(ReferenceType::OperationalExpense, expense.id),
            date: expense.date,
            description: expense.description.clone(),
            realized: true,
            created_by: approved_by,
        },
        now,
    )?;
    let mut approved = expense.clone();
    approved.status = RequestStatus::Approved;
    approved.transaction_id = Some(transaction.id);
    approved.decided_at = Some(now);
    Ok(Some((approved, transaction)))
}

/// Voids a pending expense. Returns `None` when already rejected.
pub(crate) fn reject_expense(
    expense: &OperationalExpense,
    now: DateTime<Utc>,
) -> Result<Option<OperationalExpense>, RequestError> {
    match expense.status {
        RequestStatus::Rejected => Ok(None),
        RequestStatus::Approved => Err(not_pending(&expense.code, expense.status)),
        RequestStatus::Pending => {
            let mut rejected = expense.clone();
            rejected.status = RequestStatus::Rejected;
            rejected.decided_at = Some(now);
            Ok(Some(rejected))
        }
    }
}

/// Approves a pending procurement and books its total as a cash expense.
/// Reservations are kept: the items are now bought.
pub(crate) fn approve_procurement(
    request: &ProcurementRequest,
    approved_by: UserId,
    now: DateTime<Utc>,
) -> Result<Option<(ProcurementRequest, Transaction)>, RequestError> {
    match request.status {
        RequestStatus::Approved => return Ok(None),
        RequestStatus::Rejected => return Err(not_pending(&request.code, request.status)),
        RequestStatus::Pending => {}
    }
    let transaction = Transaction::new(
        NewTransaction {
            organization_id: request.organization_id,
            kind: TransactionType::Expense,
            category: PROCUREMENT_CATEGORY.to_string(),
            amount: request.total,
            account: AccountType::Cash,
            bank_account_id: None,
            source: SourceRef::new(ReferenceType::Procurement, request.id),
            date: request.date,
            description: request.description.clone(),
            realized: true,
            created_by: approved_by,
        },
        now,
    )?;
    let mut approved = request.clone();
    approved.status = RequestStatus::Approved;
    approved.transaction_id = Some(transaction.id);
    approved.decided_at = Some(now);
    Ok(Some((approved, transaction)))
}

/// Voids a pending procurement and releases its reservations.
pub(crate) fn reject_procurement(
    request: &ProcurementRequest,
    now: DateTime<Utc>,
) -> Result<Option<ProcurementRequest>, RequestError> {
    match request.status {
        RequestStatus::Rejected => Ok(None),
        RequestStatus::Approved => Err(not_pending(&request.code, request.status)),
        RequestStatus::Pending => {
            let mut rejected = request.clone();
            rejected.status = RequestStatus::Rejected;
            rejected.decided_at = Some(now);
            for item in &mut rejected.items {
                item.reserved_quantity = 0;
            }
            Ok(Some(rejected))
        }
    }
}

fn not_pending(code: &str, status: RequestStatus) -> RequestError {
    RequestError::NotPending {
        code: code.to_string(),
        status,
    }
}

// ========== Operational Expenses ==========

/// Finalizes or voids operational expenses.
pub struct OperationalExpenseHandler<R: RequestRepository> {
    repo: Arc<R>,
    retry: RetryPolicy,
}

impl<R: RequestRepository> OperationalExpenseHandler<R> {
    /// Creates the handler.
    #[must_use]
    pub fn new(repo: Arc<R>, retry: RetryPolicy) -> Self {
        Self { repo, retry }
    }

    async fn load(
        &self,
        ctx: &GateContext,
        id: OperationalExpenseId,
    ) -> Result<OperationalExpense, RequestError> {
        self.repo
            .operational_expense(id)
            .await?
            .filter(|e| e.organization_id == ctx.organization_id)
            .ok_or(RequestError::ExpenseNotFound(id))
    }

    async fn try_approve(
        &self,
        ctx: &GateContext,
        id: OperationalExpenseId,
    ) -> Result<bool, RequestError> {
        let expense = self.load(ctx, id).await?;
        let Some((approved, transaction)) =
            approve_expense(&expense, ctx.decided_by, ctx.decided_at)?
        else {
            return Ok(false);
        };
        self.repo
            .commit(WriteBatch::new().with(approved).with(transaction))
            .await?;
        Ok(true)
    }

    async fn try_reject(
        &self,
        ctx: &GateContext,
        id: OperationalExpenseId,
    ) -> Result<bool, RequestError> {
        let expense = self.load(ctx, id).await?;
        let Some(rejected) = reject_expense(&expense, ctx.decided_at)? else {
            return Ok(false);
        };
        self.repo.commit(WriteBatch::new().with(rejected)).await?;
        Ok(true)
    }
}

#[async_trait]
impl<R: RequestRepository + 'static> ResourceHandler for OperationalExpenseHandler<R> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::OperationalExpense
    }

    async fn on_approved(&self, ctx: &GateContext, resource_id: Uuid) -> Result<(), AppError> {
        let id = OperationalExpenseId::from_uuid(resource_id);
        let changed = self
            .retry
            .run("approve_operational_expense", || self.try_approve(ctx, id))
            .await?;
        log_transition("operational expense", resource_id, changed, true);
        Ok(())
    }

    async fn on_rejected(&self, ctx: &GateContext, resource_id: Uuid) -> Result<(), AppError> {
        let id = OperationalExpenseId::from_uuid(resource_id);
        let changed = self
            .retry
            .run("reject_operational_expense", || self.try_reject(ctx, id))
            .await?;
        log_transition("operational expense", resource_id, changed, false);
        Ok(())
    }
}

// ========== Procurement ==========

/// Finalizes procurement or releases its reservations.
pub struct ProcurementHandler<R: RequestRepository> {
    repo: Arc<R>,
    retry: RetryPolicy,
}

impl<R: RequestRepository> ProcurementHandler<R> {
    /// Creates the handler.
    #[must_use]
    pub fn new(repo: Arc<R>, retry: RetryPolicy) -> Self {
        Self { repo, retry }
    }

    async fn load(
        &self,
        ctx: &GateContext,
        id: ProcurementId,
    ) -> Result<ProcurementRequest, RequestError> {
        self.repo
            .procurement(id)
            .await?
            .filter(|p| p.organization_id == ctx.organization_id)
            .ok_or(RequestError::ProcurementNotFound(id))
    }

    async fn try_approve(&self, ctx: &GateContext, id: ProcurementId) -> Result<bool, RequestError> {
        let request = self.load(ctx, id).await?;
        let Some((approved, transaction)) =
            approve_procurement(&request, ctx.decided_by, ctx.decided_at)?
        else {
            return Ok(false);
        };
        self.repo
            .commit(WriteBatch::new().with(approved).with(transaction))
            .await?;
        Ok(true)
    }

    async fn try_reject(&self, ctx: &GateContext, id: ProcurementId) -> Result<bool, RequestError> {
        let request = self.load(ctx, id).await?;
        let Some(rejected) = reject_procurement(&request, ctx.decided_at)? else {
            return Ok(false);
        };
        self.repo.commit(WriteBatch::new().with(rejected)).await?;
        Ok(true)
    }
}

#[async_trait]
impl<R: RequestRepository + 'static> ResourceHandler for ProcurementHandler<R> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Procurement
    }

    async fn on_approved(&self, ctx: &GateContext, resource_id: Uuid) -> Result<(), AppError> {
        let id = ProcurementId::from_uuid(resource_id);
        let changed = self
            .retry
            .run("approve_procurement", || self.try_approve(ctx, id))
            .await?;
        log_transition("procurement", resource_id, changed, true);
        Ok(())
    }

    async fn on_rejected(&self, ctx: &GateContext, resource_id: Uuid) -> Result<(), AppError> {
        let id = ProcurementId::from_uuid(resource_id);
        let changed = self
            .retry
            .run("reject_procurement", || self.try_reject(ctx, id))
            .await?;
        log_transition("procurement", resource_id, changed, false);
        Ok(())
    }
}

// ========== Payment Verification ==========

/// Verifies or rejects a pending bank transfer once its approval concludes.
pub struct PaymentVerificationHandler<R: BillingRepository> {
    billing: Arc<BillingService<R>>,
}

impl<R: BillingRepository> PaymentVerificationHandler<R> {
    /// Creates the handler.
    #[must_use]
    pub fn new(billing: Arc<BillingService<R>>) -> Self {
        Self { billing }
    }
}

#[async_trait]
impl<R: BillingRepository + 'static> ResourceHandler for PaymentVerificationHandler<R> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::PaymentVerification
    }

    async fn on_approved(&self, ctx: &GateContext, resource_id: Uuid) -> Result<(), AppError> {
        let actor = ctx.actor();
        let payment_id = PaymentId::from_uuid(resource_id);
        match self.billing.verify_authorized(&actor, payment_id).await {
            Ok(_) => Ok(()),
            Err(BillingError::PaymentNotPending {
                status: PaymentStatus::Verified,
                ..
            }) => {
                debug!(%payment_id, "payment already verified");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn on_rejected(&self, ctx: &GateContext, resource_id: Uuid) -> Result<(), AppError> {
        let actor = ctx.actor();
        let payment_id = PaymentId::from_uuid(resource_id);
        let reason = ctx.reason_or(REJECTED_REASON);
        match self
            .billing
            .reject_authorized(&actor, payment_id, reason)
            .await
        {
            Ok(_) => Ok(()),
            Err(BillingError::PaymentNotPending {
                status: PaymentStatus::Rejected,
                ..
            }) => {
                debug!(%payment_id, "payment already rejected");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn log_transition(family: &'static str, resource_id: Uuid, changed: bool, approved: bool) {
    if changed {
        info!(family, %resource_id, approved, "request concluded");
    } else {
        debug!(family, %resource_id, approved, "request already concluded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requests::types::ProcurementItem;
    use carehome_shared::types::{Money, OrganizationId};
    use chrono::NaiveDate;

    fn expense(status: RequestStatus) -> OperationalExpense {
        OperationalExpense {
            id: OperationalExpenseId::new(),
            organization_id: OrganizationId::new(),
            code: "OEX-20250301-AB12CD".into(),
            category: "Utilities".into(),
            description: "Electricity March".into(),
            amount: Money::new(1_250_000),
            account: AccountType::Bank,
            bank_account_id: None,
            date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            receipt: None,
            requires_approval: true,
            status,
            transaction_id: None,
            created_by: UserId::new(),
            created_at: Utc::now(),
            decided_at: None,
            version: 2,
        }
    }

    fn procurement(status: RequestStatus) -> ProcurementRequest {
        ProcurementRequest {
            id: ProcurementId::new(),
            organization_id: OrganizationId::new(),
            code: "PRC-20250301-AB12CD".into(),
            description: "Medical supplies".into(),
            items: vec![ProcurementItem {
                inventory_item_id: None,
                name: "Gloves".into(),
                quantity: 10,
                unit: "box".into(),
                unit_price: Money::new(85_000),
                reserved_quantity: 10,
            }],
            total: Money::new(850_000),
            date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            status,
            transaction_id: None,
            created_by: UserId::new(),
            created_at: Utc::now(),
            decided_at: None,
            version: 0,
        }
    }

    #[test]
    fn test_approve_expense_books_transaction() {
        let pending = expense(RequestStatus::Pending);
        let approver = UserId::new();
        let (approved, trx) = approve_expense(&pending, approver, Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(approved.status, RequestStatus::Approved);
        assert_eq!(approved.transaction_id, Some(trx.id));
        assert_eq!(approved.version, pending.version);
        assert_eq!(trx.kind, TransactionType::Expense);
        assert_eq!(trx.amount, pending.amount);
        assert_eq!(trx.account, AccountType::Bank);
        assert_eq!(
            trx.source,
            SourceRef::new(ReferenceType::OperationalExpense, pending.id)
        );
        assert!(trx.is_realized);
        assert_eq!(trx.created_by, approver);
    }

    #[test]
    fn test_expense_transitions_are_idempotent() {
        let approved = expense(RequestStatus::Approved);
        assert!(approve_expense(&approved, UserId::new(), Utc::now())
            .unwrap()
            .is_none());
        assert!(matches!(
            reject_expense(&approved, Utc::now()),
            Err(RequestError::NotPending {
                status: RequestStatus::Approved,
                ..
            })
        ));

        let rejected = expense(RequestStatus::Rejected);
        assert!(reject_expense(&rejected, Utc::now()).unwrap().is_none());
        assert!(approve_expense(&rejected, UserId::new(), Utc::now()).is_err());
    }

    #[test]
    fn test_reject_procurement_releases_reservations() {
        let pending = procurement(RequestStatus::Pending);
        assert_eq!(pending.reserved_quantity(), 10);
        let rejected = reject_procurement(&pending, Utc::now()).unwrap().unwrap();
        assert_eq!(rejected.status, RequestStatus::Rejected);
        assert_eq!(rejected.reserved_quantity(), 0);
        assert!(rejected.transaction_id.is_none());
    }

    #[test]
    fn test_approve_procurement_keeps_reservations() {
        let pending = procurement(RequestStatus::Pending);
        let (approved, trx) = approve_procurement(&pending, UserId::new(), Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(approved.reserved_quantity(), 10);
        assert_eq!(trx.amount, Money::new(850_000));
        assert_eq!(trx.category, PROCUREMENT_CATEGORY);
        assert_eq!(trx.account, AccountType::Cash);
    }
}
