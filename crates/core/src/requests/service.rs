//! Submission of gated requests.
//!
//! A gated record is committed in PENDING first and only then handed to the
//! approval gate, so the callback that concludes it always finds it. When the
//! gate refuses to open an approval the record is voided again.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use carehome_shared::types::{
    CodePrefix, DocumentCode, Money, OperationalExpenseId, ProcurementId,
};

use super::error::RequestError;
use super::handlers::{approve_expense, reject_expense, reject_procurement};
use super::types::{
    NewOperationalExpense, NewProcurement, OperationalExpense, ProcurementItem,
    ProcurementRequest, RequestStatus,
};
use crate::billing::{Payment, PaymentMethod, PaymentStatus};
use crate::gate::{ApprovalGate, GateError};
use crate::identity::ActorContext;
use crate::ledger::AccountType;
use crate::store::{ApprovalRepository, RequestRepository, RetryPolicy, WriteBatch};
use crate::workflow::{Approval, AttributeValue, Attributes, ResourceKind, ResourceRef};

/// A submitted record and the approval gating it, if any.
#[derive(Debug, Clone)]
pub struct Submitted<T> {
    /// Record as stored after submission.
    pub record: T,
    /// Approval opened for it.
    pub approval: Option<Approval>,
}

/// Submits operational expenses, procurement and payment verification
/// through the approval gate.
pub struct RequestService<R: RequestRepository + ApprovalRepository> {
    repo: Arc<R>,
    gate: Arc<ApprovalGate<R>>,
    retry: RetryPolicy,
}

impl<R: RequestRepository + ApprovalRepository> RequestService<R> {
    /// Creates a request service.
    #[must_use]
    pub fn new(repo: Arc<R>, gate: Arc<ApprovalGate<R>>) -> Self {
        Self {
            repo,
            gate,
            retry: RetryPolicy::default(),
        }
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Submits an operational expense.
    ///
    /// Without `requires_approval` the expense is approved and booked at
    /// once. Otherwise it stays PENDING behind an approval whose conditions
    /// see `amount` and `category`.
    pub async fn submit_operational_expense(
        &self,
        ctx: &ActorContext,
        input: NewOperationalExpense,
    ) -> Result<Submitted<OperationalExpense>, RequestError> {
        let expense = build_expense(ctx, input)?;

        if !expense.requires_approval {
            let now = Utc::now();
            let Some((approved, transaction)) = approve_expense(&expense, ctx.user_id, now)? else {
                return Err(RequestError::NotPending {
                    code: expense.code,
                    status: expense.status,
                });
            };
            let batch = WriteBatch::new().with(approved.clone()).with(transaction);
            self.retry
                .run("submit_operational_expense", || self.commit(batch.clone()))
                .await?;
            info!(code = %approved.code, amount = %approved.amount, "operational expense booked");
            return Ok(Submitted {
                record: approved,
                approval: None,
            });
        }

        let batch = WriteBatch::new().with(expense.clone());
        self.retry
            .run("submit_operational_expense", || self.commit(batch.clone()))
            .await?;

        let resource = ResourceRef::new(ResourceKind::OperationalExpense, expense.id);
        let attributes = Attributes::with_amount(expense.amount)
            .with("category", expense.category.as_str())
            .with("account", account_name(expense.account));
        let approval = match self.gate.request_gate(ctx, resource, attributes).await {
            Ok(approval) => approval,
            Err(err) => {
                if opened(&err) {
                    return Err(err.into());
                }
                if let Some(voided) = reject_expense(&expense, Utc::now())? {
                    self.void(WriteBatch::new().with(voided), resource).await;
                }
                return Err(err.into());
            }
        };

        let record = self.load_expense(ctx, expense.id).await?;
        info!(
            code = %record.code,
            amount = %record.amount,
            approval_id = %approval.id,
            status = %record.status,
            "operational expense submitted"
        );
        Ok(Submitted {
            record,
            approval: Some(approval),
        })
    }

    /// Submits a procurement request. Item quantities are reserved until the
    /// approval concludes.
    pub async fn submit_procurement(
        &self,
        ctx: &ActorContext,
        input: NewProcurement,
    ) -> Result<Submitted<ProcurementRequest>, RequestError> {
        let request = build_procurement(ctx, input)?;
        let batch = WriteBatch::new().with(request.clone());
        self.retry
            .run("submit_procurement", || self.commit(batch.clone()))
            .await?;

        let resource = ResourceRef::new(ResourceKind::Procurement, request.id);
        let item_count = i64::try_from(request.items.len()).unwrap_or(i64::MAX);
        let attributes = Attributes::with_amount(request.total)
            .with("item_count", AttributeValue::Amount(item_count));
        let approval = match self.gate.request_gate(ctx, resource, attributes).await {
            Ok(approval) => approval,
            Err(err) => {
                if opened(&err) {
                    return Err(err.into());
                }
                if let Some(voided) = reject_procurement(&request, Utc::now())? {
                    self.void(WriteBatch::new().with(voided), resource).await;
                }
                return Err(err.into());
            }
        };

        let record = self.load_procurement(ctx, request.id).await?;
        info!(
            code = %record.code,
            total = %record.total,
            approval_id = %approval.id,
            status = %record.status,
            "procurement submitted"
        );
        Ok(Submitted {
            record,
            approval: Some(approval),
        })
    }

    /// Routes a pending bank transfer through the verification workflow.
    ///
    /// The payment itself is untouched until the approval concludes.
    pub async fn request_payment_verification(
        &self,
        ctx: &ActorContext,
        payment: &Payment,
    ) -> Result<Approval, RequestError> {
        if payment.organization_id != ctx.organization_id
            || payment.method != PaymentMethod::BankTransfer
            || payment.status != PaymentStatus::Pending
        {
            return Err(RequestError::NotVerifiable(payment.id));
        }
        let resource = ResourceRef::new(ResourceKind::PaymentVerification, payment.id);
        let attributes = Attributes::with_amount(payment.amount).with("method", "BANK_TRANSFER");
        let approval = self.gate.request_gate(ctx, resource, attributes).await?;
        info!(
            payment_id = %payment.id,
            approval_id = %approval.id,
            status = %approval.status,
            "payment verification requested"
        );
        Ok(approval)
    }

    // ========== Queries ==========

    /// Loads an operational expense visible to the actor.
    pub async fn operational_expense(
        &self,
        ctx: &ActorContext,
        id: OperationalExpenseId,
    ) -> Result<OperationalExpense, RequestError> {
        self.load_expense(ctx, id).await
    }

    /// Loads a procurement request visible to the actor.
    pub async fn procurement(
        &self,
        ctx: &ActorContext,
        id: ProcurementId,
    ) -> Result<ProcurementRequest, RequestError> {
        self.load_procurement(ctx, id).await
    }

    // ========== Helpers ==========

    async fn commit(&self, batch: WriteBatch) -> Result<(), RequestError> {
        self.repo.commit(batch).await?;
        Ok(())
    }

    /// Voids a record the gate refused. The record stays PENDING if this
    /// fails; it never reached an approval, so nothing else can conclude it.
    async fn void(&self, batch: WriteBatch, resource: ResourceRef) {
        if let Err(e) = self.commit(batch).await {
            warn!(%resource, error = %e, "failed to void request refused by the gate");
        }
    }

    async fn load_expense(
        &self,
        ctx: &ActorContext,
        id: OperationalExpenseId,
    ) -> Result<OperationalExpense, RequestError> {
        self.repo
            .operational_expense(id)
            .await?
            .filter(|e| e.organization_id == ctx.organization_id)
            .ok_or(RequestError::ExpenseNotFound(id))
    }

    async fn load_procurement(
        &self,
        ctx: &ActorContext,
        id: ProcurementId,
    ) -> Result<ProcurementRequest, RequestError> {
        self.repo
            .procurement(id)
            .await?
            .filter(|p| p.organization_id == ctx.organization_id)
            .ok_or(RequestError::ProcurementNotFound(id))
    }
}

/// True when the approval exists and only its callback failed; the record
/// is then left for redelivery instead of being voided.
fn opened(err: &GateError) -> bool {
    matches!(err, GateError::Handler { .. })
}

const fn account_name(account: AccountType) -> &'static str {
    match account {
        AccountType::Cash => "CASH",
        AccountType::Bank => "BANK",
    }
}

fn required(field: &str, value: &str) -> Result<String, RequestError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(RequestError::InvalidInput(format!("{field} is required")));
    }
    Ok(value.to_string())
}

fn positive(amount: Money) -> Result<Money, RequestError> {
    if !amount.is_positive() || !amount.in_range() {
        return Err(RequestError::NonPositiveAmount(amount));
    }
    Ok(amount)
}

fn build_expense(
    ctx: &ActorContext,
    input: NewOperationalExpense,
) -> Result<OperationalExpense, RequestError> {
    let amount = positive(input.amount)?;
    let category = required("category", &input.category)?;
    let bank_account_id = match (input.account, input.bank_account_id) {
        (AccountType::Bank, None) => {
            return Err(RequestError::InvalidInput(
                "bank expenses need a bank account".into(),
            ));
        }
        (AccountType::Cash, Some(_)) => {
            return Err(RequestError::InvalidInput(
                "cash expenses take no bank account".into(),
            ));
        }
        (_, id) => id,
    };
    Ok(OperationalExpense {
        id: OperationalExpenseId::new(),
        organization_id: ctx.organization_id,
        code: DocumentCode::generate(CodePrefix::OperationalExpense, input.date),
        category,
        description: input.description.trim().to_string(),
        amount,
        account: input.account,
        bank_account_id,
        date: input.date,
        receipt: input.receipt.filter(|r| !r.trim().is_empty()),
        requires_approval: input.requires_approval,
        status: RequestStatus::Pending,
        transaction_id: None,
        created_by: ctx.user_id,
        created_at: Utc::now(),
        decided_at: None,
        version: 0,
    })
}

fn build_procurement(
    ctx: &ActorContext,
    input: NewProcurement,
) -> Result<ProcurementRequest, RequestError> {
    if input.items.is_empty() {
        return Err(RequestError::InvalidInput(
            "procurement needs at least one item".into(),
        ));
    }
    let mut items = Vec::with_capacity(input.items.len());
    let mut total = Money::ZERO;
    for item in input.items {
        let name = required("item name", &item.name)?;
        if item.quantity == 0 {
            return Err(RequestError::InvalidInput(format!(
                "{name}: quantity must be at least 1"
            )));
        }
        let unit_price = positive(item.unit_price)?;
        let line = ProcurementItem {
            inventory_item_id: item.inventory_item_id,
            name,
            quantity: item.quantity,
            unit: item.unit.trim().to_string(),
            unit_price,
            reserved_quantity: item.quantity,
        };
        total = line
            .line_total()
            .and_then(|t| total.checked_add(t))
            .filter(|t| t.in_range())
            .ok_or_else(|| RequestError::InvalidInput("procurement total overflows".into()))?;
        items.push(line);
    }
    Ok(ProcurementRequest {
        id: ProcurementId::new(),
        organization_id: ctx.organization_id,
        code: DocumentCode::generate(CodePrefix::Procurement, input.date),
        description: required("description", &input.description)?,
        items,
        total,
        date: input.date,
        status: RequestStatus::Pending,
        transaction_id: None,
        created_by: ctx.user_id,
        created_at: Utc::now(),
        decided_at: None,
        version: 0,
    })
}
