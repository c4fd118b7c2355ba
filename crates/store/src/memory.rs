//! In-memory tables behind a single lock.
//!
//! A commit validates every write of the batch against the current tables
//! (versions, duplicate inserts, cross-record uniqueness) before applying any
//! of them, so a failing batch leaves no trace.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use carehome_core::billing::{
    BillingPeriod, Charge, Contract, PatientExpense, Payment, PeriodStatus,
};
use carehome_core::ledger::{SourceRef, Transaction};
use carehome_core::requests::{OperationalExpense, ProcurementRequest};
use carehome_core::store::{
    ApprovalRepository, BillingRepository, LedgerRepository, LedgerStore, RequestRepository,
    StoreError, Versioned, Write, WriteBatch,
};
use carehome_core::workflow::{
    Approval, ApprovalAction, ApprovalStatus, ApprovalWorkflow, ResourceKind, ResourceRef,
};
use carehome_shared::types::{
    ApprovalId, BillingPeriodId, ContractId, OperationalExpenseId, OrganizationId, PaymentId,
    ProcurementId, TransactionId, WorkflowId,
};

#[derive(Debug, Default)]
struct Tables {
    contracts: HashMap<ContractId, Contract>,
    periods: HashMap<BillingPeriodId, BillingPeriod>,
    charges: Vec<Charge>,
    patient_expenses: Vec<PatientExpense>,
    payments: HashMap<PaymentId, Payment>,
    transactions: HashMap<TransactionId, Transaction>,
    workflows: HashMap<WorkflowId, ApprovalWorkflow>,
    approvals: HashMap<ApprovalId, Approval>,
    actions: Vec<ApprovalAction>,
    operational_expenses: HashMap<OperationalExpenseId, OperationalExpense>,
    procurements: HashMap<ProcurementId, ProcurementRequest>,
}

impl Tables {
    fn validate(&self, writes: &[Write]) -> Result<(), StoreError> {
        let mut touched = HashSet::with_capacity(writes.len());
        for write in writes {
            let (entity, id) = entity_key(write);
            if !touched.insert(id) {
                return Err(StoreError::Duplicate { entity, id });
            }
            self.check(write)?;
        }
        self.check_unique(writes, &touched)
    }

    fn check(&self, write: &Write) -> Result<(), StoreError> {
        match write {
            Write::Contract(c) => check_versioned(&self.contracts, "contract", c.id, c),
            Write::Period(p) => check_versioned(&self.periods, "billing_period", p.id, p),
            Write::Charge(c) => {
                check_insert(self.charges.iter().any(|x| x.id == c.id), "charge", c.id)
            }
            Write::PatientExpense(e) => check_insert(
                self.patient_expenses.iter().any(|x| x.id == e.id),
                "patient_expense",
                e.id,
            ),
            Write::Payment(p) => check_versioned(&self.payments, "payment", p.id, p),
            Write::Transaction(t) => check_versioned(&self.transactions, "transaction", t.id, t),
            Write::Workflow(w) => check_versioned(&self.workflows, "workflow", w.id, w),
            Write::Approval(a) => check_versioned(&self.approvals, "approval", a.id, a),
            Write::ApprovalAction(a) => check_insert(
                self.actions.iter().any(|x| x.id == a.id),
                "approval_action",
                a.id,
            ),
            Write::OperationalExpense(e) => {
                check_versioned(&self.operational_expenses, "operational_expense", e.id, e)
            }
            Write::Procurement(p) => check_versioned(&self.procurements, "procurement", p.id, p),
        }
    }

    /// Uniqueness is checked against the state the batch would produce.
    fn check_unique(&self, writes: &[Write], touched: &HashSet<Uuid>) -> Result<(), StoreError> {
        for write in writes {
            match write {
                Write::Period(p) => {
                    let clash = after(&self.periods, writes, touched, as_period).any(|q| {
                        q.id != p.id
                            && q.contract_id == p.contract_id
                            && q.year == p.year
                            && q.month == p.month
                    });
                    if clash {
                        return Err(StoreError::UniqueViolation {
                            constraint: "period_contract_month",
                            key: format!("{}:{}-{:02}", p.contract_id, p.year, p.month),
                        });
                    }
                }
                Write::Approval(a) if !a.status.is_terminal() => {
                    let clash = after(&self.approvals, writes, touched, as_approval).any(|b| {
                        b.id != a.id && b.resource == a.resource && !b.status.is_terminal()
                    });
                    if clash {
                        return Err(StoreError::UniqueViolation {
                            constraint: "approval_open_resource",
                            key: a.resource.to_string(),
                        });
                    }
                }
                Write::Workflow(w) if w.active => {
                    let clash = after(&self.workflows, writes, touched, as_workflow).any(|v| {
                        v.id != w.id
                            && v.active
                            && v.organization_id == w.organization_id
                            && v.resource_kind == w.resource_kind
                    });
                    if clash {
                        return Err(StoreError::UniqueViolation {
                            constraint: "workflow_active_kind",
                            key: format!("{}:{}", w.organization_id, w.resource_kind),
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn apply(&mut self, write: Write) {
        match write {
            Write::Contract(c) => upsert(&mut self.contracts, c.id, c),
            Write::Period(p) => upsert(&mut self.periods, p.id, p),
            Write::Charge(c) => self.charges.push(c),
            Write::PatientExpense(e) => self.patient_expenses.push(e),
            Write::Payment(p) => upsert(&mut self.payments, p.id, p),
            Write::Transaction(t) => upsert(&mut self.transactions, t.id, t),
            Write::Workflow(w) => upsert(&mut self.workflows, w.id, w),
            Write::Approval(a) => upsert(&mut self.approvals, a.id, a),
            Write::ApprovalAction(a) => self.actions.push(a),
            Write::OperationalExpense(e) => upsert(&mut self.operational_expenses, e.id, e),
            Write::Procurement(p) => upsert(&mut self.procurements, p.id, p),
        }
    }
}

fn entity_key(write: &Write) -> (&'static str, Uuid) {
    match write {
        Write::Contract(c) => ("contract", c.id.into()),
        Write::Period(p) => ("billing_period", p.id.into()),
        Write::Charge(c) => ("charge", c.id.into()),
        Write::PatientExpense(e) => ("patient_expense", e.id.into()),
        Write::Payment(p) => ("payment", p.id.into()),
        Write::Transaction(t) => ("transaction", t.id.into()),
        Write::Workflow(w) => ("workflow", w.id.into()),
        Write::Approval(a) => ("approval", a.id.into()),
        Write::ApprovalAction(a) => ("approval_action", a.id.into()),
        Write::OperationalExpense(e) => ("operational_expense", e.id.into()),
        Write::Procurement(p) => ("procurement", p.id.into()),
    }
}

fn check_versioned<K, V>(
    table: &HashMap<K, V>,
    entity: &'static str,
    id: K,
    incoming: &V,
) -> Result<(), StoreError>
where
    K: Eq + Hash + Into<Uuid>,
    V: Versioned,
{
    match table.get(&id) {
        Some(stored) if stored.version() != incoming.version() => {
            Err(StoreError::VersionConflict {
                entity,
                id: id.into(),
                expected: incoming.version(),
                found: stored.version(),
            })
        }
        Some(_) => Ok(()),
        None if incoming.version() != 0 => Err(StoreError::Missing {
            entity,
            id: id.into(),
        }),
        None => Ok(()),
    }
}

fn check_insert(exists: bool, entity: &'static str, id: impl Into<Uuid>) -> Result<(), StoreError> {
    if exists {
        return Err(StoreError::Duplicate {
            entity,
            id: id.into(),
        });
    }
    Ok(())
}

fn upsert<K: Eq + Hash, V: Versioned>(table: &mut HashMap<K, V>, id: K, mut record: V) {
    if table.contains_key(&id) {
        record.set_version(record.version() + 1);
    }
    table.insert(id, record);
}

/// Records of one table as they would be after `writes` commit.
fn after<'a, K, V>(
    table: &'a HashMap<K, V>,
    writes: &'a [Write],
    touched: &'a HashSet<Uuid>,
    pick: fn(&Write) -> Option<&V>,
) -> impl Iterator<Item = &'a V>
where
    K: Copy + Into<Uuid>,
{
    table
        .iter()
        .filter(|(id, _)| !touched.contains(&(**id).into()))
        .map(|(_, record)| record)
        .chain(writes.iter().filter_map(pick))
}

fn as_period(write: &Write) -> Option<&BillingPeriod> {
    match write {
        Write::Period(p) => Some(p),
        _ => None,
    }
}

fn as_approval(write: &Write) -> Option<&Approval> {
    match write {
        Write::Approval(a) => Some(a),
        _ => None,
    }
}

fn as_workflow(write: &Write) -> Option<&ApprovalWorkflow> {
    match write {
        Write::Workflow(w) => Some(w),
        _ => None,
    }
}

/// Process-local store implementing every repository port.
///
/// Commits are serialized by one lock and yield to the scheduler first, so
/// concurrent operations interleave their reads and lose version races the
/// way they would against a database.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    injected_failures: AtomicU32,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` commits fail with [`StoreError::Unavailable`].
    pub fn fail_next_commits(&self, count: u32) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> bool {
        self.injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        let tables = self.tables.read().await;
        f(&tables)
    }
}

impl LedgerStore for MemoryStore {
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        if self.take_injected_failure() {
            warn!("injected store failure");
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        let writes = batch.into_writes();
        let mut tables = self.tables.write().await;
        if let Err(e) = tables.validate(&writes) {
            debug!(error = %e, "batch refused");
            return Err(e);
        }
        let count = writes.len();
        for write in writes {
            tables.apply(write);
        }
        debug!(writes = count, "batch committed");
        Ok(())
    }
}

impl LedgerRepository for MemoryStore {
    async fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        Ok(self.read(|t| t.transactions.get(&id).cloned()).await)
    }

    async fn transactions_for_source(
        &self,
        source: SourceRef,
    ) -> Result<Vec<Transaction>, StoreError> {
        let mut found: Vec<_> = self
            .read(|t| {
                t.transactions
                    .values()
                    .filter(|trx| trx.source == source)
                    .cloned()
                    .collect()
            })
            .await;
        found.sort_by_key(|trx| trx.created_at);
        Ok(found)
    }

    async fn transactions_between(
        &self,
        organization_id: OrganizationId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Transaction>, StoreError> {
        let mut found: Vec<_> = self
            .read(|t| {
                t.transactions
                    .values()
                    .filter(|trx| {
                        trx.organization_id == organization_id && trx.date >= from && trx.date <= to
                    })
                    .cloned()
                    .collect()
            })
            .await;
        found.sort_by_key(|trx| (trx.date, trx.created_at));
        Ok(found)
    }
}

impl BillingRepository for MemoryStore {
    async fn contract(&self, id: ContractId) -> Result<Option<Contract>, StoreError> {
        Ok(self.read(|t| t.contracts.get(&id).cloned()).await)
    }

    async fn period(&self, id: BillingPeriodId) -> Result<Option<BillingPeriod>, StoreError> {
        Ok(self.read(|t| t.periods.get(&id).cloned()).await)
    }

    async fn periods_for_contract(
        &self,
        contract_id: ContractId,
    ) -> Result<Vec<BillingPeriod>, StoreError> {
        let mut found: Vec<_> = self
            .read(|t| {
                t.periods
                    .values()
                    .filter(|p| p.contract_id == contract_id)
                    .cloned()
                    .collect()
            })
            .await;
        found.sort_by_key(|p| (p.year, p.month));
        Ok(found)
    }

    async fn periods_with_status(
        &self,
        status: PeriodStatus,
    ) -> Result<Vec<BillingPeriod>, StoreError> {
        let mut found: Vec<_> = self
            .read(|t| {
                t.periods
                    .values()
                    .filter(|p| p.status == status)
                    .cloned()
                    .collect()
            })
            .await;
        found.sort_by_key(|p| (p.due_date, p.created_at));
        Ok(found)
    }

    async fn charges_for_period(
        &self,
        period_id: BillingPeriodId,
    ) -> Result<Vec<Charge>, StoreError> {
        Ok(self
            .read(|t| {
                t.charges
                    .iter()
                    .filter(|c| c.period_id == period_id)
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn expenses_for_period(
        &self,
        period_id: BillingPeriodId,
    ) -> Result<Vec<PatientExpense>, StoreError> {
        Ok(self
            .read(|t| {
                t.patient_expenses
                    .iter()
                    .filter(|e| e.period_id == period_id)
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn payments_for_period(
        &self,
        period_id: BillingPeriodId,
    ) -> Result<Vec<Payment>, StoreError> {
        let mut found: Vec<_> = self
            .read(|t| {
                t.payments
                    .values()
                    .filter(|p| p.period_id == period_id)
                    .cloned()
                    .collect()
            })
            .await;
        found.sort_by_key(|p| p.created_at);
        Ok(found)
    }

    async fn payments_for_contract(
        &self,
        contract_id: ContractId,
    ) -> Result<Vec<Payment>, StoreError> {
        let mut found: Vec<_> = self
            .read(|t| {
                t.payments
                    .values()
                    .filter(|p| p.contract_id == contract_id)
                    .cloned()
                    .collect()
            })
            .await;
        found.sort_by_key(|p| (p.date, p.created_at));
        Ok(found)
    }

    async fn payment(&self, id: PaymentId) -> Result<Option<Payment>, StoreError> {
        Ok(self.read(|t| t.payments.get(&id).cloned()).await)
    }
}

impl ApprovalRepository for MemoryStore {
    async fn workflow(&self, id: WorkflowId) -> Result<Option<ApprovalWorkflow>, StoreError> {
        Ok(self.read(|t| t.workflows.get(&id).cloned()).await)
    }

    async fn workflows_for(
        &self,
        organization_id: OrganizationId,
        kind: ResourceKind,
    ) -> Result<Vec<ApprovalWorkflow>, StoreError> {
        let mut found: Vec<_> = self
            .read(|t| {
                t.workflows
                    .values()
                    .filter(|w| w.organization_id == organization_id && w.resource_kind == kind)
                    .cloned()
                    .collect()
            })
            .await;
        found.sort_by_key(|w| w.created_at);
        Ok(found)
    }

    async fn approval(&self, id: ApprovalId) -> Result<Option<Approval>, StoreError> {
        Ok(self.read(|t| t.approvals.get(&id).cloned()).await)
    }

    async fn open_approval_for(
        &self,
        resource: ResourceRef,
    ) -> Result<Option<Approval>, StoreError> {
        Ok(self
            .read(|t| {
                t.approvals
                    .values()
                    .find(|a| a.resource == resource && !a.status.is_terminal())
                    .cloned()
            })
            .await)
    }

    async fn approvals_with_status(
        &self,
        organization_id: OrganizationId,
        status: ApprovalStatus,
    ) -> Result<Vec<Approval>, StoreError> {
        let mut found: Vec<_> = self
            .read(|t| {
                t.approvals
                    .values()
                    .filter(|a| a.organization_id == organization_id && a.status == status)
                    .cloned()
                    .collect()
            })
            .await;
        found.sort_by_key(|a| a.requested_at);
        Ok(found)
    }

    async fn expired_approvals(&self, now: DateTime<Utc>) -> Result<Vec<Approval>, StoreError> {
        let mut found: Vec<_> = self
            .read(|t| {
                t.approvals
                    .values()
                    .filter(|a| a.is_expired(now))
                    .cloned()
                    .collect()
            })
            .await;
        found.sort_by_key(|a| a.timeout_at);
        Ok(found)
    }

    async fn actions_for(&self, approval_id: ApprovalId) -> Result<Vec<ApprovalAction>, StoreError> {
        Ok(self
            .read(|t| {
                t.actions
                    .iter()
                    .filter(|a| a.approval_id == approval_id)
                    .cloned()
                    .collect()
            })
            .await)
    }
}

impl RequestRepository for MemoryStore {
    async fn operational_expense(
        &self,
        id: OperationalExpenseId,
    ) -> Result<Option<OperationalExpense>, StoreError> {
        Ok(self.read(|t| t.operational_expenses.get(&id).cloned()).await)
    }

    async fn procurement(
        &self,
        id: ProcurementId,
    ) -> Result<Option<ProcurementRequest>, StoreError> {
        Ok(self.read(|t| t.procurements.get(&id).cloned()).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carehome_core::identity::Role;
    use carehome_core::workflow::ApprovalStep;

    fn workflow(org: OrganizationId, name: &str) -> ApprovalWorkflow {
        ApprovalWorkflow::new(
            org,
            name,
            ResourceKind::OperationalExpense,
            vec![ApprovalStep::new(1, Role::BENDAHARA)],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_then_versioned_update() {
        let store = MemoryStore::new();
        let org = OrganizationId::new();
        let mut wf = workflow(org, "Expenses");
        store.commit(WriteBatch::new().with(wf.clone())).await.unwrap();

        wf.description = Some("updated".into());
        store.commit(WriteBatch::new().with(wf.clone())).await.unwrap();
        let stored = store.workflow(wf.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);

        // A writer still holding version 0 loses.
        let err = store.commit(WriteBatch::new().with(wf)).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionConflict {
                expected: 0,
                found: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_failed_batch_applies_nothing() {
        let store = MemoryStore::new();
        let org = OrganizationId::new();
        let first = workflow(org, "First");
        store.commit(WriteBatch::new().with(first.clone())).await.unwrap();

        let second = workflow(OrganizationId::new(), "Second");
        let mut stale = first;
        stale.version = 7;
        let err = store
            .commit(WriteBatch::new().with(second.clone()).with(stale))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));
        assert!(store.workflow(second.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_one_active_workflow_per_kind() {
        let store = MemoryStore::new();
        let org = OrganizationId::new();
        store
            .commit(WriteBatch::new().with(workflow(org, "A")))
            .await
            .unwrap();
        let err = store
            .commit(WriteBatch::new().with(workflow(org, "B")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::UniqueViolation {
                constraint: "workflow_active_kind",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let store = MemoryStore::new();
        store.fail_next_commits(1);
        let wf = workflow(OrganizationId::new(), "Flaky");
        assert!(matches!(
            store.commit(WriteBatch::new().with(wf.clone())).await,
            Err(StoreError::Unavailable(_))
        ));
        store.commit(WriteBatch::new().with(wf)).await.unwrap();
    }

    #[tokio::test]
    async fn test_same_record_twice_in_batch_is_refused() {
        let store = MemoryStore::new();
        let wf = workflow(OrganizationId::new(), "Twice");
        let err = store
            .commit(WriteBatch::new().with(wf.clone()).with(wf))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { entity: "workflow", .. }));
    }
}
