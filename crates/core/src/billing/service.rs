//! Billing period service.
//!
//! Every balance-affecting operation reads the period and all of its
//! postings, rebuilds the totals from scratch and commits the period together
//! with the new posting (and any ledger transaction) in one batch. The
//! period's version turns each operation into an atomic read-modify-write:
//! a concurrent writer that read the same version loses the commit and is
//! re-run against the winner's state.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use carehome_shared::config::BillingConfig;
use carehome_shared::types::{
    BillingPeriodId, CodePrefix, ContractId, DocumentCode, Money, PaymentId, UserId,
};

use super::balance::{PeriodTotals, Postings};
use super::error::BillingError;
use super::posting::{self, PaymentDraft};
use super::types::{
    BillingPeriod, CarriedDebt, Charge, Contract, ContractStatus, NewContract, OpenPeriod,
    OpeningPayment, PatientExpense, Payment, PaymentMethod, PaymentStatus, PeriodCalendar,
    PeriodStatus, PostCharge, PostExpense, RecordPayment,
};
use crate::identity::{ActorContext, Role};
use crate::ledger::{
    AccountType, LedgerError, NewTransaction, ReferenceType, SourceRef, Transaction,
    TransactionType,
};
use crate::notify::{DocumentGenerator, DomainEvent, EventSink};
use crate::store::{BillingRepository, RetryPolicy, WriteBatch};

/// Ledger category of settlement revenue.
pub const REVENUE_CATEGORY: &str = "Patient Service";

/// Billing rules taken from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingPolicy {
    /// Mandatory nursing charge posted when a period opens.
    pub nursing_charge: Money,
    /// Whether OVERDUE periods accept optional charges.
    pub overdue_accepts_charges: bool,
    /// Role allowed to verify or reject bank transfers.
    pub verifier_role: Role,
}

impl From<&BillingConfig> for BillingPolicy {
    fn from(config: &BillingConfig) -> Self {
        Self {
            nursing_charge: Money::new(config.nursing_charge),
            overdue_accepts_charges: config.overdue_accepts_charges,
            verifier_role: Role::new(&config.verifier_role),
        }
    }
}

/// A posting together with the period as committed.
#[derive(Debug, Clone)]
pub struct Posted<T> {
    /// The new or updated posting.
    pub record: T,
    /// The period with recomputed totals.
    pub period: BillingPeriod,
}

/// Result of settling or deferring a period.
#[derive(Debug, Clone)]
pub struct Closing {
    /// The closed period.
    pub period: BillingPeriod,
    /// Revenue transaction written by the close, if any.
    pub transaction: Option<Transaction>,
    /// Revenue recognized (settlement) or deferred (deferral).
    pub revenue: Money,
    updates_transaction: bool,
}

impl Closing {
    fn committed(mut self) -> Self {
        self.period.version += 1;
        if self.updates_transaction
            && let Some(trx) = self.transaction.as_mut()
        {
            trx.version += 1;
        }
        self
    }

    fn write_into(&self, batch: &mut WriteBatch) {
        batch.push(self.period.clone());
        if let Some(trx) = &self.transaction {
            batch.push(trx.clone());
        }
    }
}

/// Result of completing a contract.
#[derive(Debug, Clone)]
pub struct Completion {
    /// The completed contract.
    pub contract: Contract,
    /// Periods settled by the completion.
    pub settled: Vec<Closing>,
}

/// Stored totals compared against totals rebuilt from postings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    /// Period.
    pub period_id: BillingPeriodId,
    /// Figures on the period record.
    pub stored: PeriodTotals,
    /// Figures rebuilt from postings.
    pub recomputed: PeriodTotals,
}

impl ReconciliationReport {
    /// Returns true if the stored figures disagree with the postings.
    #[must_use]
    pub fn has_drift(&self) -> bool {
        self.stored != self.recomputed
    }
}

/// Billing period engine over a [`BillingRepository`].
pub struct BillingService<R: BillingRepository> {
    repo: Arc<R>,
    events: Arc<dyn EventSink>,
    documents: Option<Arc<dyn DocumentGenerator>>,
    policy: BillingPolicy,
    retry: RetryPolicy,
}

impl<R: BillingRepository> BillingService<R> {
    /// Creates a new billing service.
    #[must_use]
    pub fn new(repo: Arc<R>, events: Arc<dyn EventSink>, config: &BillingConfig) -> Self {
        Self {
            repo,
            events,
            documents: None,
            policy: BillingPolicy::from(config),
            retry: RetryPolicy::default(),
        }
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Renders an invoice after every settlement.
    #[must_use]
    pub fn with_documents(mut self, documents: Arc<dyn DocumentGenerator>) -> Self {
        self.documents = Some(documents);
        self
    }

    /// Active billing rules.
    #[must_use]
    pub fn policy(&self) -> &BillingPolicy {
        &self.policy
    }

    // ========== Contracts ==========

    /// Creates an ACTIVE contract.
    pub async fn create_contract(
        &self,
        ctx: &ActorContext,
        input: NewContract,
    ) -> Result<Contract, BillingError> {
        if !(1..=28).contains(&input.payment_due_day) {
            return Err(BillingError::InvalidInput(format!(
                "payment due day must be between 1 and 28, got {}",
                input.payment_due_day
            )));
        }
        if !input.monthly_rate.is_positive() {
            return Err(BillingError::NonPositiveAmount(input.monthly_rate));
        }
        if !input.monthly_rate.in_range() {
            return Err(BillingError::AmountOverflow("monthly rate"));
        }
        if input.end_date.is_some_and(|end| end < input.start_date) {
            return Err(BillingError::InvalidInput(
                "contract end date precedes its start date".into(),
            ));
        }

        let now = Utc::now();
        let contract = Contract {
            id: ContractId::new(),
            organization_id: ctx.organization_id,
            code: DocumentCode::generate(CodePrefix::Contract, input.start_date),
            patient_id: input.patient_id,
            room_id: input.room_id,
            monthly_rate: input.monthly_rate,
            payment_due_day: input.payment_due_day,
            start_date: input.start_date,
            end_date: input.end_date,
            status: ContractStatus::Active,
            checkout_date: None,
            closed_at: None,
            closed_by: None,
            termination_reason: None,
            created_by: ctx.user_id,
            created_at: now,
            version: 0,
        };
        self.repo
            .commit(WriteBatch::new().with(contract.clone()))
            .await?;
        info!(contract_id = %contract.id, code = %contract.code, "contract created");
        Ok(contract)
    }

    /// Completes a contract at checkout.
    ///
    /// Fails with [`BillingError::PaymentIncomplete`] while the patient owes
    /// money on any period. Otherwise every unsettled period is settled in
    /// the same commit and the room is released.
    pub async fn complete_contract(
        &self,
        ctx: &ActorContext,
        contract_id: ContractId,
        checkout_date: NaiveDate,
    ) -> Result<Completion, BillingError> {
        let completion = self
            .retry
            .run("complete_contract", move || {
                self.try_complete_contract(ctx, contract_id, checkout_date)
            })
            .await?;

        info!(
            contract_id = %contract_id,
            settled = completion.settled.len(),
            %checkout_date,
            "contract completed"
        );
        for closing in &completion.settled {
            self.after_settlement(closing).await;
        }
        self.events.publish(DomainEvent::ContractCompleted {
            organization_id: completion.contract.organization_id,
            contract_id,
            room_id: completion.contract.room_id,
            checkout_date,
        });
        Ok(completion)
    }

    async fn try_complete_contract(
        &self,
        ctx: &ActorContext,
        contract_id: ContractId,
        checkout_date: NaiveDate,
    ) -> Result<Completion, BillingError> {
        let mut contract = self.active_contract(ctx, contract_id).await?;
        if checkout_date < contract.start_date {
            return Err(BillingError::InvalidInput(
                "checkout date precedes the contract start".into(),
            ));
        }

        let mut owed = Money::ZERO;
        let mut unsettled = Vec::new();
        for period in self.repo.periods_for_contract(contract.id).await? {
            if period.status == PeriodStatus::Settled {
                if period.has_uncarried_debt() {
                    owed += period.outstanding();
                }
                continue;
            }
            let postings = self.postings(period.id).await?;
            owed += postings.totals(period.base_monthly_rate)?.outstanding();
            unsettled.push((period, postings));
        }
        if owed.is_positive() {
            return Err(BillingError::PaymentIncomplete {
                contract_id,
                outstanding: owed,
            });
        }

        let now = Utc::now();
        let mut batch = WriteBatch::new();
        let mut settled = Vec::with_capacity(unsettled.len());
        for (period, postings) in unsettled {
            let deferred = self.deferred_transaction(&period).await?;
            let closing = settle(period, &postings, deferred, ctx.user_id, now)?;
            closing.write_into(&mut batch);
            settled.push(closing);
        }

        contract.status = ContractStatus::Completed;
        contract.checkout_date = Some(checkout_date);
        contract.closed_at = Some(now);
        contract.closed_by = Some(ctx.user_id);
        batch.push(contract.clone());

        self.repo.commit(batch).await?;
        contract.version += 1;
        Ok(Completion {
            contract,
            settled: settled.into_iter().map(Closing::committed).collect(),
        })
    }

    /// Ends a contract early. Its periods can still be settled.
    pub async fn terminate_contract(
        &self,
        ctx: &ActorContext,
        contract_id: ContractId,
        reason: &str,
    ) -> Result<Contract, BillingError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(BillingError::InvalidInput(
                "a termination reason is required".into(),
            ));
        }
        let contract = self
            .retry
            .run("terminate_contract", move || {
                self.try_terminate_contract(ctx, contract_id, reason)
            })
            .await?;
        info!(contract_id = %contract_id, actor = %ctx.user_id, "contract terminated");
        Ok(contract)
    }

    async fn try_terminate_contract(
        &self,
        ctx: &ActorContext,
        contract_id: ContractId,
        reason: &str,
    ) -> Result<Contract, BillingError> {
        let mut contract = self.active_contract(ctx, contract_id).await?;
        contract.status = ContractStatus::Terminated;
        contract.termination_reason = Some(reason.to_string());
        contract.closed_at = Some(Utc::now());
        contract.closed_by = Some(ctx.user_id);
        self.repo
            .commit(WriteBatch::new().with(contract.clone()))
            .await?;
        contract.version += 1;
        Ok(contract)
    }

    // ========== Period lifecycle ==========

    /// Opens a billing period for an ACTIVE contract.
    ///
    /// Seeds the mandatory nursing charge, one charge line per carried debt
    /// and the opening payment (prepaid plus all carried debt).
    pub async fn open_period(
        &self,
        ctx: &ActorContext,
        input: OpenPeriod,
    ) -> Result<BillingPeriod, BillingError> {
        let period = self
            .retry
            .run("open_period", move || self.try_open_period(ctx, input.clone()))
            .await?;
        self.log_opened(&period);
        Ok(period)
    }

    /// Opens the next period, carrying every unpaid settled balance of the
    /// contract into it.
    pub async fn open_next_period(
        &self,
        ctx: &ActorContext,
        contract_id: ContractId,
        year: i32,
        month: u32,
        opening_payment: Option<OpeningPayment>,
    ) -> Result<BillingPeriod, BillingError> {
        let period = self
            .retry
            .run("open_next_period", move || {
                self.try_open_next_period(ctx, contract_id, year, month, opening_payment.clone())
            })
            .await?;
        self.log_opened(&period);
        Ok(period)
    }

    async fn try_open_next_period(
        &self,
        ctx: &ActorContext,
        contract_id: ContractId,
        year: i32,
        month: u32,
        opening_payment: Option<OpeningPayment>,
    ) -> Result<BillingPeriod, BillingError> {
        let carried_debt = self
            .repo
            .periods_for_contract(contract_id)
            .await?
            .into_iter()
            .filter(BillingPeriod::has_uncarried_debt)
            .map(|p| CarriedDebt {
                from_period: Some(p.id),
                description: format!("Unpaid balance of {}", p.code),
                amount: p.outstanding(),
            })
            .collect();

        self.try_open_period(
            ctx,
            OpenPeriod {
                contract_id,
                year,
                month,
                nursing_charge: None,
                opening_payment,
                carried_debt,
            },
        )
        .await
    }

    async fn try_open_period(
        &self,
        ctx: &ActorContext,
        input: OpenPeriod,
    ) -> Result<BillingPeriod, BillingError> {
        let contract = self.active_contract(ctx, input.contract_id).await?;
        let existing = self.repo.periods_for_contract(contract.id).await?;
        if let Some(open) = existing.iter().find(|p| p.status.is_open()) {
            return Err(BillingError::PeriodAlreadyOpen {
                contract_id: contract.id,
                period_id: open.id,
            });
        }
        if existing
            .iter()
            .any(|p| p.year == input.year && p.month == input.month)
        {
            return Err(BillingError::DuplicateMonth {
                contract_id: contract.id,
                year: input.year,
                month: input.month,
            });
        }
        let calendar = PeriodCalendar::for_month(input.year, input.month, contract.payment_due_day)
            .ok_or_else(|| {
                BillingError::InvalidInput(format!(
                    "invalid billing month {}-{}",
                    input.year, input.month
                ))
            })?;

        let now = Utc::now();
        let mut period = BillingPeriod {
            id: BillingPeriodId::new(),
            organization_id: contract.organization_id,
            contract_id: contract.id,
            code: DocumentCode::generate(CodePrefix::Period, calendar.start_date),
            year: input.year,
            month: input.month,
            start_date: calendar.start_date,
            end_date: calendar.end_date,
            due_date: calendar.due_date,
            base_monthly_rate: contract.monthly_rate,
            nursing_charge: Money::ZERO,
            additional_charges: Money::ZERO,
            total_charged: Money::ZERO,
            total_expenses: Money::ZERO,
            total_paid: Money::ZERO,
            balance: Money::ZERO,
            status: PeriodStatus::Active,
            settled_at: None,
            settled_by: None,
            deferred_transaction_id: None,
            debt_carried_to: None,
            created_at: now,
            version: 0,
        };

        let mut postings = Postings::default();
        let nursing = input.nursing_charge.unwrap_or(self.policy.nursing_charge);
        if nursing.is_negative() {
            return Err(BillingError::NonPositiveAmount(nursing));
        }
        if nursing.is_positive() {
            postings
                .charges
                .push(posting::nursing_line(&period, nursing, ctx.user_id, now)?);
        }

        // The contract write serializes concurrent opens for one contract.
        let mut batch = WriteBatch::new().with(contract.clone());
        let mut carried_total = Money::ZERO;
        let mut carried_from = Vec::new();
        for debt in &input.carried_debt {
            if let Some(source_id) = debt.from_period {
                if carried_from.contains(&source_id) {
                    return Err(BillingError::InvalidInput(format!(
                        "debt of period {source_id} listed twice"
                    )));
                }
                let mut source = existing
                    .iter()
                    .find(|p| p.id == source_id)
                    .cloned()
                    .ok_or(BillingError::PeriodNotFound(source_id))?;
                if !source.has_uncarried_debt() {
                    return Err(BillingError::InvalidInput(format!(
                        "period {} has no unpaid balance to carry",
                        source.code
                    )));
                }
                source.debt_carried_to = Some(period.id);
                batch.push(source);
                carried_from.push(source_id);
            }
            postings
                .charges
                .push(posting::carried_line(&period, debt, ctx.user_id, now)?);
            carried_total = carried_total
                .checked_add(debt.amount)
                .ok_or(BillingError::AmountOverflow("carried debt"))?;
        }

        if let Some(opening) = input.opening_payment {
            if opening.prepaid.is_negative() {
                return Err(BillingError::NonPositiveAmount(opening.prepaid));
            }
            let amount = opening
                .prepaid
                .checked_add(carried_total)
                .ok_or(BillingError::AmountOverflow("opening payment"))?;
            if amount.is_positive() {
                postings.payments.push(posting::payment(
                    PaymentDraft {
                        organization_id: contract.organization_id,
                        contract_id: contract.id,
                        period_id: period.id,
                        amount,
                        method: opening.method,
                        bank_reference: opening.bank_reference,
                        payer_name: opening.payer_name,
                        date: now.date_naive(),
                    },
                    ctx.user_id,
                    now,
                )?);
            }
        }

        postings
            .totals(period.base_monthly_rate)?
            .apply_to(&mut period);
        batch.push(period.clone());
        for charge in postings.charges {
            batch.push(charge);
        }
        for payment in postings.payments {
            batch.push(payment);
        }
        self.repo.commit(batch).await?;
        Ok(period)
    }

    fn log_opened(&self, period: &BillingPeriod) {
        info!(
            period_id = %period.id,
            contract_id = %period.contract_id,
            code = %period.code,
            total_charged = %period.total_charged,
            total_paid = %period.total_paid,
            balance = %period.balance,
            "billing period opened"
        );
    }

    /// Settles a period, recognizing a positive balance as revenue.
    ///
    /// A negative balance stays on the settled period as debt until the next
    /// period carries it.
    pub async fn settle_period(
        &self,
        ctx: &ActorContext,
        period_id: BillingPeriodId,
    ) -> Result<Closing, BillingError> {
        let closing = self
            .retry
            .run("settle_period", move || self.try_settle_period(ctx, period_id))
            .await?;
        info!(
            period_id = %period_id,
            balance = %closing.period.balance,
            revenue = %closing.revenue,
            "billing period settled"
        );
        self.after_settlement(&closing).await;
        Ok(closing)
    }

    async fn try_settle_period(
        &self,
        ctx: &ActorContext,
        period_id: BillingPeriodId,
    ) -> Result<Closing, BillingError> {
        let period = self.load_period(ctx, period_id).await?;
        if period.status == PeriodStatus::Settled {
            return Err(BillingError::PeriodClosed {
                period_id,
                status: period.status,
                posting: "settlement",
            });
        }
        let postings = self.postings(period.id).await?;
        let deferred = self.deferred_transaction(&period).await?;
        let closing = settle(period, &postings, deferred, ctx.user_id, Utc::now())?;

        let mut batch = WriteBatch::new();
        closing.write_into(&mut batch);
        self.repo.commit(batch).await?;
        Ok(closing.committed())
    }

    /// Closes the cycle of a still-resident patient without settling it.
    ///
    /// A positive balance is booked as unrealized revenue, realized later by
    /// settlement or checkout.
    pub async fn defer_period(
        &self,
        ctx: &ActorContext,
        period_id: BillingPeriodId,
    ) -> Result<Closing, BillingError> {
        let closing = self
            .retry
            .run("defer_period", move || self.try_defer_period(ctx, period_id))
            .await?;
        info!(
            period_id = %period_id,
            deferred = %closing.revenue,
            "billing period deferred"
        );
        Ok(closing)
    }

    async fn try_defer_period(
        &self,
        ctx: &ActorContext,
        period_id: BillingPeriodId,
    ) -> Result<Closing, BillingError> {
        let mut period = self.load_period(ctx, period_id).await?;
        if !period.status.is_open() {
            return Err(BillingError::PeriodClosed {
                period_id,
                status: period.status,
                posting: "deferral",
            });
        }
        let postings = self.postings(period.id).await?;
        let totals = postings.totals(period.base_monthly_rate)?;
        if totals.balance.is_negative() {
            return Err(BillingError::CannotDefer {
                period_id,
                balance: totals.balance,
            });
        }
        totals.apply_to(&mut period);

        let now = Utc::now();
        let transaction = if totals.balance.is_positive() {
            Some(revenue_transaction(
                &period,
                totals.balance,
                false,
                ctx.user_id,
                now,
            )?)
        } else {
            None
        };
        period.deferred_transaction_id = transaction.as_ref().map(|t| t.id);
        period.status = PeriodStatus::Unrealized;

        let closing = Closing {
            period,
            transaction,
            revenue: totals.balance,
            updates_transaction: false,
        };
        let mut batch = WriteBatch::new();
        closing.write_into(&mut batch);
        self.repo.commit(batch).await?;
        Ok(closing.committed())
    }

    /// Moves ACTIVE periods past their due date with money owed to OVERDUE.
    pub async fn mark_overdue(&self, today: NaiveDate) -> Result<Vec<BillingPeriod>, BillingError> {
        let candidates = self.repo.periods_with_status(PeriodStatus::Active).await?;
        let mut marked = Vec::new();
        for candidate in candidates.into_iter().filter(|p| is_overdue(p, today)) {
            let id = candidate.id;
            match self
                .retry
                .run("mark_overdue", move || self.try_mark_overdue(id, today))
                .await
            {
                Ok(Some(period)) => {
                    info!(period_id = %id, balance = %period.balance, "billing period overdue");
                    self.events.publish(DomainEvent::PeriodOverdue {
                        organization_id: period.organization_id,
                        period_id: id,
                        balance: period.balance,
                    });
                    marked.push(period);
                }
                Ok(None) => debug!(period_id = %id, "period changed before overdue sweep"),
                Err(e) => warn!(period_id = %id, error = %e, "overdue sweep failed for period"),
            }
        }
        Ok(marked)
    }

    async fn try_mark_overdue(
        &self,
        period_id: BillingPeriodId,
        today: NaiveDate,
    ) -> Result<Option<BillingPeriod>, BillingError> {
        let Some(mut period) = self.repo.period(period_id).await? else {
            return Ok(None);
        };
        if !is_overdue(&period, today) {
            return Ok(None);
        }
        period.status = PeriodStatus::Overdue;
        self.repo
            .commit(WriteBatch::new().with(period.clone()))
            .await?;
        period.version += 1;
        Ok(Some(period))
    }

    // ========== Postings ==========

    /// Posts an optional charge.
    pub async fn post_charge(
        &self,
        ctx: &ActorContext,
        input: PostCharge,
    ) -> Result<Posted<Charge>, BillingError> {
        let posted = self
            .retry
            .run("post_charge", move || self.try_post_charge(ctx, input.clone()))
            .await?;
        info!(
            period_id = %posted.period.id,
            amount = %posted.record.amount,
            charge_type = %posted.record.charge_type,
            balance = %posted.period.balance,
            "charge posted"
        );
        Ok(posted)
    }

    async fn try_post_charge(
        &self,
        ctx: &ActorContext,
        input: PostCharge,
    ) -> Result<Posted<Charge>, BillingError> {
        let period = self.load_period(ctx, input.period_id).await?;
        posting::ensure_accepts_charges(&period, self.policy.overdue_accepts_charges)?;
        self.active_contract(ctx, period.contract_id).await?;
        let charge = posting::charge_line(&input, ctx.user_id, Utc::now())?;

        let mut postings = self.postings(period.id).await?;
        postings.charges.push(charge.clone());
        let period = self
            .commit_totals(period, &postings, WriteBatch::new().with(charge.clone()))
            .await?;
        Ok(Posted {
            record: charge,
            period,
        })
    }

    /// Posts money spent on the patient's behalf. Allowed until settlement.
    pub async fn post_expense(
        &self,
        ctx: &ActorContext,
        input: PostExpense,
    ) -> Result<Posted<PatientExpense>, BillingError> {
        let posted = self
            .retry
            .run("post_expense", move || self.try_post_expense(ctx, input.clone()))
            .await?;
        info!(
            period_id = %posted.period.id,
            amount = %posted.record.amount,
            balance = %posted.period.balance,
            "patient expense posted"
        );
        Ok(posted)
    }

    async fn try_post_expense(
        &self,
        ctx: &ActorContext,
        input: PostExpense,
    ) -> Result<Posted<PatientExpense>, BillingError> {
        let period = self.load_period(ctx, input.period_id).await?;
        posting::ensure_accepts(&period, "expenses")?;
        self.active_contract(ctx, period.contract_id).await?;
        let expense = posting::expense_line(&input, ctx.user_id, Utc::now())?;

        let mut postings = self.postings(period.id).await?;
        postings.expenses.push(expense.clone());
        let period = self
            .commit_totals(period, &postings, WriteBatch::new().with(expense.clone()))
            .await?;
        Ok(Posted {
            record: expense,
            period,
        })
    }

    /// Records a payment against a period, or the contract's open period.
    ///
    /// Cash must not exceed the outstanding balance and counts immediately.
    /// Bank transfers wait for verification and leave the balance alone.
    pub async fn record_payment(
        &self,
        ctx: &ActorContext,
        input: RecordPayment,
    ) -> Result<Posted<Payment>, BillingError> {
        let posted = self
            .retry
            .run("record_payment", move || self.try_record_payment(ctx, input.clone()))
            .await?;
        info!(
            payment_id = %posted.record.id,
            period_id = %posted.period.id,
            amount = %posted.record.amount,
            status = %posted.record.status,
            balance = %posted.period.balance,
            "payment recorded"
        );
        if posted.record.status == PaymentStatus::Verified {
            self.publish_verified(&posted.record);
        }
        Ok(posted)
    }

    async fn try_record_payment(
        &self,
        ctx: &ActorContext,
        input: RecordPayment,
    ) -> Result<Posted<Payment>, BillingError> {
        let contract = self.active_contract(ctx, input.contract_id).await?;
        let period = match input.period_id {
            Some(id) => {
                let period = self.load_period(ctx, id).await?;
                if period.contract_id != contract.id {
                    return Err(BillingError::InvalidInput(format!(
                        "period {} does not belong to contract {}",
                        period.code, contract.code
                    )));
                }
                period
            }
            None => self
                .repo
                .periods_for_contract(contract.id)
                .await?
                .into_iter()
                .find(|p| p.status.is_open())
                .ok_or(BillingError::NoOpenPeriod(contract.id))?,
        };
        posting::ensure_accepts(&period, "payments")?;

        let now = Utc::now();
        let payment = posting::payment(
            PaymentDraft {
                organization_id: contract.organization_id,
                contract_id: contract.id,
                period_id: period.id,
                amount: input.amount,
                method: input.method,
                bank_reference: input.bank_reference,
                payer_name: input.payer_name,
                date: input.date,
            },
            ctx.user_id,
            now,
        )?;

        let mut postings = self.postings(period.id).await?;
        if payment.method == PaymentMethod::Cash {
            let outstanding = postings.totals(period.base_monthly_rate)?.outstanding();
            if payment.amount > outstanding {
                return Err(BillingError::ExceedsOutstanding {
                    amount: payment.amount,
                    outstanding,
                });
            }
        }
        postings.payments.push(payment.clone());
        let period = self
            .commit_totals(period, &postings, WriteBatch::new().with(payment.clone()))
            .await?;
        Ok(Posted {
            record: payment,
            period,
        })
    }

    /// Verifies a pending bank transfer; its amount then counts toward the
    /// balance. Requires the verifier role.
    pub async fn verify_payment(
        &self,
        ctx: &ActorContext,
        payment_id: PaymentId,
    ) -> Result<Posted<Payment>, BillingError> {
        self.ensure_verifier(ctx)?;
        self.verify_authorized(ctx, payment_id).await
    }

    /// Verification already authorized elsewhere (an approved workflow).
    pub(crate) async fn verify_authorized(
        &self,
        ctx: &ActorContext,
        payment_id: PaymentId,
    ) -> Result<Posted<Payment>, BillingError> {
        let posted = self
            .retry
            .run("verify_payment", move || self.try_verify_payment(ctx, payment_id))
            .await?;
        info!(
            payment_id = %payment_id,
            verifier = %ctx.user_id,
            balance = %posted.period.balance,
            "payment verified"
        );
        self.publish_verified(&posted.record);
        Ok(posted)
    }

    async fn try_verify_payment(
        &self,
        ctx: &ActorContext,
        payment_id: PaymentId,
    ) -> Result<Posted<Payment>, BillingError> {
        let payment = self.load_payment(ctx, payment_id).await?;
        let mut verified = posting::verify(&payment, ctx.user_id, Utc::now())?;
        let period = self.load_period(ctx, payment.period_id).await?;
        posting::ensure_accepts(&period, "payment verification")?;

        let mut postings = self.postings(period.id).await?;
        postings.upsert_payment(verified.clone());
        let period = self
            .commit_totals(period, &postings, WriteBatch::new().with(verified.clone()))
            .await?;
        verified.version += 1;
        Ok(Posted {
            record: verified,
            period,
        })
    }

    /// Rejects a pending bank transfer. The balance never changes.
    pub async fn reject_payment(
        &self,
        ctx: &ActorContext,
        payment_id: PaymentId,
        reason: &str,
    ) -> Result<Payment, BillingError> {
        self.ensure_verifier(ctx)?;
        self.reject_authorized(ctx, payment_id, reason).await
    }

    /// Rejection already authorized elsewhere (a rejected workflow).
    pub(crate) async fn reject_authorized(
        &self,
        ctx: &ActorContext,
        payment_id: PaymentId,
        reason: &str,
    ) -> Result<Payment, BillingError> {
        let payment = self
            .retry
            .run("reject_payment", move || {
                self.try_reject_payment(ctx, payment_id, reason)
            })
            .await?;
        info!(payment_id = %payment_id, verifier = %ctx.user_id, "payment rejected");
        self.events.publish(DomainEvent::PaymentRejected {
            organization_id: payment.organization_id,
            payment_id,
        });
        Ok(payment)
    }

    async fn try_reject_payment(
        &self,
        ctx: &ActorContext,
        payment_id: PaymentId,
        reason: &str,
    ) -> Result<Payment, BillingError> {
        let payment = self.load_payment(ctx, payment_id).await?;
        let mut rejected = posting::reject(&payment, ctx.user_id, reason, Utc::now())?;
        self.repo
            .commit(WriteBatch::new().with(rejected.clone()))
            .await?;
        rejected.version += 1;
        Ok(rejected)
    }

    // ========== Queries ==========

    /// Loads a contract visible to the actor.
    pub async fn contract(
        &self,
        ctx: &ActorContext,
        contract_id: ContractId,
    ) -> Result<Contract, BillingError> {
        self.load_contract(ctx, contract_id).await
    }

    /// Loads a period visible to the actor.
    pub async fn period(
        &self,
        ctx: &ActorContext,
        period_id: BillingPeriodId,
    ) -> Result<BillingPeriod, BillingError> {
        self.load_period(ctx, period_id).await
    }

    /// Periods of a contract, oldest first.
    pub async fn periods_for_contract(
        &self,
        ctx: &ActorContext,
        contract_id: ContractId,
    ) -> Result<Vec<BillingPeriod>, BillingError> {
        let contract = self.load_contract(ctx, contract_id).await?;
        Ok(self.repo.periods_for_contract(contract.id).await?)
    }

    /// Charges, expenses and payments of a period.
    pub async fn postings_for(
        &self,
        ctx: &ActorContext,
        period_id: BillingPeriodId,
    ) -> Result<Postings, BillingError> {
        let period = self.load_period(ctx, period_id).await?;
        self.postings(period.id).await
    }

    /// Every payment of a contract in date order, any status.
    pub async fn payment_history(
        &self,
        ctx: &ActorContext,
        contract_id: ContractId,
    ) -> Result<Vec<Payment>, BillingError> {
        let contract = self.load_contract(ctx, contract_id).await?;
        let mut payments = self.repo.payments_for_contract(contract.id).await?;
        payments.sort_by_key(|p| (p.date, p.created_at));
        Ok(payments)
    }

    /// Money the patient owes across all periods of a contract.
    pub async fn outstanding_for_contract(
        &self,
        ctx: &ActorContext,
        contract_id: ContractId,
    ) -> Result<Money, BillingError> {
        let contract = self.load_contract(ctx, contract_id).await?;
        Ok(self
            .repo
            .periods_for_contract(contract.id)
            .await?
            .iter()
            .filter(|p| p.status != PeriodStatus::Settled || p.has_uncarried_debt())
            .map(BillingPeriod::outstanding)
            .sum())
    }

    /// Rebuilds a period's totals from its postings and compares them with
    /// the stored figures.
    pub async fn reconcile_period(
        &self,
        ctx: &ActorContext,
        period_id: BillingPeriodId,
    ) -> Result<ReconciliationReport, BillingError> {
        let period = self.load_period(ctx, period_id).await?;
        let postings = self.postings(period.id).await?;
        let report = ReconciliationReport {
            period_id,
            stored: PeriodTotals::stored(&period),
            recomputed: postings.totals(period.base_monthly_rate)?,
        };
        if report.has_drift() {
            warn!(
                period_id = %period_id,
                stored = %report.stored.balance,
                recomputed = %report.recomputed.balance,
                "billing period totals drifted from postings"
            );
        }
        Ok(report)
    }

    // ========== Helpers ==========

    async fn commit_totals(
        &self,
        mut period: BillingPeriod,
        postings: &Postings,
        batch: WriteBatch,
    ) -> Result<BillingPeriod, BillingError> {
        postings
            .totals(period.base_monthly_rate)?
            .apply_to(&mut period);
        self.repo.commit(batch.with(period.clone())).await?;
        period.version += 1;
        Ok(period)
    }

    async fn postings(&self, period_id: BillingPeriodId) -> Result<Postings, BillingError> {
        Ok(Postings {
            charges: self.repo.charges_for_period(period_id).await?,
            expenses: self.repo.expenses_for_period(period_id).await?,
            payments: self.repo.payments_for_period(period_id).await?,
        })
    }

    async fn deferred_transaction(
        &self,
        period: &BillingPeriod,
    ) -> Result<Option<Transaction>, BillingError> {
        let Some(id) = period.deferred_transaction_id else {
            return Ok(None);
        };
        self.repo
            .transaction(id)
            .await?
            .map(Some)
            .ok_or(BillingError::Ledger(LedgerError::TransactionNotFound(id)))
    }

    async fn load_contract(
        &self,
        ctx: &ActorContext,
        contract_id: ContractId,
    ) -> Result<Contract, BillingError> {
        self.repo
            .contract(contract_id)
            .await?
            .filter(|c| c.organization_id == ctx.organization_id)
            .ok_or(BillingError::ContractNotFound(contract_id))
    }

    async fn active_contract(
        &self,
        ctx: &ActorContext,
        contract_id: ContractId,
    ) -> Result<Contract, BillingError> {
        let contract = self.load_contract(ctx, contract_id).await?;
        if contract.status != ContractStatus::Active {
            return Err(BillingError::ContractNotActive {
                contract_id,
                status: contract.status,
            });
        }
        Ok(contract)
    }

    async fn load_period(
        &self,
        ctx: &ActorContext,
        period_id: BillingPeriodId,
    ) -> Result<BillingPeriod, BillingError> {
        self.repo
            .period(period_id)
            .await?
            .filter(|p| p.organization_id == ctx.organization_id)
            .ok_or(BillingError::PeriodNotFound(period_id))
    }

    async fn load_payment(
        &self,
        ctx: &ActorContext,
        payment_id: PaymentId,
    ) -> Result<Payment, BillingError> {
        self.repo
            .payment(payment_id)
            .await?
            .filter(|p| p.organization_id == ctx.organization_id)
            .ok_or(BillingError::PaymentNotFound(payment_id))
    }

    fn ensure_verifier(&self, ctx: &ActorContext) -> Result<(), BillingError> {
        if ctx.has_role(&self.policy.verifier_role) {
            Ok(())
        } else {
            Err(BillingError::NotVerifier(self.policy.verifier_role.clone()))
        }
    }

    fn publish_verified(&self, payment: &Payment) {
        self.events.publish(DomainEvent::PaymentVerified {
            organization_id: payment.organization_id,
            payment_id: payment.id,
            period_id: payment.period_id,
            amount: payment.amount,
        });
    }

    async fn after_settlement(&self, closing: &Closing) {
        let period = &closing.period;
        self.events.publish(DomainEvent::PeriodSettled {
            organization_id: period.organization_id,
            contract_id: period.contract_id,
            period_id: period.id,
            revenue: closing.revenue,
        });
        if let Some(documents) = &self.documents {
            match documents.render_period(period).await {
                Ok(doc) => debug!(period_id = %period.id, location = %doc.location, "invoice rendered"),
                Err(e) => warn!(period_id = %period.id, error = %e, "invoice rendering failed"),
            }
        }
    }
}

fn is_overdue(period: &BillingPeriod, today: NaiveDate) -> bool {
    period.status == PeriodStatus::Active
        && period.due_date < today
        && period.balance.is_negative()
}

/// Settles `period` from its postings.
///
/// A pending deferred transaction is realized at the current balance, or
/// cancelled when nothing is left to recognize. Without one, a positive
/// balance gets a new realized revenue transaction.
fn settle(
    mut period: BillingPeriod,
    postings: &Postings,
    deferred: Option<Transaction>,
    settled_by: UserId,
    now: DateTime<Utc>,
) -> Result<Closing, BillingError> {
    let totals = postings.totals(period.base_monthly_rate)?;
    totals.apply_to(&mut period);
    let revenue = totals.balance.clamp_non_negative();

    let updates_transaction = deferred.is_some();
    let transaction = match deferred {
        Some(mut trx) => {
            if revenue.is_positive() {
                trx.restate(revenue)?;
                trx.realize(now)?;
            } else {
                trx.cancel(now)?;
            }
            Some(trx)
        }
        None if revenue.is_positive() => Some(revenue_transaction(
            &period,
            revenue,
            true,
            settled_by,
            now,
        )?),
        None => None,
    };

    period.status = PeriodStatus::Settled;
    period.settled_at = Some(now);
    period.settled_by = Some(settled_by);
    Ok(Closing {
        period,
        transaction,
        revenue,
        updates_transaction,
    })
}

fn revenue_transaction(
    period: &BillingPeriod,
    amount: Money,
    realized: bool,
    created_by: UserId,
    now: DateTime<Utc>,
) -> Result<Transaction, BillingError> {
    Ok(Transaction::new(
        NewTransaction {
            organization_id: period.organization_id,
            kind: TransactionType::Revenue,
            category: REVENUE_CATEGORY.to_string(),
            amount,
            account: AccountType::Cash,
            bank_account_id: None,
            source: SourceRef::new(ReferenceType::BillingPeriod, period.id),
            date: now.date_naive(),
            description: format!("Patient service revenue {}", period.code),
            realized,
            created_by,
        },
        now,
    )?)
}
