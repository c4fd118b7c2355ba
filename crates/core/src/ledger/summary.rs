//! Monthly financial summary and ledger queries.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use carehome_shared::types::{Money, OrganizationId};

use super::error::LedgerError;
use super::transaction::{SourceRef, Transaction, TransactionType};
use crate::identity::ActorContext;
use crate::store::LedgerRepository;

/// Aggregated ledger figures for one calendar month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialSummary {
    /// Organization.
    pub organization_id: OrganizationId,
    /// Calendar year.
    pub year: i32,
    /// Calendar month (1-12).
    pub month: u32,
    /// Realized revenue.
    pub revenue: Money,
    /// Realized expenses.
    pub expenses: Money,
    /// Capital paid in.
    pub capital: Money,
    /// Revenue accrued but not yet realized.
    pub unrealized_revenue: Money,
    /// `revenue - expenses`.
    pub net_income: Money,
}

impl FinancialSummary {
    /// Aggregates `transactions` (already filtered to the month).
    #[must_use]
    pub fn from_transactions(
        organization_id: OrganizationId,
        year: i32,
        month: u32,
        transactions: &[Transaction],
    ) -> Self {
        let realized = |kind: TransactionType| -> Money {
            transactions
                .iter()
                .filter(|t| t.kind == kind && t.is_realized)
                .map(|t| t.amount)
                .sum()
        };

        let revenue = realized(TransactionType::Revenue);
        let expenses = realized(TransactionType::Expense);
        let capital = realized(TransactionType::CapitalInjection);
        let unrealized_revenue = transactions
            .iter()
            .filter(|t| t.kind == TransactionType::Revenue && t.is_pending_realization())
            .map(|t| t.amount)
            .sum();

        Self {
            organization_id,
            year,
            month,
            revenue,
            expenses,
            capital,
            unrealized_revenue,
            net_income: revenue - expenses,
        }
    }
}

/// Returns the first and last day of a calendar month.
pub fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((first, next.pred_opt()?))
}

/// Read-side ledger service.
pub struct LedgerService<R: LedgerRepository> {
    repo: Arc<R>,
}

impl<R: LedgerRepository> LedgerService<R> {
    /// Creates a new ledger service.
    #[must_use]
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// Transactions generated by `source` within the actor's organization.
    pub async fn transactions_for(
        &self,
        ctx: &ActorContext,
        source: SourceRef,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let mut found = self.repo.transactions_for_source(source).await?;
        found.retain(|t| t.organization_id == ctx.organization_id);
        Ok(found)
    }

    /// Monthly summary for the actor's organization.
    pub async fn monthly_summary(
        &self,
        ctx: &ActorContext,
        year: i32,
        month: u32,
    ) -> Result<FinancialSummary, LedgerError> {
        let (from, to) =
            month_bounds(year, month).ok_or(LedgerError::InvalidMonth { year, month })?;
        let transactions = self
            .repo
            .transactions_between(ctx.organization_id, from, to)
            .await?;
        Ok(FinancialSummary::from_transactions(
            ctx.organization_id,
            year,
            month,
            &transactions,
        ))
    }
}
