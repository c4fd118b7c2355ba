//! Period totals recomputed from postings.
//!
//! Totals are never adjusted incrementally. Every mutation rebuilds them from
//! the complete set of charges, expenses and payments of the period, so the
//! stored balance is always `total_paid - (total_charged + total_expenses)`.

use serde::{Deserialize, Serialize};

use carehome_shared::types::Money;

use super::error::BillingError;
use super::types::{BillingPeriod, Charge, PatientExpense, Payment, PaymentStatus};

/// Derived totals of one billing period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PeriodTotals {
    /// Sum of mandatory charges.
    pub nursing_charge: Money,
    /// Sum of optional charges.
    pub additional_charges: Money,
    /// `base + nursing + additional`.
    pub total_charged: Money,
    /// Sum of patient expenses.
    pub total_expenses: Money,
    /// Sum of verified payments.
    pub total_paid: Money,
    /// `total_paid - (total_charged + total_expenses)`.
    pub balance: Money,
}

impl PeriodTotals {
    /// Computes totals from the period's base rate and postings.
    ///
    /// Fails with [`BillingError::AmountOverflow`] when a total leaves the
    /// storable range.
    pub fn compute(
        base_monthly_rate: Money,
        charges: &[Charge],
        expenses: &[PatientExpense],
        payments: &[Payment],
    ) -> Result<Self, BillingError> {
        let nursing_charge = checked_sum(
            charges.iter().filter(|c| c.is_mandatory).map(|c| c.amount),
            "nursing charges",
        )?;
        let additional_charges = checked_sum(
            charges.iter().filter(|c| !c.is_mandatory).map(|c| c.amount),
            "additional charges",
        )?;
        let total_charged = checked_sum(
            [base_monthly_rate, nursing_charge, additional_charges],
            "total charged",
        )?;
        let total_expenses = checked_sum(expenses.iter().map(|e| e.amount), "total expenses")?;
        let total_paid = checked_sum(
            payments
                .iter()
                .filter(|p| p.status == PaymentStatus::Verified)
                .map(|p| p.amount),
            "total paid",
        )?;
        let total_due = checked_sum([total_charged, total_expenses], "period balance")?;
        let balance = total_paid
            .checked_sub(total_due)
            .filter(|b| b.in_range())
            .ok_or(BillingError::AmountOverflow("period balance"))?;

        Ok(Self {
            nursing_charge,
            additional_charges,
            total_charged,
            total_expenses,
            total_paid,
            balance,
        })
    }

    /// Totals currently stored on a period.
    #[must_use]
    pub fn stored(period: &BillingPeriod) -> Self {
        Self {
            nursing_charge: period.nursing_charge,
            additional_charges: period.additional_charges,
            total_charged: period.total_charged,
            total_expenses: period.total_expenses,
            total_paid: period.total_paid,
            balance: period.balance,
        }
    }

    /// Writes the totals onto a period.
    pub fn apply_to(&self, period: &mut BillingPeriod) {
        period.nursing_charge = self.nursing_charge;
        period.additional_charges = self.additional_charges;
        period.total_charged = self.total_charged;
        period.total_expenses = self.total_expenses;
        period.total_paid = self.total_paid;
        period.balance = self.balance;
    }

    /// Money the patient still owes.
    #[must_use]
    pub fn outstanding(&self) -> Money {
        (-self.balance).clamp_non_negative()
    }

    /// Returns true if the stored figures are internally consistent.
    #[must_use]
    pub fn is_consistent(&self, base_monthly_rate: Money) -> bool {
        self.total_charged == base_monthly_rate + self.nursing_charge + self.additional_charges
            && self.balance == self.total_paid - (self.total_charged + self.total_expenses)
    }
}

/// Every posting of one period, as read from the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Postings {
    /// Charge lines.
    pub charges: Vec<Charge>,
    /// Patient expenses.
    pub expenses: Vec<PatientExpense>,
    /// Payments in any status.
    pub payments: Vec<Payment>,
}

impl Postings {
    /// Totals over these postings.
    pub fn totals(&self, base_monthly_rate: Money) -> Result<PeriodTotals, BillingError> {
        PeriodTotals::compute(
            base_monthly_rate,
            &self.charges,
            &self.expenses,
            &self.payments,
        )
    }

    /// Replaces a payment by id, or appends it if it is new.
    pub fn upsert_payment(&mut self, payment: Payment) {
        match self.payments.iter_mut().find(|p| p.id == payment.id) {
            Some(slot) => *slot = payment,
            None => self.payments.push(payment),
        }
    }
}

fn checked_sum(
    amounts: impl IntoIterator<Item = Money>,
    what: &'static str,
) -> Result<Money, BillingError> {
    amounts
        .into_iter()
        .try_fold(Money::ZERO, Money::checked_add)
        .filter(|total| total.in_range())
        .ok_or(BillingError::AmountOverflow(what))
}
