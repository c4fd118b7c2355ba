//! Property tests for period totals under random posting order.

use chrono::{NaiveDate, Utc};
use proptest::prelude::*;

use carehome_shared::types::{BillingPeriodId, ContractId, Money, OrganizationId, UserId};

use super::balance::{PeriodTotals, Postings};
use super::error::BillingError;
use super::posting::{self, PaymentDraft};
use super::types::{
    BillingPeriod, ChargeType, PaymentMethod, PaymentStatus, PeriodStatus, PostCharge,
    PostExpense,
};

#[derive(Debug, Clone)]
enum Op {
    Charge(i64),
    Nursing(i64),
    Expense(i64),
    Cash(i64),
    Transfer(i64),
    Verify(usize),
    Reject(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1i64..5_000_000).prop_map(Op::Charge),
        (1i64..500_000).prop_map(Op::Nursing),
        (1i64..2_000_000).prop_map(Op::Expense),
        (1i64..5_000_000).prop_map(Op::Cash),
        (1i64..5_000_000).prop_map(Op::Transfer),
        any::<usize>().prop_map(Op::Verify),
        any::<usize>().prop_map(Op::Reject),
    ]
}

fn period(base: i64) -> BillingPeriod {
    let start = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
    BillingPeriod {
        id: BillingPeriodId::new(),
        organization_id: OrganizationId::new(),
        contract_id: ContractId::new(),
        code: "PER-202506-000000".into(),
        year: 2025,
        month: 6,
        start_date: start,
        end_date: NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(),
        due_date: NaiveDate::from_ymd_opt(2025, 6, 10).unwrap(),
        base_monthly_rate: Money::new(base),
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
        created_at: Utc::now(),
        version: 0,
    }
}

fn draft(period: &BillingPeriod, amount: i64, method: PaymentMethod) -> PaymentDraft {
    PaymentDraft {
        organization_id: period.organization_id,
        contract_id: period.contract_id,
        period_id: period.id,
        amount: Money::new(amount),
        method,
        bank_reference: Some("TRF".into()),
        payer_name: "Family".into(),
        date: period.start_date,
    }
}

/// Applies one operation; returns the expected balance delta.
fn apply(period: &BillingPeriod, postings: &mut Postings, op: &Op) -> i64 {
    let user = UserId::new();
    let now = Utc::now();
    match *op {
        Op::Charge(amount) => {
            let input = PostCharge {
                period_id: period.id,
                charge_type: ChargeType::Equipment,
                description: "Rental".into(),
                quantity: 1,
                unit_price: Money::new(amount),
                date: period.start_date,
            };
            postings
                .charges
                .push(posting::charge_line(&input, user, now).unwrap());
            -amount
        }
        Op::Nursing(amount) => {
            postings.charges.push(
                posting::nursing_line(period, Money::new(amount), user, now).unwrap(),
            );
            -amount
        }
        Op::Expense(amount) => {
            let input = PostExpense {
                period_id: period.id,
                category: "Medicine".into(),
                description: "Pharmacy".into(),
                amount: Money::new(amount),
                payment_method: PaymentMethod::Cash,
                date: period.start_date,
                receipt: None,
            };
            postings
                .expenses
                .push(posting::expense_line(&input, user, now).unwrap());
            -amount
        }
        Op::Cash(amount) => {
            postings.payments.push(
                posting::payment(draft(period, amount, PaymentMethod::Cash), user, now).unwrap(),
            );
            amount
        }
        Op::Transfer(amount) => {
            postings.payments.push(
                posting::payment(draft(period, amount, PaymentMethod::BankTransfer), user, now)
                    .unwrap(),
            );
            0
        }
        Op::Verify(pick) | Op::Reject(pick) => {
            let pending: Vec<_> = postings
                .payments
                .iter()
                .filter(|p| p.status == PaymentStatus::Pending)
                .cloned()
                .collect();
            if pending.is_empty() {
                return 0;
            }
            let target = &pending[pick % pending.len()];
            if matches!(op, Op::Verify(_)) {
                postings.upsert_payment(posting::verify(target, user, now).unwrap());
                target.amount.units()
            } else {
                postings.upsert_payment(posting::reject(target, user, "bounced", now).unwrap());
                0
            }
        }
    }
}

proptest! {
    #[test]
    fn prop_balance_identity_holds_after_every_posting(
        base in 0i64..10_000_000,
        ops in prop::collection::vec(op(), 0..40),
    ) {
        let p = period(base);
        let mut postings = Postings::default();
        let mut previous = postings.totals(p.base_monthly_rate).unwrap();
        prop_assert_eq!(previous.balance, Money::new(-base));

        for op in &ops {
            let delta = apply(&p, &mut postings, op);
            let totals = postings.totals(p.base_monthly_rate).unwrap();
            prop_assert!(totals.is_consistent(p.base_monthly_rate));
            prop_assert_eq!(
                totals.balance,
                totals.total_paid - (totals.total_charged + totals.total_expenses)
            );
            prop_assert_eq!(totals.balance - previous.balance, Money::new(delta));
            previous = totals;
        }
    }

    #[test]
    fn prop_totals_do_not_depend_on_posting_order(
        base in 0i64..10_000_000,
        ops in prop::collection::vec(op(), 0..30),
        seed in any::<u64>(),
    ) {
        let p = period(base);
        let mut postings = Postings::default();
        for op in &ops {
            apply(&p, &mut postings, op);
        }
        let expected = postings.totals(p.base_monthly_rate).unwrap();

        let mut shuffled = postings.clone();
        let len = shuffled.payments.len();
        if len > 1 {
            let shift = usize::try_from(seed % len as u64).unwrap();
            shuffled.payments.rotate_left(shift);
            shuffled.charges.reverse();
            shuffled.expenses.reverse();
        }
        prop_assert_eq!(shuffled.totals(p.base_monthly_rate).unwrap(), expected);
    }
}

#[test]
fn test_opening_scenario_balance() {
    let p = period(2_000_000);
    let mut postings = Postings::default();
    apply(&p, &mut postings, &Op::Nursing(200_000));
    apply(&p, &mut postings, &Op::Cash(2_000_000));
    let totals = postings.totals(p.base_monthly_rate).unwrap();
    assert_eq!(totals.total_charged, Money::new(2_200_000));
    assert_eq!(totals.balance, Money::new(-200_000));
    assert_eq!(totals.outstanding(), Money::new(200_000));

    apply(&p, &mut postings, &Op::Cash(200_000));
    assert_eq!(postings.totals(p.base_monthly_rate).unwrap().balance, Money::ZERO);
}

#[test]
fn test_stored_round_trip() {
    let mut p = period(1_000);
    let mut postings = Postings::default();
    apply(&p, &mut postings, &Op::Expense(250));
    let totals = postings.totals(p.base_monthly_rate).unwrap();
    totals.apply_to(&mut p);
    assert_eq!(PeriodTotals::stored(&p), totals);
}

#[test]
fn test_totals_beyond_storable_range_are_an_error() {
    let p = period(1_000);
    let mut postings = Postings::default();
    apply(&p, &mut postings, &Op::Cash(Money::MAX.units()));
    assert!(postings.totals(p.base_monthly_rate).is_ok());

    apply(&p, &mut postings, &Op::Cash(1));
    assert_eq!(
        postings.totals(p.base_monthly_rate),
        Err(BillingError::AmountOverflow("total paid"))
    );

    let mut charged = Postings::default();
    apply(&p, &mut charged, &Op::Nursing(1));
    assert_eq!(
        charged.totals(Money::MAX),
        Err(BillingError::AmountOverflow("total charged"))
    );
}
