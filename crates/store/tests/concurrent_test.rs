//! Concurrent access tests for the billing and approval engines.
//!
//! These tests verify that:
//! - Racing cash payments never push a period past zero outstanding
//! - Racing decisions on one approval record exactly one transition
//! - A timeout sweep racing a human decision records exactly one transition
//! - Racing opens and settlements of one period commit once
//! - Transient store failures are retried, and give up after the budget

// Allow common test patterns that trigger clippy warnings
#![allow(clippy::too_many_lines)]

mod common;

use chrono::{TimeDelta, Utc};
use futures::future::join_all;

use carehome_core::billing::{BillingError, OpenPeriod, PeriodStatus};
use carehome_core::gate::GateError;
use carehome_core::identity::Role;
use carehome_core::ledger::{AccountType, ReferenceType, SourceRef};
use carehome_core::requests::{NewOperationalExpense, RequestStatus};
use carehome_core::store::{BillingRepository, LedgerRepository};
use carehome_core::workflow::{ActInput, ApprovalStatus, Outcome, WorkflowError};
use carehome_shared::config::StepConfig;
use carehome_shared::types::Money;

use common::{Harness, cash, date, step};

// ============================================================================
// Test: Concurrent cash payments respect the outstanding balance
// ============================================================================
#[tokio::test]
async fn test_concurrent_cash_payments_never_overpay() {
    let h = Harness::new();
    let admin = h.admin();
    let contract = h.contract(2_000_000).await;
    let period = h.open_january(&contract, None).await;
    assert_eq!(period.balance, Money::new(-2_200_000));

    let attempts = (0..6).map(|_| h.billing.record_payment(&admin, cash(&contract, 500_000)));
    let results = join_all(attempts).await;

    let accepted = results.iter().filter(|r| r.is_ok()).count();
    let refused = results
        .iter()
        .filter(|r| matches!(r, Err(BillingError::ExceedsOutstanding { .. })))
        .count();
    assert_eq!(accepted, 4, "four payments fit into 2,200,000");
    assert_eq!(refused, 2);

    let stored = h.billing.period(&admin, period.id).await.unwrap();
    assert_eq!(stored.total_paid, Money::new(2_000_000));
    assert_eq!(stored.balance, Money::new(-200_000));

    let report = h.billing.reconcile_period(&admin, period.id).await.unwrap();
    assert!(!report.has_drift());
    assert_eq!(
        h.store.payments_for_period(period.id).await.unwrap().len(),
        4
    );
}

// ============================================================================
// Test: Concurrent opens create one period
// ============================================================================
#[tokio::test]
async fn test_concurrent_opens_create_one_period() {
    let h = Harness::new();
    let admin = h.admin();
    let contract = h.contract(2_000_000).await;

    let (billing, admin, contract_id) = (&h.billing, &admin, contract.id);
    let open = move |month: u32| {
        billing.open_period(
            admin,
            OpenPeriod {
                contract_id,
                year: 2025,
                month,
                nursing_charge: None,
                opening_payment: None,
                carried_debt: Vec::new(),
            },
        )
    };
    let (first, second, third) = tokio::join!(open(1), open(1), open(2));

    let results = [first, second, third];
    let opened: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(opened.len(), 1);
    for result in &results {
        if let Err(e) = result {
            assert!(
                matches!(
                    e,
                    BillingError::PeriodAlreadyOpen { .. } | BillingError::DuplicateMonth { .. }
                ),
                "unexpected error {e:?}"
            );
        }
    }

    let periods = h.store.periods_for_contract(contract.id).await.unwrap();
    assert_eq!(periods.len(), 1);
    assert_eq!(periods[0].id, opened[0].id);
    assert_eq!(
        h.store.charges_for_period(periods[0].id).await.unwrap().len(),
        1,
        "nursing charge seeded once"
    );
}

// ============================================================================
// Test: Concurrent settlements book revenue once
// ============================================================================
#[tokio::test]
async fn test_concurrent_settlements_book_revenue_once() {
    let h = Harness::new();
    let admin = h.admin();
    let contract = h.contract(2_300_000).await;
    let period = h.open_january(&contract, Some(3_000_000)).await;

    let (first, second) = tokio::join!(
        h.billing.settle_period(&admin, period.id),
        h.billing.settle_period(&admin, period.id)
    );
    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes.iter().any(|r| matches!(
        r,
        Err(BillingError::PeriodClosed {
            status: PeriodStatus::Settled,
            ..
        })
    )));

    let revenue = h
        .store
        .transactions_for_source(SourceRef::new(ReferenceType::BillingPeriod, period.id))
        .await
        .unwrap();
    assert_eq!(revenue.len(), 1);
    assert_eq!(revenue[0].amount, Money::new(500_000));
}

// ============================================================================
// Test: Concurrent decisions record one transition
// ============================================================================
#[tokio::test]
async fn test_concurrent_final_approvals_conclude_once() {
    let h = Harness::new();
    h.workflow("OPERATIONAL_EXPENSE", vec![step(1, Role::BENDAHARA, None)])
        .await;
    let clerk = h.actor(&[Role::SEKRETARIS]);
    let treasurers = [h.actor(&[Role::BENDAHARA]), h.actor(&[Role::BENDAHARA])];

    let submitted = h
        .requests
        .submit_operational_expense(
            &clerk,
            NewOperationalExpense {
                category: "Maintenance".into(),
                description: "Roof repair".into(),
                amount: Money::new(3_000_000),
                account: AccountType::Cash,
                bank_account_id: None,
                date: date(2025, 4, 3),
                receipt: None,
                requires_approval: true,
            },
        )
        .await
        .unwrap();
    let approval_id = submitted.approval.unwrap().id;

    let (a, b) = tokio::join!(
        h.gate.act(&treasurers[0], approval_id, ActInput::approve()),
        h.gate.act(&treasurers[1], approval_id, ActInput::approve())
    );
    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(GateError::Workflow(WorkflowError::AlreadyTerminal {
            status: ApprovalStatus::Approved,
            ..
        }))
    )));

    let (_, actions) = h.approvals.history(&clerk, approval_id).await.unwrap();
    assert_eq!(actions.len(), 1);

    let booked = h
        .store
        .transactions_for_source(SourceRef::new(
            ReferenceType::OperationalExpense,
            submitted.record.id,
        ))
        .await
        .unwrap();
    assert_eq!(booked.len(), 1);
    let record = h
        .requests
        .operational_expense(&clerk, submitted.record.id)
        .await
        .unwrap();
    assert_eq!(record.status, RequestStatus::Approved);
}

#[tokio::test]
async fn test_concurrent_approve_and_reject_conclude_once() {
    let h = Harness::new();
    h.workflow("OPERATIONAL_EXPENSE", vec![step(1, Role::BENDAHARA, None)])
        .await;
    let clerk = h.actor(&[Role::SEKRETARIS]);
    let treasurers = [h.actor(&[Role::BENDAHARA]), h.actor(&[Role::BENDAHARA])];

    let submitted = h
        .requests
        .submit_operational_expense(&clerk, expense("Laundry machine", 4_000_000))
        .await
        .unwrap();
    let approval_id = submitted.approval.unwrap().id;

    let (approved, rejected) = tokio::join!(
        h.gate.act(&treasurers[0], approval_id, ActInput::approve()),
        h.gate.act(&treasurers[1], approval_id, ActInput::reject("over budget"))
    );
    let results = [approved, rejected];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(
        loser,
        GateError::Workflow(WorkflowError::AlreadyTerminal { .. })
    ));
    assert_eq!(loser.status_code(), 409);

    let (approval, actions) = h.approvals.history(&clerk, approval_id).await.unwrap();
    assert_eq!(actions.len(), 1);
    assert!(approval.status.is_terminal());

    let record = h
        .requests
        .operational_expense(&clerk, submitted.record.id)
        .await
        .unwrap();
    let booked = h
        .store
        .transactions_for_source(SourceRef::new(
            ReferenceType::OperationalExpense,
            submitted.record.id,
        ))
        .await
        .unwrap();
    if approval.status == ApprovalStatus::Approved {
        assert_eq!(record.status, RequestStatus::Approved);
        assert_eq!(booked.len(), 1);
    } else {
        assert_eq!(approval.status, ApprovalStatus::Rejected);
        assert_eq!(record.status, RequestStatus::Rejected);
        assert!(booked.is_empty());
    }
}

// ============================================================================
// Test: Timeout sweep racing a human decision
// ============================================================================
#[tokio::test]
async fn test_timeout_sweep_races_human_decision() {
    let h = Harness::new();
    h.workflow(
        "OPERATIONAL_EXPENSE",
        vec![StepConfig {
            timeout_hours: Some(24),
            ..step(1, Role::BENDAHARA, None)
        }],
    )
    .await;
    let clerk = h.actor(&[Role::SEKRETARIS]);
    let treasurer = h.actor(&[Role::BENDAHARA]);

    let submitted = h
        .requests
        .submit_operational_expense(&clerk, expense("Water heater", 1_500_000))
        .await
        .unwrap();
    let approval_id = submitted.approval.unwrap().id;

    let later = Utc::now() + TimeDelta::hours(25);
    let (decided, swept) = tokio::join!(
        h.gate.act(&treasurer, approval_id, ActInput::approve()),
        h.gate.sweep_timeouts(later)
    );
    let swept = swept.unwrap();
    match &decided {
        Ok(decision) => {
            assert!(swept.is_empty());
            assert_eq!(decision.approval.status, ApprovalStatus::Approved);
        }
        Err(e) => {
            assert_eq!(swept.len(), 1);
            assert_eq!(swept[0].outcome, Outcome::TimedOut);
            assert!(matches!(
                e,
                GateError::Workflow(WorkflowError::AlreadyTerminal {
                    status: ApprovalStatus::Rejected,
                    ..
                })
            ));
            assert_eq!(e.status_code(), 409);
        }
    }

    let (approval, actions) = h.approvals.history(&clerk, approval_id).await.unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].actor.is_system(), decided.is_err());
    let record = h
        .requests
        .operational_expense(&clerk, submitted.record.id)
        .await
        .unwrap();
    let expected = if approval.status == ApprovalStatus::Approved {
        RequestStatus::Approved
    } else {
        RequestStatus::Rejected
    };
    assert_eq!(record.status, expected);
}

#[tokio::test]
async fn test_losing_decision_does_not_act_on_the_next_step() {
    let h = Harness::new();
    h.expense_workflow().await;
    let clerk = h.actor(&[Role::SEKRETARIS]);
    let both_roles = [
        h.actor(&[Role::BENDAHARA, Role::KETUA]),
        h.actor(&[Role::BENDAHARA, Role::KETUA]),
    ];

    let submitted = h
        .requests
        .submit_operational_expense(
            &clerk,
            NewOperationalExpense {
                category: "Equipment".into(),
                description: "Hospital beds".into(),
                amount: Money::new(12_000_000),
                account: AccountType::Cash,
                bank_account_id: None,
                date: date(2025, 4, 5),
                receipt: None,
                requires_approval: true,
            },
        )
        .await
        .unwrap();
    let approval_id = submitted.approval.unwrap().id;

    let (a, b) = tokio::join!(
        h.gate.act(&both_roles[0], approval_id, ActInput::approve()),
        h.gate.act(&both_roles[1], approval_id, ActInput::approve())
    );
    let results = [a, b];
    let advanced: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(advanced.len(), 1);
    assert_eq!(advanced[0].outcome, Outcome::Advanced { to_step: 2 });
    assert!(results.iter().any(|r| matches!(
        r,
        Err(GateError::Workflow(WorkflowError::StepAlreadyAdvanced {
            expected: 1,
            current: 2,
            ..
        }))
    )));

    let approval = h.approvals.approval(&clerk, approval_id).await.unwrap();
    assert_eq!(approval.status, ApprovalStatus::Pending);
    assert_eq!(approval.current_step_order, 2);
}

// ============================================================================
// Test: Transient store failures
// ============================================================================
#[tokio::test]
async fn test_transient_failures_are_retried() {
    let h = Harness::new();
    let admin = h.admin();
    let contract = h.contract(2_000_000).await;
    h.open_january(&contract, None).await;

    h.store.fail_next_commits(3);
    let posted = h
        .billing
        .record_payment(&admin, cash(&contract, 700_000))
        .await
        .unwrap();
    assert_eq!(posted.period.balance, Money::new(-1_500_000));
    assert_eq!(
        h.store
            .payments_for_period(posted.period.id)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_persistent_failures_exhaust_retries() {
    let h = Harness::new();
    let admin = h.admin();
    let contract = h.contract(2_000_000).await;
    let period = h.open_january(&contract, None).await;

    h.store.fail_next_commits(100);
    let result = h
        .billing
        .record_payment(&admin, cash(&contract, 700_000))
        .await;
    let err = result.unwrap_err();
    assert!(matches!(
        err,
        BillingError::RetriesExhausted {
            operation: "record_payment",
            ..
        }
    ));
    assert_eq!(err.status_code(), 503);

    h.store.fail_next_commits(0);
    let stored = h.billing.period(&admin, period.id).await.unwrap();
    assert_eq!(stored.balance, Money::new(-2_200_000));
    assert!(h.store.payments_for_period(period.id).await.unwrap().is_empty());
}

fn expense(description: &str, amount: i64) -> NewOperationalExpense {
    NewOperationalExpense {
        category: "Maintenance".into(),
        description: description.into(),
        amount: Money::new(amount),
        account: AccountType::Cash,
        bank_account_id: None,
        date: date(2025, 4, 3),
        receipt: None,
        requires_approval: true,
    }
}
