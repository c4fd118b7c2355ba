//! Property-based tests for the approval state machine.
//!
//! - An approval with N applicable steps reaches APPROVED after exactly N
//!   approvals, in ascending step order.
//! - A rejection at any applicable step terminates the approval and nothing
//!   further can be recorded.

use chrono::Utc;
use proptest::prelude::*;
use uuid::Uuid;

use carehome_shared::types::{Money, OrganizationId, UserId};

use crate::identity::{ActorContext, Role};
use crate::workflow::approval::{ActInput, ApprovalMachine, Outcome};
use crate::workflow::condition::{Attributes, StepCondition};
use crate::workflow::definition::{ApprovalStep, ApprovalWorkflow};
use crate::workflow::error::WorkflowError;
use crate::workflow::types::{ApprovalStatus, ResourceKind, ResourceRef};

const ROLES: [&str; 3] = [Role::BENDAHARA, Role::KETUA, Role::SEKRETARIS];

/// Steps 1..=n with random roles and optional minimum-amount thresholds.
fn arb_steps() -> impl Strategy<Value = Vec<(usize, Option<i64>)>> {
    prop::collection::vec((0usize..3, prop::option::of(1i64..10_000_000)), 1..6)
}

fn build(org: OrganizationId, shape: &[(usize, Option<i64>)]) -> ApprovalWorkflow {
    let steps = shape
        .iter()
        .enumerate()
        .map(|(i, (role, min))| {
            let mut condition = StepCondition::always();
            if let Some(min) = min {
                condition = condition.min_amount(Money::new(*min));
            }
            ApprovalStep::new(u32::try_from(i + 1).unwrap(), ROLES[*role]).when(condition)
        })
        .collect();
    ApprovalWorkflow::new(org, "generated", ResourceKind::OperationalExpense, steps).unwrap()
}

fn everyone(org: OrganizationId) -> ActorContext {
    ActorContext::new(org, UserId::new(), ROLES)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// N applicable steps need exactly N approvals, visited in ascending order.
    #[test]
    fn prop_n_steps_need_n_approvals(
        shape in arb_steps(),
        amount in 0i64..10_000_000,
    ) {
        let org = OrganizationId::new();
        let wf = build(org, &shape);
        let attributes = Attributes::with_amount(Money::new(amount));
        let expected = wf.applicable_count(&attributes);

        let mut approval = ApprovalMachine::open(
            &wf,
            ResourceRef::new(ResourceKind::OperationalExpense, Uuid::new_v4()),
            attributes,
            UserId::new(),
            Utc::now(),
        ).unwrap();

        let actor = everyone(org);
        let mut approvals = 0usize;
        let mut visited = Vec::new();
        while approval.status == ApprovalStatus::Pending {
            visited.push(approval.current_step_order);
            let decision = ApprovalMachine::decide(
                &wf, &approval, &actor, &ActInput::approve(), Utc::now(),
            ).unwrap();
            approvals += 1;
            approval = decision.approval;
        }

        prop_assert_eq!(approval.status, ApprovalStatus::Approved);
        prop_assert_eq!(approvals, expected);
        prop_assert!(visited.windows(2).all(|w| w[0] < w[1]));
    }

    /// Rejecting at the k-th applicable step ends the approval there.
    #[test]
    fn prop_reject_terminates(
        shape in arb_steps(),
        amount in 0i64..10_000_000,
        reject_at in 0usize..6,
    ) {
        let org = OrganizationId::new();
        let wf = build(org, &shape);
        let attributes = Attributes::with_amount(Money::new(amount));
        let applicable = wf.applicable_count(&attributes);
        prop_assume!(applicable > 0);
        let reject_at = reject_at % applicable;

        let mut approval = ApprovalMachine::open(
            &wf,
            ResourceRef::new(ResourceKind::OperationalExpense, Uuid::new_v4()),
            attributes,
            UserId::new(),
            Utc::now(),
        ).unwrap();
        let actor = everyone(org);

        for _ in 0..reject_at {
            approval = ApprovalMachine::decide(
                &wf, &approval, &actor, &ActInput::approve(), Utc::now(),
            ).unwrap().approval;
        }
        let rejected = ApprovalMachine::decide(
            &wf, &approval, &actor, &ActInput::reject("no budget"), Utc::now(),
        ).unwrap();
        prop_assert_eq!(rejected.outcome, Outcome::Rejected);
        prop_assert_eq!(rejected.approval.status, ApprovalStatus::Rejected);

        let again = ApprovalMachine::decide(
            &wf, &rejected.approval, &actor, &ActInput::approve(), Utc::now(),
        );
        let is_terminal_err = matches!(again, Err(WorkflowError::AlreadyTerminal { .. }));
        prop_assert!(is_terminal_err);
    }
}
