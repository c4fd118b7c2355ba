//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;

use carehome_core::billing::{
    BillingPeriod, BillingService, Contract, NewContract, OpenPeriod, OpeningPayment,
    PaymentMethod, RecordPayment,
};
use carehome_core::gate::{ApprovalGate, HandlerRegistry};
use carehome_core::identity::{ActorContext, Role};
use carehome_core::notify::RecordingSink;
use carehome_core::requests::{
    OperationalExpenseHandler, PaymentVerificationHandler, ProcurementHandler, RequestService,
};
use carehome_core::store::RetryPolicy;
use carehome_core::workflow::{ApprovalService, ApprovalWorkflow};
use carehome_shared::config::{ApprovalConfig, BillingConfig, StepConfig, WorkflowConfig};
use carehome_shared::types::{Money, OrganizationId, PatientId, RoomId, UserId};
use carehome_store::MemoryStore;

/// Mandatory nursing charge used by every fixture.
pub const NURSING: i64 = 200_000;

/// Wired engine over a fresh store.
pub struct Harness {
    pub org: OrganizationId,
    pub store: Arc<MemoryStore>,
    pub events: Arc<RecordingSink>,
    pub billing: Arc<BillingService<MemoryStore>>,
    pub approvals: Arc<ApprovalService<MemoryStore>>,
    pub gate: Arc<ApprovalGate<MemoryStore>>,
    pub requests: RequestService<MemoryStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_billing(BillingConfig {
            nursing_charge: NURSING,
            ..BillingConfig::default()
        })
    }

    pub fn with_billing(config: BillingConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let events = Arc::new(RecordingSink::new());
        let retry = RetryPolicy::immediate(8);

        let billing = Arc::new(
            BillingService::new(store.clone(), events.clone(), &config).with_retry(retry),
        );
        let approvals = Arc::new(
            ApprovalService::new(store.clone(), events.clone(), &ApprovalConfig::default())
                .with_retry(retry),
        );
        let handlers = HandlerRegistry::new()
            .with(Arc::new(OperationalExpenseHandler::new(store.clone(), retry)))
            .with(Arc::new(ProcurementHandler::new(store.clone(), retry)))
            .with(Arc::new(PaymentVerificationHandler::new(billing.clone())));
        let gate = Arc::new(ApprovalGate::new(approvals.clone(), handlers));
        let requests = RequestService::new(store.clone(), gate.clone()).with_retry(retry);

        Self {
            org: OrganizationId::new(),
            store,
            events,
            billing,
            approvals,
            gate,
            requests,
        }
    }

    /// A fresh user holding `roles` in the harness organization.
    pub fn actor(&self, roles: &[&str]) -> ActorContext {
        ActorContext::new(self.org, UserId::new(), roles.iter().copied())
    }

    pub fn admin(&self) -> ActorContext {
        self.actor(&[Role::ADMIN])
    }

    pub async fn contract(&self, monthly_rate: i64) -> Contract {
        self.billing
            .create_contract(
                &self.admin(),
                NewContract {
                    patient_id: PatientId::new(),
                    room_id: RoomId::new(),
                    monthly_rate: Money::new(monthly_rate),
                    payment_due_day: 10,
                    start_date: date(2025, 1, 1),
                    end_date: None,
                },
            )
            .await
            .unwrap()
    }

    /// Opens January 2025 with an optional cash prepayment.
    pub async fn open_january(&self, contract: &Contract, prepaid: Option<i64>) -> BillingPeriod {
        self.billing
            .open_period(
                &self.admin(),
                OpenPeriod {
                    contract_id: contract.id,
                    year: 2025,
                    month: 1,
                    nursing_charge: None,
                    opening_payment: prepaid.map(cash_opening),
                    carried_debt: Vec::new(),
                },
            )
            .await
            .unwrap()
    }

    /// Registers a workflow from its configuration form.
    pub async fn workflow(&self, resource_type: &str, steps: Vec<StepConfig>) -> ApprovalWorkflow {
        let config = WorkflowConfig {
            name: format!("{resource_type} approval"),
            resource_type: resource_type.to_string(),
            description: None,
            active: true,
            steps,
        };
        let workflow = ApprovalWorkflow::from_config(self.org, &config, None).unwrap();
        self.approvals
            .register_workflow(&self.admin(), workflow)
            .await
            .unwrap()
    }

    /// BENDAHARA always, then KETUA from 5,000,000.
    pub async fn expense_workflow(&self) -> ApprovalWorkflow {
        self.workflow(
            "OPERATIONAL_EXPENSE",
            vec![
                step(1, Role::BENDAHARA, None),
                step(2, Role::KETUA, Some(5_000_000)),
            ],
        )
        .await
    }
}

pub fn step(order: u32, role: &str, min_amount: Option<i64>) -> StepConfig {
    StepConfig {
        order,
        role: role.to_string(),
        min_amount,
        max_amount: None,
        timeout_hours: None,
    }
}

pub fn cash_opening(prepaid: i64) -> OpeningPayment {
    OpeningPayment {
        prepaid: Money::new(prepaid),
        method: PaymentMethod::Cash,
        bank_reference: None,
        payer_name: "Family".into(),
    }
}

pub fn cash(contract: &Contract, amount: i64) -> RecordPayment {
    RecordPayment {
        contract_id: contract.id,
        period_id: None,
        amount: Money::new(amount),
        method: PaymentMethod::Cash,
        bank_reference: None,
        payer_name: "Family".into(),
        date: date(2025, 1, 15),
    }
}

pub fn transfer(contract: &Contract, amount: i64, reference: &str) -> RecordPayment {
    RecordPayment {
        method: PaymentMethod::BankTransfer,
        bank_reference: Some(reference.to_string()),
        ..cash(contract, amount)
    }
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}
