//! Care-facility sweep scheduler.
//!
//! Wires the engine over the in-process store, registers the configured
//! workflow templates and runs the approval-timeout and overdue sweeps on a
//! fixed interval until interrupted.
//!
//! The store is private to this process, so the sweeps only see records
//! written through this wiring. The binary is a wiring reference for the
//! sweep loop until a shared persistence collaborator implements the store
//! ports; swapping it in means replacing the `MemoryStore` construction.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use carehome_core::billing::BillingService;
use carehome_core::gate::{ApprovalGate, HandlerRegistry};
use carehome_core::identity::ActorContext;
use carehome_core::notify::TracingEventSink;
use carehome_core::requests::{
    OperationalExpenseHandler, PaymentVerificationHandler, ProcurementHandler,
};
use carehome_core::store::RetryPolicy;
use carehome_core::workflow::{ApprovalService, ApprovalWorkflow};
use carehome_shared::AppConfig;
use carehome_shared::types::{OrganizationId, UserId};
use carehome_store::MemoryStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "carehome=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;
    let retry = RetryPolicy::from(&config.engine);

    let store = Arc::new(MemoryStore::new());
    let events = Arc::new(TracingEventSink);
    let billing = Arc::new(
        BillingService::new(store.clone(), events.clone(), &config.billing).with_retry(retry),
    );
    let approvals = Arc::new(
        ApprovalService::new(store.clone(), events, &config.approval).with_retry(retry),
    );
    let handlers = HandlerRegistry::new()
        .with(Arc::new(OperationalExpenseHandler::new(store.clone(), retry)))
        .with(Arc::new(ProcurementHandler::new(store.clone(), retry)))
        .with(Arc::new(PaymentVerificationHandler::new(billing.clone())));
    let gate = ApprovalGate::new(approvals.clone(), handlers);

    let organization_id = match config.scheduler.organization_id {
        Some(id) => OrganizationId::from_uuid(id),
        None => {
            let generated = OrganizationId::new();
            warn!(%generated, "no organization configured, using a generated one");
            generated
        }
    };
    let admin = ActorContext::new(
        organization_id,
        UserId::SYSTEM,
        [config.approval.admin_role.as_str()],
    );
    for template in &config.workflows {
        let workflow = ApprovalWorkflow::from_config(
            organization_id,
            template,
            approvals.default_timeout_hours(),
        )
        .with_context(|| format!("invalid workflow `{}`", template.name))?;
        let registered = approvals
            .register_workflow(&admin, workflow)
            .await
            .with_context(|| format!("failed to register workflow `{}`", template.name))?;
        info!(
            workflow_id = %registered.id,
            kind = %registered.resource_kind,
            steps = registered.steps().len(),
            "workflow loaded"
        );
    }

    let period = Duration::from_secs(config.scheduler.sweep_interval_secs.max(1));
    let mut interval = tokio::time::interval(period);
    info!(interval_secs = period.as_secs(), "scheduler started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                sweep(&gate, &billing, Utc::now()).await;
            }
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for shutdown signal")?;
                info!("shutdown requested");
                break;
            }
        }
    }

    Ok(())
}

/// Runs both sweeps once; returns how many approvals timed out and how many
/// periods went overdue. Failures are logged and counted as zero.
async fn sweep(
    gate: &ApprovalGate<MemoryStore>,
    billing: &BillingService<MemoryStore>,
    now: DateTime<Utc>,
) -> (usize, usize) {
    let timed_out = match gate.sweep_timeouts(now).await {
        Ok(decisions) => decisions.len(),
        Err(e) => {
            warn!(error = %e, "approval timeout sweep failed");
            0
        }
    };
    if timed_out > 0 {
        info!(count = timed_out, "approvals timed out");
    }
    let overdue = match billing.mark_overdue(now.date_naive()).await {
        Ok(periods) => periods.len(),
        Err(e) => {
            warn!(error = %e, "overdue sweep failed");
            0
        }
    };
    if overdue > 0 {
        info!(count = overdue, "billing periods marked overdue");
    }
    (timed_out, overdue)
}
