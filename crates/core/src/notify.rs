//! Fire-and-forget notification and document generation ports.
//!
//! Events are published after the owning commit succeeds. Sinks never fail
//! the operation that produced the event.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use carehome_shared::types::{
    ApprovalId, BillingPeriodId, ContractId, Money, OrganizationId, PaymentId, RoomId,
};

use crate::billing::BillingPeriod;
use crate::workflow::{ApprovalStatus, ResourceRef};

/// Domain events consumed by the notification/UI collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// An approval was opened, advanced or concluded.
    ApprovalStateChanged {
        /// Organization.
        organization_id: OrganizationId,
        /// Approval instance.
        approval_id: ApprovalId,
        /// Gated resource.
        resource: ResourceRef,
        /// Status after the transition.
        status: ApprovalStatus,
        /// Step the approval now waits on.
        step_order: u32,
    },
    /// A billing period was settled.
    PeriodSettled {
        /// Organization.
        organization_id: OrganizationId,
        /// Contract.
        contract_id: ContractId,
        /// Settled period.
        period_id: BillingPeriodId,
        /// Revenue recognized by the settlement.
        revenue: Money,
    },
    /// A billing period passed its due date with money owed.
    PeriodOverdue {
        /// Organization.
        organization_id: OrganizationId,
        /// Overdue period.
        period_id: BillingPeriodId,
        /// Balance at the time of the sweep.
        balance: Money,
    },
    /// A payment was verified and now counts toward the balance.
    PaymentVerified {
        /// Organization.
        organization_id: OrganizationId,
        /// Payment.
        payment_id: PaymentId,
        /// Period it was applied to.
        period_id: BillingPeriodId,
        /// Amount.
        amount: Money,
    },
    /// A pending payment was rejected.
    PaymentRejected {
        /// Organization.
        organization_id: OrganizationId,
        /// Payment.
        payment_id: PaymentId,
    },
    /// A contract completed; its room can be released.
    ContractCompleted {
        /// Organization.
        organization_id: OrganizationId,
        /// Contract.
        contract_id: ContractId,
        /// Room to release.
        room_id: RoomId,
        /// Checkout date.
        checkout_date: NaiveDate,
    },
}

/// Receives domain events. Must not block.
pub trait EventSink: Send + Sync {
    /// Publishes one event.
    fn publish(&self, event: DomainEvent);
}

/// Sink that logs every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: DomainEvent) {
        match serde_json::to_string(&event) {
            Ok(payload) => info!(event = %payload, "domain event"),
            Err(e) => info!(error = %e, ?event, "domain event"),
        }
    }
}

/// Sink that keeps events in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every event published so far.
    pub fn events(&self) -> Vec<DomainEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: DomainEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Reference to a generated artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    /// Where the artifact can be fetched.
    pub location: String,
}

/// Document generation failure.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// Rendering failed.
    #[error("Document rendering failed: {0}")]
    Render(String),
}

/// Produces printable artifacts for settled periods.
#[async_trait]
pub trait DocumentGenerator: Send + Sync {
    /// Renders the invoice of a settled period.
    async fn render_period(&self, period: &BillingPeriod) -> Result<DocumentRef, DocumentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingSink::new();
        let payment_id = PaymentId::new();
        sink.publish(DomainEvent::PaymentRejected {
            organization_id: OrganizationId::new(),
            payment_id,
        });
        sink.publish(DomainEvent::PeriodOverdue {
            organization_id: OrganizationId::new(),
            period_id: BillingPeriodId::new(),
            balance: Money::new(-5),
        });

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            DomainEvent::PaymentRejected { payment_id: id, .. } if id == payment_id
        ));
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(DomainEvent::PaymentRejected {
            organization_id: OrganizationId::new(),
            payment_id: PaymentId::new(),
        })
        .unwrap();
        assert_eq!(json["type"], "payment_rejected");
    }
}
