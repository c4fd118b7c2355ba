//! Typed IDs for type-safe entity references.
//!
//! Using typed IDs prevents accidentally passing a `PaymentId` where a `BillingPeriodId` is expected.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Macro to generate typed ID wrappers.
macro_rules! typed_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a new random ID using UUID v7 (time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Creates an ID from an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner UUID.
            #[must_use]
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

typed_id!(UserId, "Unique identifier for a user.");
typed_id!(OrganizationId, "Unique identifier for an organization.");
typed_id!(PatientId, "Unique identifier for a patient.");
typed_id!(RoomId, "Unique identifier for a room.");
typed_id!(ContractId, "Unique identifier for a patient stay contract.");
typed_id!(BillingPeriodId, "Unique identifier for a monthly billing period.");
typed_id!(ChargeId, "Unique identifier for a charge line.");
typed_id!(PatientExpenseId, "Unique identifier for a patient expense.");
typed_id!(PaymentId, "Unique identifier for a patient payment.");
typed_id!(TransactionId, "Unique identifier for an organization ledger transaction.");
typed_id!(BankAccountId, "Unique identifier for an organization bank account.");
typed_id!(WorkflowId, "Unique identifier for an approval workflow template.");
typed_id!(ApprovalId, "Unique identifier for an approval instance.");
typed_id!(ApprovalActionId, "Unique identifier for an approval audit action.");
typed_id!(OperationalExpenseId, "Unique identifier for an operational expense.");
typed_id!(ProcurementId, "Unique identifier for a procurement request.");

impl UserId {
    /// The actor recorded on system-initiated transitions (timeouts).
    pub const SYSTEM: Self = Self(Uuid::nil());

    /// Returns true if this is the system actor.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.0.is_nil()
    }
}
