//! Roles and explicit actor context.
//!
//! Engine calls never look up a "current organization" from ambient state;
//! the caller resolves the actor once through a [`RoleDirectory`] and passes
//! the resulting [`ActorContext`] into every operation.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

use carehome_shared::types::{OrganizationId, UserId};

use crate::store::StoreError;

/// A role name held within an organization (e.g. `BENDAHARA`).
///
/// Roles compare by normalized name only: there is no hierarchy, so a
/// higher-ranked role never implicitly satisfies a step configured for
/// another role.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(String);

impl Role {
    /// Treasurer.
    pub const BENDAHARA: &'static str = "BENDAHARA";
    /// Chairperson.
    pub const KETUA: &'static str = "KETUA";
    /// Secretary.
    pub const SEKRETARIS: &'static str = "SEKRETARIS";
    /// Organization administrator.
    pub const ADMIN: &'static str = "ADMIN";

    /// Creates a role, normalizing case and surrounding whitespace.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(name.trim().to_uppercase())
    }

    /// Returns the normalized role name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Role {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Who is acting, in which organization, holding which roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorContext {
    /// Organization the request is scoped to.
    pub organization_id: OrganizationId,
    /// Acting user.
    pub user_id: UserId,
    /// Roles held by the user in the organization.
    pub roles: BTreeSet<Role>,
}

impl ActorContext {
    /// Creates a context from explicit parts.
    pub fn new<I, R>(organization_id: OrganizationId, user_id: UserId, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Role>,
    {
        Self {
            organization_id,
            user_id,
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// Context for system-initiated transitions (timeout sweeps).
    #[must_use]
    pub fn system(organization_id: OrganizationId) -> Self {
        Self {
            organization_id,
            user_id: UserId::SYSTEM,
            roles: BTreeSet::new(),
        }
    }

    /// Returns true if the actor holds `role`.
    #[must_use]
    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.contains(role)
    }

    /// Resolves the actor's roles through a directory.
    pub async fn resolve<D: RoleDirectory>(
        directory: &D,
        organization_id: OrganizationId,
        user_id: UserId,
    ) -> Result<Self, StoreError> {
        let roles = directory.roles_of(organization_id, user_id).await?;
        Ok(Self {
            organization_id,
            user_id,
            roles,
        })
    }
}

/// Identity/role collaborator: membership lookup only, never authentication.
pub trait RoleDirectory: Send + Sync {
    /// Returns the roles `user_id` holds in `organization_id`.
    fn roles_of(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
    ) -> impl Future<Output = Result<BTreeSet<Role>, StoreError>> + Send;
}
