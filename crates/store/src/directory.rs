//! Organization membership roles.

use std::collections::BTreeSet;

use dashmap::DashMap;

use carehome_core::identity::{Role, RoleDirectory};
use carehome_core::store::StoreError;
use carehome_shared::types::{OrganizationId, UserId};

/// Role directory held in memory.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    memberships: DashMap<(OrganizationId, UserId), BTreeSet<Role>>,
}

impl MemoryDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants `role` to `user_id` in `organization_id`.
    pub fn grant(&self, organization_id: OrganizationId, user_id: UserId, role: impl Into<Role>) {
        self.memberships
            .entry((organization_id, user_id))
            .or_default()
            .insert(role.into());
    }

    /// Revokes `role`; returns true if it was held.
    pub fn revoke(&self, organization_id: OrganizationId, user_id: UserId, role: &Role) -> bool {
        self.memberships
            .get_mut(&(organization_id, user_id))
            .is_some_and(|mut roles| roles.remove(role))
    }
}

impl RoleDirectory for MemoryDirectory {
    async fn roles_of(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
    ) -> Result<BTreeSet<Role>, StoreError> {
        Ok(self
            .memberships
            .get(&(organization_id, user_id))
            .map(|roles| roles.clone())
            .unwrap_or_default())
    }
}
