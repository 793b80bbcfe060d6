use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use thiserror::Error;

use kitchen_core::{TenantId, UserId};

use crate::{Permission, TenantMembership};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("tenant mismatch")]
    TenantMismatch,

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),

    #[error("membership table unavailable: {0}")]
    Unavailable(String),
}

/// Authorize a membership for a team-scoped action.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(
    membership: &TenantMembership,
    tenant_id: TenantId,
    required: &Permission,
) -> Result<(), AuthzError> {
    if membership.tenant_id != tenant_id {
        return Err(AuthzError::TenantMismatch);
    }

    if membership.grants(required) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

/// Boolean gate consulted before any inventory mutation touches state.
pub trait InventoryAuthorizer: Send + Sync {
    fn can_mutate_inventory(&self, user_id: UserId, tenant_id: TenantId) -> bool;
}

impl<A> InventoryAuthorizer for Arc<A>
where
    A: InventoryAuthorizer + ?Sized,
{
    fn can_mutate_inventory(&self, user_id: UserId, tenant_id: TenantId) -> bool {
        (**self).can_mutate_inventory(user_id, tenant_id)
    }
}

/// Gate that grants everything (single-user tools, tests).
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl InventoryAuthorizer for AllowAll {
    fn can_mutate_inventory(&self, _user_id: UserId, _tenant_id: TenantId) -> bool {
        true
    }
}

/// In-memory membership table backed gate.
///
/// Users without a membership for the team are denied.
#[derive(Debug, Default)]
pub struct MembershipAuthorizer {
    memberships: RwLock<MembershipTable>,
}

type MembershipTable = HashMap<(UserId, TenantId), TenantMembership>;

impl MembershipAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, membership: TenantMembership) -> Result<(), AuthzError> {
        let mut map = self.write()?;
        map.insert((membership.user_id, membership.tenant_id), membership);
        Ok(())
    }

    pub fn revoke(&self, user_id: UserId, tenant_id: TenantId) -> Result<(), AuthzError> {
        self.write()?.remove(&(user_id, tenant_id));
        Ok(())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MembershipTable>, AuthzError> {
        self.memberships.write().map_err(|_| {
            tracing::warn!("membership lock poisoned, write dropped");
            AuthzError::Unavailable("lock poisoned".to_string())
        })
    }
}

impl InventoryAuthorizer for MembershipAuthorizer {
    fn can_mutate_inventory(&self, user_id: UserId, tenant_id: TenantId) -> bool {
        let map = match self.memberships.read() {
            Ok(m) => m,
            Err(_) => return false,
        };

        match map.get(&(user_id, tenant_id)) {
            Some(membership) => {
                match authorize(membership, tenant_id, &Permission::INVENTORY_MUTATE) {
                    Ok(()) => true,
                    Err(err) => {
                        tracing::debug!(
                            %user_id,
                            %tenant_id,
                            error = %err,
                            "inventory mutation denied"
                        );
                        false
                    }
                }
            }
            None => false,
        }
    }
}
