use serde::{Deserialize, Serialize};

use kitchen_core::{TenantId, UserId};

use crate::Permission;

/// A user's membership in a team.
///
/// States *which team* the user acts within and which permissions are granted
/// there. A user may hold several memberships, one per team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantMembership {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub permissions: Vec<Permission>,
}

impl TenantMembership {
    pub fn new(user_id: UserId, tenant_id: TenantId, permissions: Vec<Permission>) -> Self {
        Self {
            user_id,
            tenant_id,
            permissions,
        }
    }

    pub fn grants(&self, required: &Permission) -> bool {
        self.permissions
            .iter()
            .any(|p| p.is_wildcard() || p == required)
    }
}
