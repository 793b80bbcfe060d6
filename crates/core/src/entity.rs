//! Entity trait: identity + tenant ownership.

use crate::id::TenantId;

/// Entity marker + minimal interface.
///
/// Every persisted record in the ledger belongs to exactly one team (tenant);
/// stores use `tenant_id()` to keep teams isolated from each other.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> Self::Id;

    /// Returns the owning tenant (team).
    fn tenant_id(&self) -> TenantId;
}
