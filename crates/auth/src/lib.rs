//! `kitchen-auth`: authorization boundary for inventory mutations.
//!
//! This crate is intentionally decoupled from HTTP and storage. The ledger only
//! consumes a boolean "can mutate inventory" decision; how memberships are
//! sourced is up to the caller.

pub mod authorize;
pub mod membership;
pub mod permissions;

pub use authorize::{authorize, AllowAll, AuthzError, InventoryAuthorizer, MembershipAuthorizer};
pub use membership::TenantMembership;
pub use permissions::Permission;
