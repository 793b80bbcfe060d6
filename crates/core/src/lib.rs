//! `kitchen-core`: shared building blocks for the kitchen inventory ledger.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! typed identifiers, the entity contract and optimistic-concurrency versions.

pub mod entity;
pub mod error;
pub mod id;
pub mod version;

pub use entity::Entity;
pub use error::{CoreError, CoreResult};
pub use id::{CostRecordId, EntryId, ItemId, LocationId, TenantId, UserId};
pub use version::{ExpectedVersion, Versioned};
