//! Ledger error model.

use rust_decimal::Decimal;
use thiserror::Error;

use kitchen_core::{EntryId, ItemId, LocationId, TenantId, UserId};

use crate::store::StoreError;

/// Result type used across the inventory ledger.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Failure of a ledger operation.
///
/// Every variant except `LedgerIntegrityViolation` is recoverable by the caller
/// and is returned before any state is committed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A subtract, transfer or waste would drive a balance negative.
    #[error(
        "insufficient stock for item {item_id} at location {location_id} (available: {available}, requested: {requested})"
    )]
    InsufficientStock {
        item_id: ItemId,
        location_id: LocationId,
        available: Decimal,
        requested: Decimal,
    },

    #[error("unknown location: {0}")]
    UnknownLocation(LocationId),

    #[error("unknown item: {0}")]
    UnknownItem(ItemId),

    #[error("unknown ledger entry: {0}")]
    UnknownEntry(EntryId),

    #[error("permission denied for user {user_id} in team {tenant_id}")]
    PermissionDenied { user_id: UserId, tenant_id: TenantId },

    /// Rejected before any side effect (non-positive quantity, same-location transfer, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A ledger invariant failed after the working state was written. Always a bug.
    #[error("ledger integrity violation: {0}")]
    LedgerIntegrityViolation(String),

    /// Optimistic commit retries were exhausted.
    #[error("concurrent modification: {0}")]
    Concurrency(String),

    #[error("store failure: {0}")]
    Store(String),
}

impl LedgerError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::LedgerIntegrityViolation(msg.into())
    }
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Concurrency(msg) => LedgerError::Concurrency(msg),
            StoreError::Integrity(msg) => LedgerError::LedgerIntegrityViolation(msg),
            other => LedgerError::Store(other.to_string()),
        }
    }
}
