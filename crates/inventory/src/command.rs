//! Mutation requests accepted by the ledger.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use kitchen_core::{CostRecordId, EntryId, ItemId, LocationId, TenantId, UserId};

use crate::error::{LedgerError, LedgerResult};

/// Who is mutating, for which team, and at what business time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationContext {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

impl MutationContext {
    pub fn new(tenant_id: TenantId, user_id: UserId, occurred_at: DateTime<Utc>) -> Self {
        Self {
            tenant_id,
            user_id,
            occurred_at,
        }
    }

    pub fn now(tenant_id: TenantId, user_id: UserId) -> Self {
        Self::new(tenant_id, user_id, Utc::now())
    }
}

/// Command: CreateItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateItem {
    pub item_id: ItemId,
    pub name: String,
    pub unit: String,
    pub reorder_point: Decimal,
    pub ingredient_cost_id: Option<CostRecordId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Add,
    Subtract,
}

/// Command: AdjustStock (manual add / subtract at one location).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub quantity: Decimal,
    pub direction: Direction,
    pub notes: Option<String>,
}

/// Command: TransferStock between two locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStock {
    pub item_id: ItemId,
    pub from_location_id: LocationId,
    pub to_location_id: LocationId,
    pub quantity: Decimal,
    pub notes: Option<String>,
}

/// Command: RecordWaste.
///
/// `location_id` defaults to the item's primary location when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordWaste {
    pub item_id: ItemId,
    pub quantity: Decimal,
    pub reason: String,
    pub notes: Option<String>,
    pub location_id: Option<LocationId>,
}

/// Command: UndoWaste. Appends a compensating entry; the waste entry stays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoWaste {
    pub waste_entry_id: EntryId,
}

/// One physically counted quantity.
///
/// `location_id` defaults to the item's primary location when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockCount {
    pub item_id: ItemId,
    pub declared_quantity: Decimal,
    pub location_id: Option<LocationId>,
}

/// What to do when some rows of a stock take are rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockTakePolicy {
    /// Any rejected row aborts the whole stock take.
    #[default]
    Atomic,
    /// Valid rows commit; rejected rows are reported back.
    PartialCommit,
}

impl core::str::FromStr for StockTakePolicy {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "atomic" => Ok(StockTakePolicy::Atomic),
            "partial" | "partial_commit" => Ok(StockTakePolicy::PartialCommit),
            other => Err(LedgerError::invalid(format!("unknown stock take policy '{other}'"))),
        }
    }
}

/// Command: SubmitStockTake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitStockTake {
    pub counts: Vec<StockCount>,
    /// `None` defers to the service's configured default.
    pub policy: Option<StockTakePolicy>,
}

pub(crate) fn ensure_positive(quantity: Decimal, what: &str) -> LedgerResult<()> {
    if quantity <= Decimal::ZERO {
        return Err(LedgerError::invalid(format!("{what} must be positive (got {quantity})")));
    }
    Ok(())
}
