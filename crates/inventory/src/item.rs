//! Stocked records: locations, items with per-location balances, and
//! ingredient cost records.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use kitchen_core::{CostRecordId, Entity, ItemId, LocationId, TenantId};

use crate::error::{LedgerError, LedgerResult};

/// A storage location. Managed by team settings; referenced by id only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLocation {
    pub id: LocationId,
    pub tenant_id: TenantId,
    pub name: String,
}

impl InventoryLocation {
    pub fn new(tenant_id: TenantId, id: LocationId, name: impl Into<String>) -> Self {
        Self {
            id,
            tenant_id,
            name: name.into(),
        }
    }
}

impl Entity for InventoryLocation {
    type Id = LocationId;

    fn id(&self) -> LocationId {
        self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Current balance of one item at one location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationStock {
    pub location_id: LocationId,
    pub quantity: Decimal,
}

/// An ingredient tracked in stock.
///
/// `locations` is the authoritative current balance per location, kept in
/// lockstep with the ledger. The first entry is the item's primary location.
/// Balances only change through `StockDirectory::apply_delta`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: ItemId,
    pub tenant_id: TenantId,
    pub name: String,
    pub unit: String,
    pub reorder_point: Decimal,
    pub ingredient_cost_id: Option<CostRecordId>,
    locations: Vec<LocationStock>,
}

impl InventoryItem {
    /// Create an item with no stock anywhere.
    pub fn new(
        tenant_id: TenantId,
        id: ItemId,
        name: impl Into<String>,
        unit: impl Into<String>,
        reorder_point: Decimal,
    ) -> LedgerResult<Self> {
        let name = name.into().trim().to_string();
        let unit = unit.into().trim().to_string();
        if name.is_empty() {
            return Err(LedgerError::invalid("item name cannot be empty"));
        }
        if unit.is_empty() {
            return Err(LedgerError::invalid("item unit cannot be empty"));
        }
        if reorder_point < Decimal::ZERO {
            return Err(LedgerError::invalid("reorder point cannot be negative"));
        }
        Ok(Self {
            id,
            tenant_id,
            name,
            unit,
            reorder_point,
            ingredient_cost_id: None,
            locations: Vec::new(),
        })
    }

    pub fn with_cost_record(mut self, cost_id: CostRecordId) -> Self {
        self.ingredient_cost_id = Some(cost_id);
        self
    }

    pub fn locations(&self) -> &[LocationStock] {
        &self.locations
    }

    /// Balance at `location_id`; zero when the item was never stocked there.
    pub fn balance(&self, location_id: LocationId) -> Decimal {
        self.locations
            .iter()
            .find(|l| l.location_id == location_id)
            .map(|l| l.quantity)
            .unwrap_or(Decimal::ZERO)
    }

    /// The documented default location for waste and stock takes: the first
    /// location the item was ever stocked at.
    pub fn primary_location(&self) -> Option<LocationId> {
        self.locations.first().map(|l| l.location_id)
    }

    pub fn total_quantity(&self) -> Decimal {
        self.locations.iter().map(|l| l.quantity).sum()
    }

    pub fn is_low_stock(&self) -> bool {
        self.total_quantity() <= self.reorder_point
    }

    /// Apply `delta` at one location. Either fully applies or leaves the item untouched.
    pub(crate) fn apply_delta(
        &mut self,
        location_id: LocationId,
        delta: Decimal,
    ) -> LedgerResult<Decimal> {
        match self.locations.iter_mut().find(|l| l.location_id == location_id) {
            Some(slot) => {
                let next = slot.quantity + delta;
                if next < Decimal::ZERO {
                    return Err(LedgerError::InsufficientStock {
                        item_id: self.id,
                        location_id,
                        available: slot.quantity,
                        requested: -delta,
                    });
                }
                slot.quantity = next;
                Ok(next)
            }
            None if delta > Decimal::ZERO => {
                self.locations.push(LocationStock {
                    location_id,
                    quantity: delta,
                });
                Ok(delta)
            }
            None => Err(LedgerError::UnknownLocation(location_id)),
        }
    }
}

impl Entity for InventoryItem {
    type Id = ItemId;

    fn id(&self) -> ItemId {
        self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Latest known purchase price of an ingredient. One-to-one with an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngredientCostRecord {
    pub id: CostRecordId,
    pub tenant_id: TenantId,
    pub name: String,
    pub cost: Decimal,
    pub purchase_unit: String,
}

impl IngredientCostRecord {
    pub fn new(
        tenant_id: TenantId,
        id: CostRecordId,
        name: impl Into<String>,
        cost: Decimal,
        purchase_unit: impl Into<String>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            name: name.into(),
            cost,
            purchase_unit: purchase_unit.into(),
        }
    }
}

impl Entity for IngredientCostRecord {
    type Id = CostRecordId;

    fn id(&self) -> CostRecordId {
        self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
