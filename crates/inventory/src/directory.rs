//! Stock Directory: current quantity per (item, location).

use rust_decimal::Decimal;

use kitchen_core::{CostRecordId, ExpectedVersion, ItemId, LocationId, Versioned};

use crate::error::{LedgerError, LedgerResult};
use crate::item::InventoryItem;
use crate::working_set::WorkingSet;

/// The materialized current-balance view the rest of the system reads.
///
/// A directory holds the items one operation works on. It never writes ledger
/// entries itself: every successful `apply_delta` must be paired by the caller
/// with exactly one `LedgerEntry` carrying the same delta, and both are
/// committed together through `InventoryStore::commit`.
#[derive(Debug, Clone, Default)]
pub struct StockDirectory {
    items: WorkingSet<InventoryItem>,
}

impl StockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(items: impl IntoIterator<Item = Versioned<InventoryItem>>) -> Self {
        Self {
            items: WorkingSet::from_snapshot(items),
        }
    }

    pub fn load(&mut self, item: Versioned<InventoryItem>) {
        self.items.load(item);
    }

    /// Register an item created by the current operation.
    pub fn insert_new(&mut self, item: InventoryItem) -> LedgerResult<()> {
        if self.items.contains(&item.id) {
            return Err(LedgerError::invalid(format!("item {} already exists", item.id)));
        }
        self.items.insert_new(item);
        Ok(())
    }

    pub fn item(&self, item_id: ItemId) -> LedgerResult<&InventoryItem> {
        self.items.get(&item_id).ok_or(LedgerError::UnknownItem(item_id))
    }

    pub fn items(&self) -> impl Iterator<Item = &InventoryItem> {
        self.items.iter()
    }

    /// Current balance; zero when there is no entry for that location (or item).
    pub fn get_balance(&self, item_id: ItemId, location_id: LocationId) -> Decimal {
        self.items
            .get(&item_id)
            .map(|item| item.balance(location_id))
            .unwrap_or(Decimal::ZERO)
    }

    /// Add `delta` to one balance and return the new quantity.
    ///
    /// Fails with `InsufficientStock` when the balance would go negative and
    /// with `UnknownLocation` when a non-positive delta targets a location the
    /// item holds no entry for. On failure nothing changes.
    pub fn apply_delta(
        &mut self,
        item_id: ItemId,
        location_id: LocationId,
        delta: Decimal,
    ) -> LedgerResult<Decimal> {
        self.items
            .update(&item_id, |item| item.apply_delta(location_id, delta))
            .unwrap_or(Err(LedgerError::UnknownItem(item_id)))
    }

    /// Overwrite item metadata (cost link) without touching balances.
    pub(crate) fn link_cost_record(
        &mut self,
        item_id: ItemId,
        cost_id: CostRecordId,
    ) -> LedgerResult<()> {
        self.items
            .update(&item_id, |item| {
                item.ingredient_cost_id = Some(cost_id);
                Ok(())
            })
            .unwrap_or(Err(LedgerError::UnknownItem(item_id)))
    }

    /// Resolve an explicit location or fall back to the item's primary one.
    pub fn resolve_location(
        &self,
        item_id: ItemId,
        explicit: Option<LocationId>,
    ) -> LedgerResult<Option<LocationId>> {
        let item = self.item(item_id)?;
        Ok(explicit.or_else(|| item.primary_location()))
    }

    pub fn into_changes(self) -> Vec<(ExpectedVersion, InventoryItem)> {
        self.items.into_changes()
    }
}
