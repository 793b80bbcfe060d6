//! Persistence contract for the ledger.
//!
//! The domain does not depend on a storage engine, only on:
//! - tenant-scoped `find`/`list` reads returning versioned snapshots
//! - one atomic, version-checked `commit` per mutation

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use thiserror::Error;

use kitchen_core::{
    CostRecordId, EntryId, ExpectedVersion, ItemId, LocationId, TenantId, Versioned,
};

use crate::directory::StockDirectory;
use crate::entry::{verify_ledger, LedgerEntry};
use crate::error::{LedgerError, LedgerResult};
use crate::item::{IngredientCostRecord, InventoryItem, InventoryLocation};
use crate::working_set::WorkingSet;

/// Storage operation error.
///
/// These are infrastructure failures as opposed to business rejections.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    /// The commit would break append-only discipline (duplicate entry id, ...).
    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Everything one mutation writes, committed all-or-nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub tenant_id: TenantId,
    pub items: Vec<(ExpectedVersion, InventoryItem)>,
    pub cost_records: Vec<(ExpectedVersion, IngredientCostRecord)>,
    /// Appended in order; never overwrite existing entries.
    pub entries: Vec<LedgerEntry>,
}

impl ChangeSet {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            items: Vec::new(),
            cost_records: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Collect the dirty records of an operation's working sets.
    pub fn from_working(
        tenant_id: TenantId,
        directory: StockDirectory,
        cost_records: WorkingSet<IngredientCostRecord>,
        entries: Vec<LedgerEntry>,
    ) -> Self {
        Self {
            tenant_id,
            items: directory.into_changes(),
            cost_records: cost_records.into_changes(),
            entries,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.cost_records.is_empty() && self.entries.is_empty()
    }

    /// Check that the written balances and the appended entries agree.
    ///
    /// `before` holds the items as they were loaded (new items are absent).
    /// For every (item, location) the balance change must equal the sum of
    /// the entry deltas, transfer halves must pair up, and every entry must
    /// pass its own validation.
    pub fn verify(&self, before: &[InventoryItem]) -> LedgerResult<()> {
        for entry in &self.entries {
            entry
                .validate()
                .map_err(|e| LedgerError::integrity(format!("entry {}: {e}", entry.id)))?;
        }
        verify_ledger(&self.entries)?;

        let before: HashMap<_, _> = before.iter().map(|item| (item.id, item)).collect();
        let after: HashMap<_, _> = self.items.iter().map(|(_, item)| (item.id, item)).collect();

        let mut deltas: HashMap<_, Decimal> = HashMap::new();
        for entry in &self.entries {
            *deltas.entry((entry.item_id, entry.location_id)).or_default() += entry.quantity_change;
        }

        let old_balance = |item_id: ItemId, location_id: LocationId| {
            before
                .get(&item_id)
                .map_or(Decimal::ZERO, |item| item.balance(location_id))
        };

        for (&(item_id, location_id), &delta) in &deltas {
            let Some(item) = after.get(&item_id) else {
                return Err(LedgerError::integrity(format!(
                    "entries for item {item_id} without a balance write"
                )));
            };
            let moved = item.balance(location_id) - old_balance(item_id, location_id);
            if moved != delta {
                return Err(LedgerError::integrity(format!(
                    "item {item_id} at {location_id}: balance moved {moved}, ledger records {delta}"
                )));
            }
        }

        for item in after.values() {
            let touched = item
                .locations()
                .iter()
                .map(|l| l.location_id)
                .chain(
                    before
                        .get(&item.id)
                        .into_iter()
                        .flat_map(|old| old.locations().iter().map(|l| l.location_id)),
                );
            for location_id in touched {
                let moved = item.balance(location_id) - old_balance(item.id, location_id);
                let recorded = deltas
                    .get(&(item.id, location_id))
                    .copied()
                    .unwrap_or(Decimal::ZERO);
                if moved != recorded {
                    return Err(LedgerError::integrity(format!(
                        "item {} at {location_id}: balance moved {moved} without matching entries",
                        item.id
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    /// New version per written item.
    pub item_versions: Vec<(ItemId, u64)>,
    pub entries_appended: usize,
}

/// Tenant-scoped, versioned inventory storage.
///
/// Implementations must:
/// - enforce tenant isolation on every read and write
/// - check every `ExpectedVersion` in a `ChangeSet` before writing anything
/// - apply a `ChangeSet` atomically: readers see all of it or none of it
/// - treat ledger entries as append-only (reject an id that already exists)
pub trait InventoryStore: Send + Sync {
    fn find_item(&self, tenant_id: TenantId, item_id: ItemId)
        -> Result<Option<Versioned<InventoryItem>>, StoreError>;

    /// All items of a team, in creation order.
    fn list_items(&self, tenant_id: TenantId) -> Result<Vec<Versioned<InventoryItem>>, StoreError>;

    fn find_location(
        &self,
        tenant_id: TenantId,
        location_id: LocationId,
    ) -> Result<Option<InventoryLocation>, StoreError>;

    fn list_locations(&self, tenant_id: TenantId) -> Result<Vec<InventoryLocation>, StoreError>;

    /// Locations are owned by team settings; saving one is an upsert.
    fn save_location(&self, location: InventoryLocation) -> Result<InventoryLocation, StoreError>;

    fn find_cost_record(
        &self,
        tenant_id: TenantId,
        cost_id: CostRecordId,
    ) -> Result<Option<Versioned<IngredientCostRecord>>, StoreError>;

    fn find_entry(&self, tenant_id: TenantId, entry_id: EntryId)
        -> Result<Option<LedgerEntry>, StoreError>;

    /// Entries of one item, in commit order.
    fn entries_for_item(&self, tenant_id: TenantId, item_id: ItemId)
        -> Result<Vec<LedgerEntry>, StoreError>;

    /// Consistent snapshot of a team's whole ledger, in commit order.
    fn ledger_snapshot(&self, tenant_id: TenantId) -> Result<Vec<LedgerEntry>, StoreError>;

    fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, StoreError>;
}

impl<S> InventoryStore for Arc<S>
where
    S: InventoryStore + ?Sized,
{
    fn find_item(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
    ) -> Result<Option<Versioned<InventoryItem>>, StoreError> {
        (**self).find_item(tenant_id, item_id)
    }

    fn list_items(&self, tenant_id: TenantId) -> Result<Vec<Versioned<InventoryItem>>, StoreError> {
        (**self).list_items(tenant_id)
    }

    fn find_location(
        &self,
        tenant_id: TenantId,
        location_id: LocationId,
    ) -> Result<Option<InventoryLocation>, StoreError> {
        (**self).find_location(tenant_id, location_id)
    }

    fn list_locations(&self, tenant_id: TenantId) -> Result<Vec<InventoryLocation>, StoreError> {
        (**self).list_locations(tenant_id)
    }

    fn save_location(&self, location: InventoryLocation) -> Result<InventoryLocation, StoreError> {
        (**self).save_location(location)
    }

    fn find_cost_record(
        &self,
        tenant_id: TenantId,
        cost_id: CostRecordId,
    ) -> Result<Option<Versioned<IngredientCostRecord>>, StoreError> {
        (**self).find_cost_record(tenant_id, cost_id)
    }

    fn find_entry(
        &self,
        tenant_id: TenantId,
        entry_id: EntryId,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        (**self).find_entry(tenant_id, entry_id)
    }

    fn entries_for_item(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        (**self).entries_for_item(tenant_id, item_id)
    }

    fn ledger_snapshot(&self, tenant_id: TenantId) -> Result<Vec<LedgerEntry>, StoreError> {
        (**self).ledger_snapshot(tenant_id)
    }

    fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, StoreError> {
        (**self).commit(changes)
    }
}
