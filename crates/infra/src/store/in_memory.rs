//! In-memory `InventoryStore`.
//!
//! All tenants share one `RwLock`. A commit validates the whole change set
//! under the write lock before touching anything, so it lands completely or
//! not at all.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use kitchen_core::{
    CostRecordId, EntryId, ExpectedVersion, ItemId, LocationId, TenantId, Versioned,
};
use kitchen_inventory::{
    ChangeSet, CommitReceipt, IngredientCostRecord, InventoryItem, InventoryLocation,
    InventoryStore, LedgerEntry, StoreError,
};

#[derive(Debug, Default)]
struct TenantData {
    items: HashMap<ItemId, Versioned<InventoryItem>>,
    /// Creation order of `items`.
    item_order: Vec<ItemId>,
    locations: Vec<InventoryLocation>,
    cost_records: HashMap<CostRecordId, Versioned<IngredientCostRecord>>,
    /// Append-only, commit order.
    entries: Vec<LedgerEntry>,
    entry_index: HashMap<EntryId, usize>,
}

/// In-memory inventory store.
///
/// Intended for tests/dev and single-process tools. All tenants share one
/// lock; a commit holds the write lock only while it validates and copies.
#[derive(Debug, Default)]
pub struct InMemoryInventoryStore {
    tenants: RwLock<HashMap<TenantId, TenantData>>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<TenantId, TenantData>>, StoreError> {
        self.tenants
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<TenantId, TenantData>>, StoreError> {
        self.tenants
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    fn with_tenant<R>(
        &self,
        tenant_id: TenantId,
        f: impl FnOnce(&TenantData) -> R,
        empty: R,
    ) -> Result<R, StoreError> {
        let tenants = self.read()?;
        Ok(tenants.get(&tenant_id).map(f).unwrap_or(empty))
    }
}

fn check_version(
    kind: &str,
    id: impl std::fmt::Display,
    expected: ExpectedVersion,
    current: Option<u64>,
) -> Result<(), StoreError> {
    expected
        .check(current)
        .map_err(|err| StoreError::Concurrency(format!("{kind} {id}: {err}")))
}

/// Reject anything that would make `changes` only partially applicable.
fn validate(data: Option<&TenantData>, changes: &ChangeSet) -> Result<(), StoreError> {
    let tenant_id = changes.tenant_id;

    for (idx, (expected, item)) in changes.items.iter().enumerate() {
        if item.tenant_id != tenant_id {
            return Err(StoreError::TenantIsolation(format!(
                "change set contains item of another tenant (index {idx})"
            )));
        }
        let current = data.and_then(|d| d.items.get(&item.id)).map(|v| v.version);
        check_version("item", item.id, *expected, current)?;
    }

    for (idx, (expected, record)) in changes.cost_records.iter().enumerate() {
        if record.tenant_id != tenant_id {
            return Err(StoreError::TenantIsolation(format!(
                "change set contains cost record of another tenant (index {idx})"
            )));
        }
        let current = data
            .and_then(|d| d.cost_records.get(&record.id))
            .map(|v| v.version);
        check_version("cost record", record.id, *expected, current)?;
    }

    let mut batch: HashSet<EntryId> = HashSet::with_capacity(changes.entries.len());
    for (idx, entry) in changes.entries.iter().enumerate() {
        if entry.tenant_id != tenant_id {
            return Err(StoreError::TenantIsolation(format!(
                "change set contains ledger entry of another tenant (index {idx})"
            )));
        }
        let exists = data.is_some_and(|d| d.entry_index.contains_key(&entry.id));
        if exists || !batch.insert(entry.id) {
            return Err(StoreError::Integrity(format!(
                "ledger entry {} already exists",
                entry.id
            )));
        }
    }

    Ok(())
}

impl InventoryStore for InMemoryInventoryStore {
    fn find_item(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
    ) -> Result<Option<Versioned<InventoryItem>>, StoreError> {
        self.with_tenant(tenant_id, |d| d.items.get(&item_id).cloned(), None)
    }

    fn list_items(&self, tenant_id: TenantId) -> Result<Vec<Versioned<InventoryItem>>, StoreError> {
        self.with_tenant(
            tenant_id,
            |d| {
                d.item_order
                    .iter()
                    .filter_map(|id| d.items.get(id).cloned())
                    .collect()
            },
            Vec::new(),
        )
    }

    fn find_location(
        &self,
        tenant_id: TenantId,
        location_id: LocationId,
    ) -> Result<Option<InventoryLocation>, StoreError> {
        self.with_tenant(
            tenant_id,
            |d| d.locations.iter().find(|l| l.id == location_id).cloned(),
            None,
        )
    }

    fn list_locations(&self, tenant_id: TenantId) -> Result<Vec<InventoryLocation>, StoreError> {
        self.with_tenant(tenant_id, |d| d.locations.clone(), Vec::new())
    }

    fn save_location(&self, location: InventoryLocation) -> Result<InventoryLocation, StoreError> {
        let mut tenants = self.write()?;
        let data = tenants.entry(location.tenant_id).or_default();
        match data.locations.iter_mut().find(|l| l.id == location.id) {
            Some(existing) => *existing = location.clone(),
            None => data.locations.push(location.clone()),
        }
        Ok(location)
    }

    fn find_cost_record(
        &self,
        tenant_id: TenantId,
        cost_id: CostRecordId,
    ) -> Result<Option<Versioned<IngredientCostRecord>>, StoreError> {
        self.with_tenant(tenant_id, |d| d.cost_records.get(&cost_id).cloned(), None)
    }

    fn find_entry(
        &self,
        tenant_id: TenantId,
        entry_id: EntryId,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        self.with_tenant(
            tenant_id,
            |d| d.entry_index.get(&entry_id).map(|&pos| d.entries[pos].clone()),
            None,
        )
    }

    fn entries_for_item(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        self.with_tenant(
            tenant_id,
            |d| {
                d.entries
                    .iter()
                    .filter(|e| e.item_id == item_id)
                    .cloned()
                    .collect()
            },
            Vec::new(),
        )
    }

    fn ledger_snapshot(&self, tenant_id: TenantId) -> Result<Vec<LedgerEntry>, StoreError> {
        self.with_tenant(tenant_id, |d| d.entries.clone(), Vec::new())
    }

    fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, StoreError> {
        if changes.is_empty() {
            return Ok(CommitReceipt {
                item_versions: Vec::new(),
                entries_appended: 0,
            });
        }

        let mut tenants = self.write()?;
        validate(tenants.get(&changes.tenant_id), &changes)?;

        // Validated: from here on nothing can fail.
        let data = tenants.entry(changes.tenant_id).or_default();
        let mut item_versions = Vec::with_capacity(changes.items.len());

        for (_, item) in changes.items {
            let id = item.id;
            let version = match data.items.get(&id) {
                Some(current) => current.version + 1,
                None => {
                    data.item_order.push(id);
                    1
                }
            };
            data.items.insert(id, Versioned::new(version, item));
            item_versions.push((id, version));
        }

        for (_, record) in changes.cost_records {
            let version = data
                .cost_records
                .get(&record.id)
                .map_or(1, |current| current.version + 1);
            data.cost_records.insert(record.id, Versioned::new(version, record));
        }

        let entries_appended = changes.entries.len();
        for entry in changes.entries {
            data.entry_index.insert(entry.id, data.entries.len());
            data.entries.push(entry);
        }

        Ok(CommitReceipt {
            item_versions,
            entries_appended,
        })
    }
}
