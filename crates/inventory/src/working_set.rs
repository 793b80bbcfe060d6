//! Snapshot of versioned records a single operation reads and writes.
//!
//! An operation loads the records it needs, mutates them here, and hands the
//! dirty ones to the store together with the version each was read at. If the
//! operation fails the working set is simply dropped: nothing reached the store.

use std::collections::HashMap;

use kitchen_core::{Entity, ExpectedVersion, Versioned};

#[derive(Debug, Clone)]
struct Slot<T> {
    expected: ExpectedVersion,
    record: T,
    dirty: bool,
}

/// Ordered, versioned working copy of entities.
///
/// Iteration order is load order, which keeps order-dependent scans (invoice
/// name matching) deterministic.
#[derive(Debug, Clone)]
pub struct WorkingSet<T: Entity> {
    slots: Vec<Slot<T>>,
    index: HashMap<T::Id, usize>,
}

impl<T: Entity> Default for WorkingSet<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: Entity + Clone> WorkingSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(records: impl IntoIterator<Item = Versioned<T>>) -> Self {
        let mut set = Self::new();
        for record in records {
            set.load(record);
        }
        set
    }

    /// Add a stored record. Re-loading an id replaces the earlier snapshot.
    pub fn load(&mut self, versioned: Versioned<T>) {
        let expected = versioned.expected();
        self.put(expected, versioned.record, false);
    }

    /// Add a record that does not exist in the store yet.
    pub fn insert_new(&mut self, record: T) {
        self.put(ExpectedVersion::Absent, record, true);
    }

    fn put(&mut self, expected: ExpectedVersion, record: T, dirty: bool) {
        let id = record.id();
        match self.index.get(&id) {
            Some(&pos) => self.slots[pos] = Slot { expected, record, dirty },
            None => {
                self.index.insert(id, self.slots.len());
                self.slots.push(Slot { expected, record, dirty });
            }
        }
    }

    pub fn contains(&self, id: &T::Id) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &T::Id) -> Option<&T> {
        self.index.get(id).map(|&pos| &self.slots[pos].record)
    }

    /// Mutate one record. Only a successful mutation marks it for write-back,
    /// so `f` must leave the record untouched when it returns `Err`.
    pub fn update<R, E>(
        &mut self,
        id: &T::Id,
        f: impl FnOnce(&mut T) -> Result<R, E>,
    ) -> Option<Result<R, E>> {
        let pos = *self.index.get(id)?;
        let slot = &mut self.slots[pos];
        let result = f(&mut slot.record);
        if result.is_ok() {
            slot.dirty = true;
        }
        Some(result)
    }

    /// Records in load order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().map(|s| &s.record)
    }

    /// Changed records with the version they must still be at in the store.
    pub fn into_changes(self) -> Vec<(ExpectedVersion, T)> {
        self.slots
            .into_iter()
            .filter(|s| s.dirty)
            .map(|s| (s.expected, s.record))
            .collect()
    }
}
