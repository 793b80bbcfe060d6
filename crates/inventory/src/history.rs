//! Historical reconstruction: stock movement reports replayed from the ledger.
//!
//! Reports never read the materialized balances. Everything here is a pure
//! fold over ledger entries, so replaying the same ledger gives the same rows.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use kitchen_core::{ItemId, LocationId};

use crate::entry::LedgerEntry;
use crate::error::{LedgerError, LedgerResult};
use crate::item::InventoryItem;

/// Report window and filters. Both range bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub range_start: DateTime<Utc>,
    pub range_end: DateTime<Utc>,
    /// `None` means every location.
    pub location_ids: Option<BTreeSet<LocationId>>,
    /// `None` means every item.
    pub item_ids: Option<BTreeSet<ItemId>>,
}

impl HistoryQuery {
    pub fn between(range_start: DateTime<Utc>, range_end: DateTime<Utc>) -> LedgerResult<Self> {
        if range_start > range_end {
            return Err(LedgerError::invalid(format!(
                "report range starts ({range_start}) after it ends ({range_end})"
            )));
        }
        Ok(Self {
            range_start,
            range_end,
            location_ids: None,
            item_ids: None,
        })
    }

    /// Whole UTC days, from the start of `first` to the last instant of `last`.
    pub fn for_days(first: NaiveDate, last: NaiveDate) -> LedgerResult<Self> {
        if first > last {
            return Err(LedgerError::invalid(format!(
                "report range starts ({first}) after it ends ({last})"
            )));
        }
        let start = first
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| LedgerError::invalid(format!("invalid start date {first}")))?
            .and_utc();
        let end = last
            .checked_add_days(Days::new(1))
            .and_then(|next| next.and_hms_opt(0, 0, 0))
            .ok_or_else(|| LedgerError::invalid(format!("invalid end date {last}")))?
            .and_utc()
            - chrono::Duration::nanoseconds(1);
        Self::between(start, end)
    }

    pub fn with_locations(mut self, locations: impl IntoIterator<Item = LocationId>) -> Self {
        self.location_ids = Some(locations.into_iter().collect());
        self
    }

    pub fn with_items(mut self, items: impl IntoIterator<Item = ItemId>) -> Self {
        self.item_ids = Some(items.into_iter().collect());
        self
    }

    fn wants_location(&self, location_id: LocationId) -> bool {
        self.location_ids
            .as_ref()
            .is_none_or(|set| set.contains(&location_id))
    }

    fn wants_item(&self, item_id: ItemId) -> bool {
        self.item_ids.as_ref().is_none_or(|set| set.contains(&item_id))
    }
}

/// One report row. `end_stock == start_stock + total_in - total_out` always.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovementRow {
    pub item_id: ItemId,
    pub item_name: String,
    pub unit: String,
    pub start_stock: Decimal,
    pub total_in: Decimal,
    pub total_out: Decimal,
    pub end_stock: Decimal,
}

impl StockMovementRow {
    fn is_empty(&self) -> bool {
        self.start_stock.is_zero() && self.total_in.is_zero() && self.total_out.is_zero()
    }
}

#[derive(Default, Clone, Copy)]
struct Totals {
    start: Decimal,
    inbound: Decimal,
    outbound: Decimal,
}

/// Replay `ledger` into one movement row per item.
///
/// Entries before `range_start` only move the opening balance; entries inside
/// the range count towards `total_in`/`total_out` by sign; later entries are
/// ignored. Transfers between two selected locations show on both sides.
/// Rows follow `items` order and items with no stock and no movement are left
/// out. Entries for items missing from `items` are skipped.
pub fn reconstruct(
    items: &[InventoryItem],
    ledger: &[LedgerEntry],
    query: &HistoryQuery,
) -> Vec<StockMovementRow> {
    let mut totals: HashMap<ItemId, Totals> = HashMap::new();

    for entry in ledger {
        if entry.timestamp > query.range_end
            || !query.wants_item(entry.item_id)
            || !query.wants_location(entry.location_id)
        {
            continue;
        }
        let slot = totals.entry(entry.item_id).or_default();
        if entry.timestamp < query.range_start {
            slot.start += entry.quantity_change;
        } else if entry.is_inbound() {
            slot.inbound += entry.quantity_change;
        } else {
            slot.outbound += -entry.quantity_change;
        }
    }

    items
        .iter()
        .filter(|item| query.wants_item(item.id))
        .filter_map(|item| {
            let t = totals.get(&item.id).copied().unwrap_or_default();
            let row = StockMovementRow {
                item_id: item.id,
                item_name: item.name.clone(),
                unit: item.unit.clone(),
                start_stock: t.start,
                total_in: t.inbound,
                total_out: t.outbound,
                end_stock: t.start + t.inbound - t.outbound,
            };
            (!row.is_empty()).then_some(row)
        })
        .collect()
}

/// Balance of one (item, location) as of `at` (inclusive), from the ledger alone.
pub fn balance_at(
    ledger: &[LedgerEntry],
    item_id: ItemId,
    location_id: LocationId,
    at: DateTime<Utc>,
) -> Decimal {
    ledger
        .iter()
        .filter(|e| e.item_id == item_id && e.location_id == location_id && e.timestamp <= at)
        .map(|e| e.quantity_change)
        .sum()
}
