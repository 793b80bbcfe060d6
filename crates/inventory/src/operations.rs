//! Pure decision logic for the stock mutations.
//!
//! Each planner applies its deltas to a `StockDirectory` working set and
//! returns the ledger entries that pair with them. Planners perform no IO; the
//! caller commits directory changes and entries together or drops both.

use std::collections::HashSet;

use rust_decimal::Decimal;

use kitchen_core::{EntryId, ItemId, LocationId};

use crate::command::{
    ensure_positive, AdjustStock, CreateItem, Direction, MutationContext, RecordWaste,
    StockCount, StockTakePolicy, TransferStock,
};
use crate::directory::StockDirectory;
use crate::entry::{EntryType, LedgerEntry};
use crate::error::{LedgerError, LedgerResult};
use crate::item::InventoryItem;

/// Build a new, unstocked item.
pub fn create_item(ctx: &MutationContext, cmd: &CreateItem) -> LedgerResult<InventoryItem> {
    let item = InventoryItem::new(
        ctx.tenant_id,
        cmd.item_id,
        cmd.name.clone(),
        cmd.unit.clone(),
        cmd.reorder_point,
    )?;
    Ok(match cmd.ingredient_cost_id {
        Some(cost_id) => item.with_cost_record(cost_id),
        None => item,
    })
}

/// Manual add or subtract at one location. Subtraction never clamps.
pub fn adjust_stock(
    dir: &mut StockDirectory,
    ctx: &MutationContext,
    cmd: &AdjustStock,
) -> LedgerResult<LedgerEntry> {
    ensure_positive(cmd.quantity, "quantity")?;
    if cmd
        .notes
        .as_deref()
        .is_some_and(|n| n.trim_start().to_lowercase().starts_with(UNDO_PREFIX))
    {
        return Err(LedgerError::invalid(format!(
            "notes starting with '{UNDO_PREFIX}' are reserved for waste undo"
        )));
    }
    let (delta, entry_type) = match cmd.direction {
        Direction::Add => (cmd.quantity, EntryType::ManualAdd),
        Direction::Subtract => (-cmd.quantity, EntryType::ManualSubtract),
    };
    dir.apply_delta(cmd.item_id, cmd.location_id, delta)?;
    LedgerEntry::record(ctx, cmd.item_id, cmd.location_id, entry_type, delta, cmd.notes.clone())
}

/// Move stock between two locations of the same item.
pub fn transfer_stock(
    dir: &mut StockDirectory,
    ctx: &MutationContext,
    cmd: &TransferStock,
) -> LedgerResult<(LedgerEntry, LedgerEntry)> {
    ensure_positive(cmd.quantity, "quantity")?;
    if cmd.from_location_id == cmd.to_location_id {
        return Err(LedgerError::invalid("transfer source and destination must differ"));
    }
    dir.apply_delta(cmd.item_id, cmd.from_location_id, -cmd.quantity)?;
    dir.apply_delta(cmd.item_id, cmd.to_location_id, cmd.quantity)?;
    LedgerEntry::transfer_pair(
        ctx,
        cmd.item_id,
        cmd.from_location_id,
        cmd.to_location_id,
        cmd.quantity,
        cmd.notes.clone(),
    )
}

/// Deduct spoiled/discarded stock, by default from the item's primary location.
pub fn record_waste(
    dir: &mut StockDirectory,
    ctx: &MutationContext,
    cmd: &RecordWaste,
) -> LedgerResult<LedgerEntry> {
    ensure_positive(cmd.quantity, "quantity")?;
    let reason = cmd.reason.trim();
    if reason.is_empty() {
        return Err(LedgerError::invalid("waste reason cannot be empty"));
    }
    let location_id = dir
        .resolve_location(cmd.item_id, cmd.location_id)?
        .ok_or_else(|| {
            LedgerError::invalid(format!("item {} has never been stocked", cmd.item_id))
        })?;

    dir.apply_delta(cmd.item_id, location_id, -cmd.quantity)?;

    let notes = match cmd.notes.as_deref().map(str::trim) {
        Some(extra) if !extra.is_empty() => format!("{reason}: {extra}"),
        _ => reason.to_string(),
    };
    LedgerEntry::record(
        ctx,
        cmd.item_id,
        location_id,
        EntryType::Waste,
        -cmd.quantity,
        Some(notes),
    )
}

const UNDO_PREFIX: &str = "undo waste ";

/// Notes prefix identifying the compensating entry of a waste entry.
pub fn undo_marker(waste_entry_id: EntryId) -> String {
    format!("{UNDO_PREFIX}{waste_entry_id}")
}

/// Whether `entry` is the compensating credit written by `undo_waste` for `waste`.
fn is_undo_of(entry: &LedgerEntry, waste: &LedgerEntry, marker: &str) -> bool {
    entry.entry_type == EntryType::ManualAdd
        && entry.item_id == waste.item_id
        && entry.location_id == waste.location_id
        && entry.quantity_change == -waste.quantity_change
        && entry.notes.as_deref().is_some_and(|n| {
            n.strip_prefix(marker)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with(" ("))
        })
}

/// Re-credit a waste entry at its original location.
///
/// `item_history` is the item's ledger, used to refuse a second undo.
pub fn undo_waste(
    dir: &mut StockDirectory,
    ctx: &MutationContext,
    waste: &LedgerEntry,
    item_history: &[LedgerEntry],
) -> LedgerResult<LedgerEntry> {
    if waste.tenant_id != ctx.tenant_id {
        return Err(LedgerError::UnknownEntry(waste.id));
    }
    if waste.entry_type != EntryType::Waste {
        return Err(LedgerError::invalid(format!(
            "entry {} is {}, not waste",
            waste.id, waste.entry_type
        )));
    }
    let marker = undo_marker(waste.id);
    let already_undone = item_history.iter().any(|e| is_undo_of(e, waste, &marker));
    if already_undone {
        return Err(LedgerError::invalid(format!("waste entry {} was already undone", waste.id)));
    }

    let restored = -waste.quantity_change;
    dir.apply_delta(waste.item_id, waste.location_id, restored)?;

    let notes = match waste.notes.as_deref() {
        Some(original) => format!("{marker} ({original})"),
        None => marker,
    };
    LedgerEntry::record(
        ctx,
        waste.item_id,
        waste.location_id,
        EntryType::ManualAdd,
        restored,
        Some(notes),
    )
}

/// A stock-take row that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedCount {
    pub item_id: ItemId,
    pub error: LedgerError,
}

/// What a stock take did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockTakeOutcome {
    /// One `stock_take_adjustment` per drifted (item, location).
    pub entries: Vec<LedgerEntry>,
    /// Counted and confirmed with no drift.
    pub unchanged: Vec<ItemId>,
    /// Only populated under `StockTakePolicy::PartialCommit`.
    pub rejected: Vec<RejectedCount>,
}

/// Reconcile declared counts against recorded balances.
///
/// Under `Atomic` the first rejected row fails the whole stock take; under
/// `PartialCommit` rejected rows are reported and the rest still apply.
pub fn stock_take(
    dir: &mut StockDirectory,
    ctx: &MutationContext,
    counts: &[StockCount],
    policy: StockTakePolicy,
) -> LedgerResult<StockTakeOutcome> {
    let mut outcome = StockTakeOutcome::default();
    let mut seen: HashSet<(ItemId, LocationId)> = HashSet::new();

    for count in counts {
        match reconcile_count(dir, ctx, count, &mut seen) {
            Ok(Some(entry)) => outcome.entries.push(entry),
            Ok(None) => outcome.unchanged.push(count.item_id),
            Err(error) => match policy {
                StockTakePolicy::Atomic => return Err(error),
                StockTakePolicy::PartialCommit => outcome.rejected.push(RejectedCount {
                    item_id: count.item_id,
                    error,
                }),
            },
        }
    }

    Ok(outcome)
}

fn reconcile_count(
    dir: &mut StockDirectory,
    ctx: &MutationContext,
    count: &StockCount,
    seen: &mut HashSet<(ItemId, LocationId)>,
) -> LedgerResult<Option<LedgerEntry>> {
    if count.declared_quantity < Decimal::ZERO {
        return Err(LedgerError::invalid(format!(
            "declared quantity for item {} cannot be negative",
            count.item_id
        )));
    }

    let Some(location_id) = dir.resolve_location(count.item_id, count.location_id)? else {
        // Never stocked anywhere: a zero count confirms that, anything else
        // needs an explicit location.
        if count.declared_quantity.is_zero() {
            return Ok(None);
        }
        return Err(LedgerError::invalid(format!(
            "item {} has no stock location; count it at an explicit location",
            count.item_id
        )));
    };

    if !seen.insert((count.item_id, location_id)) {
        return Err(LedgerError::invalid(format!(
            "item {} is counted twice at location {location_id}",
            count.item_id
        )));
    }

    let current = dir.get_balance(count.item_id, location_id);
    if count.declared_quantity == current {
        return Ok(None);
    }

    let diff = count.declared_quantity - current;
    dir.apply_delta(count.item_id, location_id, diff)?;
    LedgerEntry::record(
        ctx,
        count.item_id,
        location_id,
        EntryType::StockTakeAdjustment,
        diff,
        Some(format!("stock take: {current} -> {}", count.declared_quantity)),
    )
    .map(Some)
}
