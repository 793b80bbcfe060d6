//! Invoice reconciliation: merge extracted invoice lines into stock.
//!
//! Matching is deliberately naive: a case-insensitive, bidirectional substring
//! test against the known items, scanned in order, first hit wins. A reviewer
//! can override any proposal before the import is committed.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use kitchen_core::{CostRecordId, ItemId, LocationId};

use crate::command::{ensure_positive, MutationContext};
use crate::directory::StockDirectory;
use crate::entry::{EntryType, LedgerEntry};
use crate::error::{LedgerError, LedgerResult};
use crate::item::{IngredientCostRecord, InventoryItem};
use crate::working_set::WorkingSet;

/// One line item produced by the upstream document extraction.
///
/// Untrusted: validated before use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedLineItem {
    pub item_name: String,
    pub quantity: Decimal,
    pub unit: String,
    pub unit_price: Decimal,
}

impl ExtractedLineItem {
    pub fn validate(&self) -> LedgerResult<()> {
        if self.item_name.trim().is_empty() {
            return Err(LedgerError::invalid("invoice line has an empty item name"));
        }
        ensure_positive(self.quantity, "invoice line quantity")?;
        if self.unit.trim().is_empty() {
            return Err(LedgerError::invalid(format!(
                "invoice line '{}' has no unit",
                self.item_name
            )));
        }
        if self.unit_price < Decimal::ZERO {
            return Err(LedgerError::invalid(format!(
                "invoice line '{}' has a negative unit price",
                self.item_name
            )));
        }
        Ok(())
    }
}

/// Where an invoice line goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "item_id")]
pub enum MatchDecision {
    /// Merge into this item (pre-existing, or created by an earlier line of the same invoice).
    Existing(ItemId),
    /// Create a new item under this pre-allocated id.
    New(ItemId),
}

impl MatchDecision {
    pub fn item_id(&self) -> ItemId {
        match self {
            MatchDecision::Existing(id) | MatchDecision::New(id) => *id,
        }
    }
}

/// Matcher output for one line, shown to a reviewer before commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedMatch {
    pub line: ExtractedLineItem,
    pub decision: MatchDecision,
    /// Name of the item the line was matched to, if any.
    pub matched_name: Option<String>,
}

/// Case-insensitive bidirectional containment.
pub fn names_match(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(&b) || b.contains(&a)
}

/// First item (in scan order) whose name matches.
pub fn find_match<'a>(
    name: &str,
    items: impl IntoIterator<Item = &'a InventoryItem>,
) -> Option<&'a InventoryItem> {
    items.into_iter().find(|item| names_match(name, &item.name))
}

/// Propose a decision per line.
///
/// Lines are scanned in order against `items`, then against the lines already
/// proposed as new in this invoice, so a repeated product lands on one new item.
pub fn propose_matches(lines: &[ExtractedLineItem], items: &[InventoryItem]) -> Vec<ProposedMatch> {
    let mut pending_new: Vec<(ItemId, String)> = Vec::new();
    let mut proposals = Vec::with_capacity(lines.len());

    for line in lines {
        let proposal = if let Some(item) = find_match(&line.item_name, items) {
            ProposedMatch {
                line: line.clone(),
                decision: MatchDecision::Existing(item.id),
                matched_name: Some(item.name.clone()),
            }
        } else if let Some((id, name)) = pending_new
            .iter()
            .find(|(_, name)| names_match(&line.item_name, name))
        {
            ProposedMatch {
                line: line.clone(),
                decision: MatchDecision::Existing(*id),
                matched_name: Some(name.clone()),
            }
        } else {
            let id = ItemId::new();
            pending_new.push((id, line.item_name.trim().to_string()));
            ProposedMatch {
                line: line.clone(),
                decision: MatchDecision::New(id),
                matched_name: None,
            }
        };
        proposals.push(proposal);
    }

    proposals
}

/// A reviewed line ready to import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedLine {
    pub line: ExtractedLineItem,
    pub decision: MatchDecision,
}

impl From<ProposedMatch> for ConfirmedLine {
    fn from(value: ProposedMatch) -> Self {
        Self {
            line: value.line,
            decision: value.decision,
        }
    }
}

/// Command: ImportInvoice. All lines land in one target location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportInvoice {
    pub location_id: LocationId,
    pub lines: Vec<ConfirmedLine>,
    /// Supplier invoice number or similar, copied into entry notes.
    pub reference: Option<String>,
}

/// What an invoice import did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvoiceOutcome {
    /// One `invoice_import` entry per line, in line order.
    pub entries: Vec<LedgerEntry>,
    pub created_items: Vec<ItemId>,
    pub created_cost_records: Vec<CostRecordId>,
    pub updated_cost_records: Vec<CostRecordId>,
}

/// Apply every confirmed line to the working sets. Any bad line fails the
/// whole invoice; the caller then drops both working sets.
///
/// `costs` must already hold the cost records linked to every `Existing` item.
pub fn import_invoice(
    dir: &mut StockDirectory,
    costs: &mut WorkingSet<IngredientCostRecord>,
    ctx: &MutationContext,
    cmd: &ImportInvoice,
) -> LedgerResult<InvoiceOutcome> {
    if cmd.lines.is_empty() {
        return Err(LedgerError::invalid("invoice has no lines"));
    }
    for confirmed in &cmd.lines {
        confirmed.line.validate()?;
    }

    let notes = cmd
        .reference
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(|r| format!("invoice {r}"));
    let mut outcome = InvoiceOutcome::default();

    for confirmed in &cmd.lines {
        let line = &confirmed.line;
        let item_id = match confirmed.decision {
            MatchDecision::Existing(item_id) => {
                dir.item(item_id)?;
                refresh_cost(dir, costs, ctx, item_id, line, &mut outcome)?;
                item_id
            }
            MatchDecision::New(item_id) => {
                let cost = IngredientCostRecord::new(
                    ctx.tenant_id,
                    CostRecordId::new(),
                    line.item_name.trim(),
                    line.unit_price,
                    line.unit.trim(),
                );
                let item = InventoryItem::new(
                    ctx.tenant_id,
                    item_id,
                    line.item_name.as_str(),
                    line.unit.as_str(),
                    Decimal::ZERO,
                )?
                .with_cost_record(cost.id);
                dir.insert_new(item)?;
                outcome.created_items.push(item_id);
                outcome.created_cost_records.push(cost.id);
                costs.insert_new(cost);
                item_id
            }
        };

        dir.apply_delta(item_id, cmd.location_id, line.quantity)?;
        outcome.entries.push(LedgerEntry::record(
            ctx,
            item_id,
            cmd.location_id,
            EntryType::InvoiceImport,
            line.quantity,
            notes.clone(),
        )?);
    }

    Ok(outcome)
}

/// Last write wins: the newest invoice price replaces the stored one.
fn refresh_cost(
    dir: &mut StockDirectory,
    costs: &mut WorkingSet<IngredientCostRecord>,
    ctx: &MutationContext,
    item_id: ItemId,
    line: &ExtractedLineItem,
    outcome: &mut InvoiceOutcome,
) -> LedgerResult<()> {
    let linked = dir.item(item_id)?.ingredient_cost_id;
    match linked.filter(|id| costs.contains(id)) {
        Some(cost_id) => {
            costs
                .update(&cost_id, |record| {
                    record.cost = line.unit_price;
                    record.purchase_unit = line.unit.trim().to_string();
                    Ok::<(), LedgerError>(())
                })
                .unwrap_or(Ok(()))?;
            if !outcome.updated_cost_records.contains(&cost_id)
                && !outcome.created_cost_records.contains(&cost_id)
            {
                outcome.updated_cost_records.push(cost_id);
            }
        }
        None => {
            // Item had no (reachable) cost record yet: start one from this invoice.
            let name = dir.item(item_id)?.name.clone();
            let cost = IngredientCostRecord::new(
                ctx.tenant_id,
                CostRecordId::new(),
                name,
                line.unit_price,
                line.unit.trim(),
            );
            dir.link_cost_record(item_id, cost.id)?;
            outcome.created_cost_records.push(cost.id);
            costs.insert_new(cost);
        }
    }
    Ok(())
}
