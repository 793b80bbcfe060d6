//! The immutable ledger entry and its validation rules.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use kitchen_core::{EntryId, Entity, ItemId, LocationId, TenantId, UserId};

use crate::command::MutationContext;
use crate::error::{LedgerError, LedgerResult};

/// Maximum timestamp skew tolerated between the two halves of a transfer.
pub const TRANSFER_EPSILON_MS: i64 = 1_000;

/// Kind of stock mutation an entry records.
///
/// The label is informational; the sign of `quantity_change` alone decides
/// whether stock came in or went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    ManualAdd,
    ManualSubtract,
    TransferOut,
    TransferIn,
    StockTakeAdjustment,
    Waste,
    InvoiceImport,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::ManualAdd => "manual_add",
            EntryType::ManualSubtract => "manual_subtract",
            EntryType::TransferOut => "transfer_out",
            EntryType::TransferIn => "transfer_in",
            EntryType::StockTakeAdjustment => "stock_take_adjustment",
            EntryType::Waste => "waste",
            EntryType::InvoiceImport => "invoice_import",
        }
    }

    /// `Some(true)` inbound only, `Some(false)` outbound only, `None` either way.
    fn inbound(&self) -> Option<bool> {
        match self {
            EntryType::ManualAdd | EntryType::TransferIn | EntryType::InvoiceImport => Some(true),
            EntryType::ManualSubtract | EntryType::TransferOut | EntryType::Waste => Some(false),
            EntryType::StockTakeAdjustment => None,
        }
    }

    pub fn is_transfer(&self) -> bool {
        matches!(self, EntryType::TransferOut | EntryType::TransferIn)
    }
}

impl core::fmt::Display for EntryType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One quantity change to one item at one location. Never updated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub item_id: ItemId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    /// Positive for inbound, negative for outbound.
    pub quantity_change: Decimal,
    pub location_id: LocationId,
    pub related_entry_id: Option<EntryId>,
    pub notes: Option<String>,
}

impl LedgerEntry {
    /// Build and validate a non-transfer entry.
    pub fn record(
        ctx: &MutationContext,
        item_id: ItemId,
        location_id: LocationId,
        entry_type: EntryType,
        quantity_change: Decimal,
        notes: Option<String>,
    ) -> LedgerResult<Self> {
        if entry_type.is_transfer() {
            return Err(LedgerError::invalid("transfer entries are recorded as a pair"));
        }
        let entry = Self {
            id: EntryId::new(),
            item_id,
            tenant_id: ctx.tenant_id,
            user_id: ctx.user_id,
            timestamp: ctx.occurred_at,
            entry_type,
            quantity_change,
            location_id,
            related_entry_id: None,
            notes,
        };
        entry.validate()?;
        Ok(entry)
    }

    /// Build both halves of a transfer, cross-linked through `related_entry_id`.
    pub fn transfer_pair(
        ctx: &MutationContext,
        item_id: ItemId,
        from: LocationId,
        to: LocationId,
        quantity: Decimal,
        notes: Option<String>,
    ) -> LedgerResult<(Self, Self)> {
        let out_id = EntryId::new();
        let in_id = EntryId::new();
        let out = Self {
            id: out_id,
            item_id,
            tenant_id: ctx.tenant_id,
            user_id: ctx.user_id,
            timestamp: ctx.occurred_at,
            entry_type: EntryType::TransferOut,
            quantity_change: -quantity,
            location_id: from,
            related_entry_id: Some(in_id),
            notes: notes.clone(),
        };
        let inbound = Self {
            id: in_id,
            entry_type: EntryType::TransferIn,
            quantity_change: quantity,
            location_id: to,
            related_entry_id: Some(out_id),
            ..out.clone()
        };
        out.validate()?;
        inbound.validate()?;
        verify_transfer_pair(&out, &inbound)?;
        Ok((out, inbound))
    }

    /// Structural rules every stored entry satisfies.
    pub fn validate(&self) -> LedgerResult<()> {
        if self.quantity_change.is_zero() {
            return Err(LedgerError::invalid(format!(
                "{} entry cannot have a zero quantity change",
                self.entry_type
            )));
        }
        let positive = self.quantity_change > Decimal::ZERO;
        if let Some(inbound) = self.entry_type.inbound() {
            if inbound != positive {
                return Err(LedgerError::invalid(format!(
                    "{} entry has the wrong sign ({})",
                    self.entry_type, self.quantity_change
                )));
            }
        }
        match (self.entry_type.is_transfer(), self.related_entry_id) {
            (true, None) => Err(LedgerError::invalid("transfer entry is missing its pair link")),
            (false, Some(_)) => Err(LedgerError::invalid(format!(
                "{} entry cannot link to another entry",
                self.entry_type
            ))),
            _ => Ok(()),
        }
    }

    pub fn is_inbound(&self) -> bool {
        self.quantity_change > Decimal::ZERO
    }
}

impl Entity for LedgerEntry {
    type Id = EntryId;

    fn id(&self) -> EntryId {
        self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Check that `out` and `inbound` form one consistent transfer.
pub fn verify_transfer_pair(out: &LedgerEntry, inbound: &LedgerEntry) -> LedgerResult<()> {
    if out.entry_type != EntryType::TransferOut || inbound.entry_type != EntryType::TransferIn {
        return Err(LedgerError::integrity(format!(
            "entries {} / {} are not a transfer_out / transfer_in pair",
            out.id, inbound.id
        )));
    }
    if out.related_entry_id != Some(inbound.id) || inbound.related_entry_id != Some(out.id) {
        return Err(LedgerError::integrity(format!(
            "transfer entries {} / {} do not reference each other",
            out.id, inbound.id
        )));
    }
    if out.item_id != inbound.item_id || out.tenant_id != inbound.tenant_id {
        return Err(LedgerError::integrity(format!(
            "transfer entries {} / {} belong to different items",
            out.id, inbound.id
        )));
    }
    if out.quantity_change != -inbound.quantity_change {
        return Err(LedgerError::integrity(format!(
            "transfer deltas do not cancel ({} vs {})",
            out.quantity_change, inbound.quantity_change
        )));
    }
    let skew_ms = (out.timestamp - inbound.timestamp).num_milliseconds().abs();
    if skew_ms > TRANSFER_EPSILON_MS {
        return Err(LedgerError::integrity(format!(
            "transfer entries {} / {} are {skew_ms}ms apart",
            out.id, inbound.id
        )));
    }
    Ok(())
}

/// Check the transfer pairing of a whole ledger: every transfer half has
/// exactly one partner, and each pair verifies.
pub fn verify_ledger(entries: &[LedgerEntry]) -> LedgerResult<()> {
    let by_id: HashMap<EntryId, &LedgerEntry> = entries.iter().map(|e| (e.id, e)).collect();
    if by_id.len() != entries.len() {
        return Err(LedgerError::integrity("duplicate ledger entry ids"));
    }

    let mut inbound_claims: HashMap<EntryId, EntryId> = HashMap::new();
    for entry in entries.iter().filter(|e| e.entry_type == EntryType::TransferOut) {
        let partner_id = entry.related_entry_id.ok_or_else(|| {
            LedgerError::integrity(format!("transfer_out {} has no partner", entry.id))
        })?;
        let partner = by_id.get(&partner_id).ok_or_else(|| {
            LedgerError::integrity(format!(
                "transfer_out {} references missing entry {partner_id}",
                entry.id
            ))
        })?;
        verify_transfer_pair(entry, partner)?;
        if let Some(previous) = inbound_claims.insert(partner_id, entry.id) {
            return Err(LedgerError::integrity(format!(
                "transfer_in {partner_id} is claimed by both {previous} and {}",
                entry.id
            )));
        }
    }

    for entry in entries.iter().filter(|e| e.entry_type == EntryType::TransferIn) {
        if !inbound_claims.contains_key(&entry.id) {
            return Err(LedgerError::integrity(format!(
                "transfer_in {} has no matching transfer_out",
                entry.id
            )));
        }
    }

    Ok(())
}
