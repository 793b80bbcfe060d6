//! Ledger service: the only entry point that mutates inventory.
//!
//! Every mutation runs the same pipeline:
//!
//! ```text
//! permission gate
//!   ↓
//! load versioned snapshot of the affected records (tenant-scoped)
//!   ↓
//! plan (pure: kitchen_inventory::operations / invoice)
//!   ↓
//! verify change set (balance writes agree with ledger entries)
//!   ↓
//! commit atomically with optimistic version checks
//!   ↓ conflict
//! reload and re-plan, up to `max_commit_retries`
//! ```
//!
//! Business rejections (`InsufficientStock`, ...) are returned on the first
//! attempt and never retried. Reads go straight to the store.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use tracing::{debug, error, info, info_span, warn};

use kitchen_auth::InventoryAuthorizer;
use kitchen_core::{CostRecordId, ItemId, LocationId, TenantId, Versioned};
use kitchen_inventory::invoice::{import_invoice, propose_matches};
use kitchen_inventory::operations::{
    adjust_stock, create_item, record_waste, stock_take, transfer_stock, undo_waste,
};
use kitchen_inventory::{
    reconstruct, verify_ledger, AdjustStock, ChangeSet, ConfirmedLine, CreateItem,
    ExtractedLineItem, HistoryQuery, ImportInvoice, IngredientCostRecord, InventoryItem,
    InventoryLocation, InventoryStore, InvoiceOutcome, LedgerEntry, LedgerError, LedgerResult,
    MatchDecision, MutationContext, ProposedMatch, RecordWaste, RejectedCount, StockCount,
    StockDirectory, StockMovementRow, StockTakeOutcome, StockTakePolicy, StoreError,
    SubmitStockTake, TransferStock, UndoWaste, WorkingSet,
};

use crate::config::LedgerConfig;

/// Orchestrates ledger mutations over an `InventoryStore`.
#[derive(Debug)]
pub struct LedgerService<S, A> {
    store: S,
    authorizer: A,
    config: LedgerConfig,
}

/// Planned state of one attempt, ready to commit.
struct Plan<R> {
    changes: ChangeSet,
    /// Items as loaded, for the pre-commit balance check.
    before: Vec<InventoryItem>,
    output: R,
}

impl<S, A> LedgerService<S, A> {
    pub fn new(store: S, authorizer: A, config: LedgerConfig) -> Self {
        Self {
            store,
            authorizer,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }
}

impl<S, A> LedgerService<S, A>
where
    S: InventoryStore,
    A: InventoryAuthorizer,
{
    fn ensure_can_mutate(&self, ctx: &MutationContext) -> LedgerResult<()> {
        if self.authorizer.can_mutate_inventory(ctx.user_id, ctx.tenant_id) {
            return Ok(());
        }
        warn!(user_id = %ctx.user_id, tenant_id = %ctx.tenant_id, "inventory mutation denied");
        Err(LedgerError::PermissionDenied {
            user_id: ctx.user_id,
            tenant_id: ctx.tenant_id,
        })
    }

    fn ensure_location(&self, tenant_id: TenantId, location_id: LocationId) -> LedgerResult<()> {
        match self.store.find_location(tenant_id, location_id)? {
            Some(_) => Ok(()),
            None => Err(LedgerError::UnknownLocation(location_id)),
        }
    }

    fn load_item(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
    ) -> LedgerResult<Versioned<InventoryItem>> {
        self.store
            .find_item(tenant_id, item_id)?
            .ok_or(LedgerError::UnknownItem(item_id))
    }

    /// Load one item into a fresh directory, remembering its pre-image.
    fn load_directory(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
    ) -> LedgerResult<(StockDirectory, Vec<InventoryItem>)> {
        let snapshot = self.load_item(tenant_id, item_id)?;
        let before = vec![snapshot.record.clone()];
        Ok((StockDirectory::from_snapshot([snapshot]), before))
    }

    /// Run `attempt` until its change set commits, a non-conflict error occurs,
    /// or retries run out.
    fn commit_with_retry<R>(
        &self,
        operation: &'static str,
        mut attempt: impl FnMut() -> LedgerResult<Plan<R>>,
    ) -> LedgerResult<R> {
        let max_retries = self.config.max_commit_retries;
        let mut retries = 0u32;

        loop {
            let plan = attempt()?;

            if let Err(err) = plan.changes.verify(&plan.before) {
                error!(operation, error = %err, "refusing to commit inconsistent change set");
                return Err(err);
            }

            let entries = plan.changes.entries.clone();
            match self.store.commit(plan.changes) {
                Ok(receipt) => {
                    for entry in &entries {
                        debug!(
                            operation,
                            entry_id = %entry.id,
                            item_id = %entry.item_id,
                            location_id = %entry.location_id,
                            entry_type = %entry.entry_type,
                            delta = %entry.quantity_change,
                            "delta applied"
                        );
                    }
                    debug!(
                        operation,
                        entries = receipt.entries_appended,
                        items = receipt.item_versions.len(),
                        "change set committed"
                    );
                    return Ok(plan.output);
                }
                Err(StoreError::Concurrency(msg)) if retries < max_retries => {
                    retries += 1;
                    warn!(operation, retry = retries, conflict = %msg, "commit conflict, retrying");
                }
                Err(err) => {
                    let err = LedgerError::from(err);
                    if matches!(err, LedgerError::LedgerIntegrityViolation(_)) {
                        error!(operation, error = %err, "store rejected ledger write");
                    } else if matches!(err, LedgerError::Concurrency(_)) {
                        warn!(operation, retries, "commit retries exhausted");
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Register a storage location for a team.
    pub fn register_location(
        &self,
        ctx: &MutationContext,
        name: impl Into<String>,
    ) -> LedgerResult<InventoryLocation> {
        self.ensure_can_mutate(ctx)?;
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(LedgerError::invalid("location name cannot be empty"));
        }
        let location = InventoryLocation::new(ctx.tenant_id, LocationId::new(), name);
        let saved = self.store.save_location(location)?;
        info!(tenant_id = %ctx.tenant_id, location_id = %saved.id, "location registered");
        Ok(saved)
    }

    pub fn locations(&self, tenant_id: TenantId) -> LedgerResult<Vec<InventoryLocation>> {
        Ok(self.store.list_locations(tenant_id)?)
    }

    /// Record a manually entered ingredient cost.
    pub fn register_cost_record(
        &self,
        ctx: &MutationContext,
        name: impl Into<String>,
        cost: Decimal,
        purchase_unit: impl Into<String>,
    ) -> LedgerResult<IngredientCostRecord> {
        self.ensure_can_mutate(ctx)?;
        let name = name.into().trim().to_string();
        let purchase_unit = purchase_unit.into().trim().to_string();
        if name.is_empty() || purchase_unit.is_empty() {
            return Err(LedgerError::invalid("cost record needs a name and a purchase unit"));
        }
        if cost < Decimal::ZERO {
            return Err(LedgerError::invalid("cost cannot be negative"));
        }

        let record = IngredientCostRecord::new(
            ctx.tenant_id,
            CostRecordId::new(),
            name,
            cost,
            purchase_unit,
        );
        let mut costs = WorkingSet::new();
        costs.insert_new(record.clone());

        self.commit_with_retry("register_cost_record", || {
            Ok(Plan {
                changes: ChangeSet::from_working(
                    ctx.tenant_id,
                    StockDirectory::new(),
                    costs.clone(),
                    Vec::new(),
                ),
                before: Vec::new(),
                output: record.clone(),
            })
        })
    }

    pub fn create_item(
        &self,
        ctx: &MutationContext,
        cmd: CreateItem,
    ) -> LedgerResult<InventoryItem> {
        let span = info_span!(
            "create_item",
            tenant_id = %ctx.tenant_id,
            user_id = %ctx.user_id,
            item_id = %cmd.item_id
        );
        let _guard = span.enter();

        self.ensure_can_mutate(ctx)?;
        if let Some(cost_id) = cmd.ingredient_cost_id {
            if self.store.find_cost_record(ctx.tenant_id, cost_id)?.is_none() {
                return Err(LedgerError::invalid(format!("unknown cost record {cost_id}")));
            }
        }

        let item = self.commit_with_retry("create_item", || {
            if self.store.find_item(ctx.tenant_id, cmd.item_id)?.is_some() {
                return Err(LedgerError::invalid(format!("item {} already exists", cmd.item_id)));
            }
            let item = create_item(ctx, &cmd)?;
            let mut dir = StockDirectory::new();
            dir.insert_new(item.clone())?;
            Ok(Plan {
                changes: ChangeSet::from_working(ctx.tenant_id, dir, WorkingSet::new(), Vec::new()),
                before: Vec::new(),
                output: item,
            })
        })?;

        info!(name = %item.name, "item created");
        Ok(item)
    }

    /// Manual add / subtract.
    pub fn adjust_stock(
        &self,
        ctx: &MutationContext,
        cmd: AdjustStock,
    ) -> LedgerResult<LedgerEntry> {
        let span = info_span!(
            "adjust_stock",
            tenant_id = %ctx.tenant_id,
            user_id = %ctx.user_id,
            item_id = %cmd.item_id,
            location_id = %cmd.location_id
        );
        let _guard = span.enter();

        self.ensure_can_mutate(ctx)?;
        self.ensure_location(ctx.tenant_id, cmd.location_id)?;

        self.commit_with_retry("adjust_stock", || {
            let (mut dir, before) = self.load_directory(ctx.tenant_id, cmd.item_id)?;
            let entry = adjust_stock(&mut dir, ctx, &cmd)?;
            Ok(Plan {
                changes: ChangeSet::from_working(
                    ctx.tenant_id,
                    dir,
                    WorkingSet::new(),
                    vec![entry.clone()],
                ),
                before,
                output: entry,
            })
        })
    }

    /// Move stock between two locations. Returns `(transfer_out, transfer_in)`.
    pub fn transfer_stock(
        &self,
        ctx: &MutationContext,
        cmd: TransferStock,
    ) -> LedgerResult<(LedgerEntry, LedgerEntry)> {
        let span = info_span!(
            "transfer_stock",
            tenant_id = %ctx.tenant_id,
            user_id = %ctx.user_id,
            item_id = %cmd.item_id,
            from = %cmd.from_location_id,
            to = %cmd.to_location_id
        );
        let _guard = span.enter();

        self.ensure_can_mutate(ctx)?;
        self.ensure_location(ctx.tenant_id, cmd.from_location_id)?;
        self.ensure_location(ctx.tenant_id, cmd.to_location_id)?;

        self.commit_with_retry("transfer_stock", || {
            let (mut dir, before) = self.load_directory(ctx.tenant_id, cmd.item_id)?;
            let (out, inbound) = transfer_stock(&mut dir, ctx, &cmd)?;
            Ok(Plan {
                changes: ChangeSet::from_working(
                    ctx.tenant_id,
                    dir,
                    WorkingSet::new(),
                    vec![out.clone(), inbound.clone()],
                ),
                before,
                output: (out, inbound),
            })
        })
    }

    pub fn record_waste(
        &self,
        ctx: &MutationContext,
        cmd: RecordWaste,
    ) -> LedgerResult<LedgerEntry> {
        let span = info_span!(
            "record_waste",
            tenant_id = %ctx.tenant_id,
            user_id = %ctx.user_id,
            item_id = %cmd.item_id
        );
        let _guard = span.enter();

        self.ensure_can_mutate(ctx)?;
        if let Some(location_id) = cmd.location_id {
            self.ensure_location(ctx.tenant_id, location_id)?;
        }

        self.commit_with_retry("record_waste", || {
            let (mut dir, before) = self.load_directory(ctx.tenant_id, cmd.item_id)?;
            let entry = record_waste(&mut dir, ctx, &cmd)?;
            Ok(Plan {
                changes: ChangeSet::from_working(
                    ctx.tenant_id,
                    dir,
                    WorkingSet::new(),
                    vec![entry.clone()],
                ),
                before,
                output: entry,
            })
        })
    }

    /// Append a compensating `manual_add` for a waste entry.
    pub fn undo_waste(&self, ctx: &MutationContext, cmd: UndoWaste) -> LedgerResult<LedgerEntry> {
        let span = info_span!(
            "undo_waste",
            tenant_id = %ctx.tenant_id,
            user_id = %ctx.user_id,
            waste_entry_id = %cmd.waste_entry_id
        );
        let _guard = span.enter();

        self.ensure_can_mutate(ctx)?;

        self.commit_with_retry("undo_waste", || {
            let waste = self
                .store
                .find_entry(ctx.tenant_id, cmd.waste_entry_id)?
                .ok_or(LedgerError::UnknownEntry(cmd.waste_entry_id))?;
            let (mut dir, before) = self.load_directory(ctx.tenant_id, waste.item_id)?;
            let history = self.store.entries_for_item(ctx.tenant_id, waste.item_id)?;
            let entry = undo_waste(&mut dir, ctx, &waste, &history)?;
            Ok(Plan {
                changes: ChangeSet::from_working(
                    ctx.tenant_id,
                    dir,
                    WorkingSet::new(),
                    vec![entry.clone()],
                ),
                before,
                output: entry,
            })
        })
    }

    /// Reconcile physical counts. `cmd.policy` falls back to the configured default.
    pub fn submit_stock_take(
        &self,
        ctx: &MutationContext,
        cmd: SubmitStockTake,
    ) -> LedgerResult<StockTakeOutcome> {
        let policy = cmd.policy.unwrap_or(self.config.stock_take_policy);
        let span = info_span!(
            "submit_stock_take",
            tenant_id = %ctx.tenant_id,
            user_id = %ctx.user_id,
            counts = cmd.counts.len(),
            ?policy
        );
        let _guard = span.enter();

        self.ensure_can_mutate(ctx)?;

        // Explicit locations are checked up front; rows at unknown locations
        // abort (atomic) or are rejected (partial).
        let mut counts: Vec<StockCount> = Vec::with_capacity(cmd.counts.len());
        let mut early_rejects: Vec<RejectedCount> = Vec::new();
        for count in cmd.counts {
            if let Some(location_id) = count.location_id {
                if let Err(error) = self.ensure_location(ctx.tenant_id, location_id) {
                    match policy {
                        StockTakePolicy::Atomic => return Err(error),
                        StockTakePolicy::PartialCommit => {
                            early_rejects.push(RejectedCount {
                                item_id: count.item_id,
                                error,
                            });
                            continue;
                        }
                    }
                }
            }
            counts.push(count);
        }

        let mut outcome = self.commit_with_retry("submit_stock_take", || {
            let item_ids: BTreeSet<ItemId> = counts.iter().map(|c| c.item_id).collect();
            let mut snapshots = Vec::with_capacity(item_ids.len());
            for item_id in item_ids {
                // Unknown items stay out of the directory and are rejected by the planner.
                if let Some(snapshot) = self.store.find_item(ctx.tenant_id, item_id)? {
                    snapshots.push(snapshot);
                }
            }
            let before = snapshots.iter().map(|s| s.record.clone()).collect();
            let mut dir = StockDirectory::from_snapshot(snapshots);

            let outcome = stock_take(&mut dir, ctx, &counts, policy)?;
            Ok(Plan {
                changes: ChangeSet::from_working(
                    ctx.tenant_id,
                    dir,
                    WorkingSet::new(),
                    outcome.entries.clone(),
                ),
                before,
                output: outcome,
            })
        })?;

        early_rejects.append(&mut outcome.rejected);
        outcome.rejected = early_rejects;
        for rejected in &outcome.rejected {
            warn!(item_id = %rejected.item_id, error = %rejected.error, "stock take row rejected");
        }
        info!(
            adjusted = outcome.entries.len(),
            unchanged = outcome.unchanged.len(),
            rejected = outcome.rejected.len(),
            "stock take reconciled"
        );
        Ok(outcome)
    }

    /// Naive first-match proposal for review; writes nothing.
    pub fn propose_invoice_matches(
        &self,
        tenant_id: TenantId,
        lines: &[ExtractedLineItem],
    ) -> LedgerResult<Vec<ProposedMatch>> {
        let items: Vec<InventoryItem> = self
            .store
            .list_items(tenant_id)?
            .into_iter()
            .map(Versioned::into_record)
            .collect();
        Ok(propose_matches(lines, &items))
    }

    /// Commit reviewed invoice lines as one batch.
    pub fn import_invoice(
        &self,
        ctx: &MutationContext,
        cmd: ImportInvoice,
    ) -> LedgerResult<InvoiceOutcome> {
        let span = info_span!(
            "import_invoice",
            tenant_id = %ctx.tenant_id,
            user_id = %ctx.user_id,
            location_id = %cmd.location_id,
            lines = cmd.lines.len()
        );
        let _guard = span.enter();

        self.ensure_can_mutate(ctx)?;
        self.ensure_location(ctx.tenant_id, cmd.location_id)?;

        let outcome = self.commit_with_retry("import_invoice", || {
            let new_ids: BTreeSet<ItemId> = cmd
                .lines
                .iter()
                .filter_map(|line| match line.decision {
                    MatchDecision::New(id) => Some(id),
                    MatchDecision::Existing(_) => None,
                })
                .collect();
            for item_id in new_ids {
                if self.store.find_item(ctx.tenant_id, item_id)?.is_some() {
                    return Err(LedgerError::invalid(format!("item {item_id} already exists")));
                }
            }

            let item_ids: BTreeSet<ItemId> = cmd
                .lines
                .iter()
                .filter_map(|line| match line.decision {
                    MatchDecision::Existing(id) => Some(id),
                    MatchDecision::New(_) => None,
                })
                .collect();
            let mut snapshots = Vec::with_capacity(item_ids.len());
            for item_id in item_ids {
                match self.store.find_item(ctx.tenant_id, item_id)? {
                    Some(snapshot) => snapshots.push(snapshot),
                    // May be created by an earlier line of this invoice.
                    None if cmd
                        .lines
                        .iter()
                        .any(|l| l.decision == MatchDecision::New(item_id)) => {}
                    None => return Err(LedgerError::UnknownItem(item_id)),
                }
            }
            self.plan_invoice(ctx, snapshots, &cmd)
        })?;

        log_invoice(&outcome);
        Ok(outcome)
    }

    /// Propose and import in one call, accepting every proposal as-is.
    pub fn import_invoice_auto(
        &self,
        ctx: &MutationContext,
        location_id: LocationId,
        lines: Vec<ExtractedLineItem>,
        reference: Option<String>,
    ) -> LedgerResult<InvoiceOutcome> {
        let span = info_span!(
            "import_invoice_auto",
            tenant_id = %ctx.tenant_id,
            user_id = %ctx.user_id,
            location_id = %location_id,
            lines = lines.len()
        );
        let _guard = span.enter();

        self.ensure_can_mutate(ctx)?;
        self.ensure_location(ctx.tenant_id, location_id)?;

        let outcome = self.commit_with_retry("import_invoice_auto", || {
            let snapshots = self.store.list_items(ctx.tenant_id)?;
            let items: Vec<InventoryItem> = snapshots.iter().map(|s| s.record.clone()).collect();
            let cmd = ImportInvoice {
                location_id,
                lines: propose_matches(&lines, &items)
                    .into_iter()
                    .map(ConfirmedLine::from)
                    .collect(),
                reference: reference.clone(),
            };
            self.plan_invoice(ctx, snapshots, &cmd)
        })?;

        log_invoice(&outcome);
        Ok(outcome)
    }

    fn plan_invoice(
        &self,
        ctx: &MutationContext,
        snapshots: Vec<Versioned<InventoryItem>>,
        cmd: &ImportInvoice,
    ) -> LedgerResult<Plan<InvoiceOutcome>> {
        let mut costs = WorkingSet::new();
        for snapshot in &snapshots {
            if let Some(cost_id) = snapshot.record.ingredient_cost_id {
                if let Some(record) = self.store.find_cost_record(ctx.tenant_id, cost_id)? {
                    costs.load(record);
                }
            }
        }
        let before = snapshots.iter().map(|s| s.record.clone()).collect();
        let mut dir = StockDirectory::from_snapshot(snapshots);

        let outcome = import_invoice(&mut dir, &mut costs, ctx, cmd)?;
        Ok(Plan {
            changes: ChangeSet::from_working(ctx.tenant_id, dir, costs, outcome.entries.clone()),
            before,
            output: outcome,
        })
    }

    pub fn item(&self, tenant_id: TenantId, item_id: ItemId) -> LedgerResult<InventoryItem> {
        Ok(self.load_item(tenant_id, item_id)?.into_record())
    }

    pub fn items(&self, tenant_id: TenantId) -> LedgerResult<Vec<InventoryItem>> {
        Ok(self
            .store
            .list_items(tenant_id)?
            .into_iter()
            .map(Versioned::into_record)
            .collect())
    }

    pub fn cost_record(
        &self,
        tenant_id: TenantId,
        cost_id: CostRecordId,
    ) -> LedgerResult<Option<IngredientCostRecord>> {
        Ok(self
            .store
            .find_cost_record(tenant_id, cost_id)?
            .map(Versioned::into_record))
    }

    /// Current balance; zero when the item was never stocked there.
    pub fn get_balance(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
        location_id: LocationId,
    ) -> LedgerResult<Decimal> {
        Ok(self
            .store
            .find_item(tenant_id, item_id)?
            .map_or(Decimal::ZERO, |item| item.record.balance(location_id)))
    }

    /// The item's ledger, in commit order.
    pub fn item_history(
        &self,
        tenant_id: TenantId,
        item_id: ItemId,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        self.load_item(tenant_id, item_id)?;
        Ok(self.store.entries_for_item(tenant_id, item_id)?)
    }

    /// Items at or below their reorder point across all locations.
    pub fn low_stock(&self, tenant_id: TenantId) -> LedgerResult<Vec<InventoryItem>> {
        Ok(self
            .items(tenant_id)?
            .into_iter()
            .filter(InventoryItem::is_low_stock)
            .collect())
    }

    /// Stock movement report, replayed from a ledger snapshot.
    pub fn stock_report(
        &self,
        tenant_id: TenantId,
        query: &HistoryQuery,
    ) -> LedgerResult<Vec<StockMovementRow>> {
        let items = self.items(tenant_id)?;
        let ledger = self.store.ledger_snapshot(tenant_id)?;
        let rows = reconstruct(&items, &ledger, query);
        debug!(%tenant_id, entries = ledger.len(), rows = rows.len(), "stock report built");
        Ok(rows)
    }

    /// Check transfer pairing across the whole ledger of a team.
    pub fn verify_ledger(&self, tenant_id: TenantId) -> LedgerResult<()> {
        let ledger = self.store.ledger_snapshot(tenant_id)?;
        verify_ledger(&ledger).inspect_err(|err| {
            error!(%tenant_id, error = %err, "ledger verification failed");
        })
    }
}

fn log_invoice(outcome: &InvoiceOutcome) {
    info!(
        lines = outcome.entries.len(),
        created_items = outcome.created_items.len(),
        created_cost_records = outcome.created_cost_records.len(),
        updated_cost_records = outcome.updated_cost_records.len(),
        "invoice imported"
    );
}
