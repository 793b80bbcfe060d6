//! Integration tests for the full ledger pipeline.
//!
//! Tests: LedgerService → planners → InMemoryInventoryStore → reports
//!
//! Verifies:
//! - every mutation commits balances and entries together or not at all
//! - transfers conserve stock and pair their entries
//! - reports replayed from the ledger agree with current balances
//! - the permission gate runs before any state is touched
//! - optimistic conflicts are retried and concurrent writers never oversell

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use kitchen_auth::{AllowAll, MembershipAuthorizer, Permission, TenantMembership};
    use kitchen_core::{CostRecordId, EntryId, ItemId, LocationId, TenantId, UserId, Versioned};
    use kitchen_inventory::{
        AdjustStock, ChangeSet, CommitReceipt, ConfirmedLine, CreateItem, Direction, EntryType,
        ExtractedLineItem, HistoryQuery, ImportInvoice, IngredientCostRecord, InventoryItem,
        InventoryLocation, InventoryStore, LedgerEntry, LedgerError, MatchDecision,
        MutationContext, RecordWaste, StockCount, StockTakePolicy, StoreError, SubmitStockTake,
        TransferStock, UndoWaste,
    };

    use crate::config::LedgerConfig;
    use crate::ledger_service::LedgerService;
    use crate::store::InMemoryInventoryStore;

    type Service = LedgerService<Arc<InMemoryInventoryStore>, AllowAll>;

    struct Kitchen {
        service: Service,
        tenant_id: TenantId,
        user_id: UserId,
        a: LocationId,
        b: LocationId,
    }

    impl Kitchen {
        fn new() -> Self {
            Self::with_config(LedgerConfig::default())
        }

        fn with_config(config: LedgerConfig) -> Self {
            let service =
                LedgerService::new(Arc::new(InMemoryInventoryStore::new()), AllowAll, config);
            let tenant_id = TenantId::new();
            let user_id = UserId::new();
            let ctx = MutationContext::now(tenant_id, user_id);
            let a = service.register_location(&ctx, "Walk-in").unwrap().id;
            let b = service.register_location(&ctx, "Dry store").unwrap().id;
            Self {
                service,
                tenant_id,
                user_id,
                a,
                b,
            }
        }

        fn ctx(&self) -> MutationContext {
            MutationContext::now(self.tenant_id, self.user_id)
        }

        fn at(&self, at: DateTime<Utc>) -> MutationContext {
            MutationContext::new(self.tenant_id, self.user_id, at)
        }

        fn item(&self, name: &str) -> ItemId {
            let cmd = CreateItem {
                item_id: ItemId::new(),
                name: name.to_string(),
                unit: "kg".to_string(),
                reorder_point: dec!(1),
                ingredient_cost_id: None,
            };
            self.service.create_item(&self.ctx(), cmd).unwrap().id
        }

        fn add(&self, item_id: ItemId, location_id: LocationId, quantity: Decimal) -> LedgerEntry {
            self.service
                .adjust_stock(
                    &self.ctx(),
                    AdjustStock {
                        item_id,
                        location_id,
                        quantity,
                        direction: Direction::Add,
                        notes: None,
                    },
                )
                .unwrap()
        }

        fn balance(&self, item_id: ItemId, location_id: LocationId) -> Decimal {
            self.service
                .get_balance(self.tenant_id, item_id, location_id)
                .unwrap()
        }

        fn ledger(&self) -> Vec<LedgerEntry> {
            self.service.store().ledger_snapshot(self.tenant_id).unwrap()
        }
    }

    fn whole_history() -> HistoryQuery {
        HistoryQuery::between(
            Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn tomatoes_scenario_reports_match_directory() {
        let k = Kitchen::new();
        let tomatoes = k.item("Tomatoes");
        let day = |d| Utc.with_ymd_and_hms(2026, 5, d, 9, 0, 0).unwrap();

        k.service
            .adjust_stock(
                &k.at(day(1)),
                AdjustStock {
                    item_id: tomatoes,
                    location_id: k.a,
                    quantity: dec!(10),
                    direction: Direction::Add,
                    notes: None,
                },
            )
            .unwrap();
        assert_eq!(k.balance(tomatoes, k.a), dec!(10));

        k.service
            .transfer_stock(
                &k.at(day(2)),
                TransferStock {
                    item_id: tomatoes,
                    from_location_id: k.a,
                    to_location_id: k.b,
                    quantity: dec!(4),
                    notes: None,
                },
            )
            .unwrap();
        assert_eq!(k.balance(tomatoes, k.a), dec!(6));
        assert_eq!(k.balance(tomatoes, k.b), dec!(4));

        let waste = k
            .service
            .record_waste(
                &k.at(day(3)),
                RecordWaste {
                    item_id: tomatoes,
                    quantity: dec!(6),
                    reason: "spoiled".to_string(),
                    notes: None,
                    location_id: None,
                },
            )
            .unwrap();
        assert_eq!(waste.location_id, k.a);
        assert_eq!(waste.notes.as_deref(), Some("spoiled"));
        assert_eq!(k.balance(tomatoes, k.a), dec!(0));

        let outcome = k
            .service
            .submit_stock_take(
                &k.at(day(4)),
                SubmitStockTake {
                    counts: vec![StockCount {
                        item_id: tomatoes,
                        declared_quantity: dec!(2),
                        location_id: None,
                    }],
                    policy: None,
                },
            )
            .unwrap();
        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(outcome.entries[0].entry_type, EntryType::StockTakeAdjustment);
        assert_eq!(outcome.entries[0].quantity_change, dec!(2));
        assert_eq!(k.balance(tomatoes, k.a), dec!(2));

        let at_a = whole_history().with_locations([k.a]);
        let rows = k.service.stock_report(k.tenant_id, &at_a).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].item_name, "Tomatoes");
        assert_eq!(rows[0].unit, "kg");
        assert_eq!(rows[0].start_stock, dec!(0));
        assert_eq!(rows[0].total_in, dec!(12));
        assert_eq!(rows[0].total_out, dec!(10));
        assert_eq!(rows[0].end_stock, dec!(2));

        let at_b = whole_history().with_locations([k.b]);
        let rows = k.service.stock_report(k.tenant_id, &at_b).unwrap();
        assert_eq!(rows[0].end_stock, dec!(4));

        let later = HistoryQuery::for_days(
            day(3).date_naive(),
            day(4).date_naive(),
        )
        .unwrap()
        .with_locations([k.a]);
        let rows = k.service.stock_report(k.tenant_id, &later).unwrap();
        assert_eq!(rows[0].start_stock, dec!(6));
        assert_eq!(rows[0].total_in, dec!(2));
        assert_eq!(rows[0].total_out, dec!(6));
        assert_eq!(rows[0].end_stock, dec!(2));

        k.service.verify_ledger(k.tenant_id).unwrap();
    }

    #[test]
    fn reporting_is_idempotent() {
        let k = Kitchen::new();
        let flour = k.item("Flour");
        k.add(flour, k.a, dec!(25));
        k.add(flour, k.b, dec!(5));

        let query = whole_history();
        let first = k.service.stock_report(k.tenant_id, &query).unwrap();
        let second = k.service.stock_report(k.tenant_id, &query).unwrap();
        assert_eq!(first, second);
        assert_eq!(k.balance(flour, k.a), dec!(25));
    }

    #[test]
    fn undo_waste_restores_balance_and_keeps_both_entries() {
        let k = Kitchen::new();
        let milk = k.item("Milk");
        k.add(milk, k.a, dec!(8));

        let waste = k
            .service
            .record_waste(
                &k.ctx(),
                RecordWaste {
                    item_id: milk,
                    quantity: dec!(3),
                    reason: "expired".to_string(),
                    notes: Some("back of shelf".to_string()),
                    location_id: None,
                },
            )
            .unwrap();
        assert_eq!(k.balance(milk, k.a), dec!(5));

        let undo = k
            .service
            .undo_waste(&k.ctx(), UndoWaste { waste_entry_id: waste.id })
            .unwrap();
        assert_eq!(undo.entry_type, EntryType::ManualAdd);
        assert_eq!(undo.quantity_change, dec!(3));
        assert_eq!(k.balance(milk, k.a), dec!(8));

        let history = k.service.item_history(k.tenant_id, milk).unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.iter().any(|e| e.id == waste.id && e.entry_type == EntryType::Waste));

        let again = k
            .service
            .undo_waste(&k.ctx(), UndoWaste { waste_entry_id: waste.id })
            .unwrap_err();
        assert!(matches!(again, LedgerError::InvalidInput(_)));
        assert_eq!(k.balance(milk, k.a), dec!(8));

        let missing = EntryId::new();
        assert_eq!(
            k.service.undo_waste(&k.ctx(), UndoWaste { waste_entry_id: missing }),
            Err(LedgerError::UnknownEntry(missing))
        );
    }

    #[test]
    fn manual_add_cannot_block_a_later_undo() {
        let k = Kitchen::new();
        let item = k.item("Cream");
        k.add(item, k.a, dec!(5));
        let waste = k
            .service
            .record_waste(
                &k.ctx(),
                RecordWaste {
                    item_id: item,
                    quantity: dec!(2),
                    reason: "split".to_string(),
                    notes: None,
                    location_id: None,
                },
            )
            .unwrap();

        let err = k
            .service
            .adjust_stock(
                &k.ctx(),
                AdjustStock {
                    item_id: item,
                    location_id: k.a,
                    quantity: dec!(1),
                    direction: Direction::Add,
                    notes: Some(format!("undo waste {} by hand", waste.id)),
                },
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));

        k.service
            .undo_waste(&k.ctx(), UndoWaste { waste_entry_id: waste.id })
            .unwrap();
        assert_eq!(k.balance(item, k.a), dec!(5));
    }

    #[test]
    fn rejected_mutations_leave_no_trace() {
        let k = Kitchen::new();
        let eggs = k.item("Eggs");
        k.add(eggs, k.a, dec!(12));

        let oversell = k.service.adjust_stock(
            &k.ctx(),
            AdjustStock {
                item_id: eggs,
                location_id: k.a,
                quantity: dec!(13),
                direction: Direction::Subtract,
                notes: None,
            },
        );
        assert!(matches!(oversell, Err(LedgerError::InsufficientStock { .. })));

        let nowhere = LocationId::new();
        let unknown = k.service.transfer_stock(
            &k.ctx(),
            TransferStock {
                item_id: eggs,
                from_location_id: k.a,
                to_location_id: nowhere,
                quantity: dec!(1),
                notes: None,
            },
        );
        assert_eq!(unknown, Err(LedgerError::UnknownLocation(nowhere)));

        let same = k.service.transfer_stock(
            &k.ctx(),
            TransferStock {
                item_id: eggs,
                from_location_id: k.a,
                to_location_id: k.a,
                quantity: dec!(1),
                notes: None,
            },
        );
        assert!(matches!(same, Err(LedgerError::InvalidInput(_))));

        assert_eq!(k.balance(eggs, k.a), dec!(12));
        assert_eq!(k.ledger().len(), 1);
    }

    #[test]
    fn permission_gate_runs_before_any_state_is_touched() {
        let authorizer = Arc::new(MembershipAuthorizer::new());
        let store = Arc::new(InMemoryInventoryStore::new());
        let service =
            LedgerService::new(store.clone(), authorizer.clone(), LedgerConfig::default());

        let tenant_id = TenantId::new();
        let chef = UserId::new();
        let ctx = MutationContext::now(tenant_id, chef);

        let denied = service.register_location(&ctx, "Walk-in");
        assert_eq!(
            denied,
            Err(LedgerError::PermissionDenied {
                user_id: chef,
                tenant_id
            })
        );

        authorizer
            .grant(TenantMembership::new(chef, tenant_id, vec![Permission::INVENTORY_MUTATE]))
            .unwrap();
        let location = service.register_location(&ctx, "Walk-in").unwrap();
        let item = service
            .create_item(
                &ctx,
                CreateItem {
                    item_id: ItemId::new(),
                    name: "Salt".to_string(),
                    unit: "kg".to_string(),
                    reorder_point: dec!(0),
                    ingredient_cost_id: None,
                },
            )
            .unwrap();

        authorizer
            .grant(TenantMembership::new(chef, tenant_id, vec![Permission::INVENTORY_READ]))
            .unwrap();
        let result = service.adjust_stock(
            &ctx,
            AdjustStock {
                item_id: item.id,
                location_id: location.id,
                quantity: dec!(1),
                direction: Direction::Add,
                notes: None,
            },
        );
        assert!(matches!(result, Err(LedgerError::PermissionDenied { .. })));
        assert!(store.ledger_snapshot(tenant_id).unwrap().is_empty());
        assert_eq!(service.get_balance(tenant_id, item.id, location.id).unwrap(), dec!(0));
    }

    #[test]
    fn invoice_import_merges_creates_and_updates_cost() {
        let k = Kitchen::new();
        let cost = k
            .service
            .register_cost_record(&k.ctx(), "Tomatoes", dec!(2.10), "kg")
            .unwrap();
        let tomatoes = k
            .service
            .create_item(
                &k.ctx(),
                CreateItem {
                    item_id: ItemId::new(),
                    name: "Tomatoes".to_string(),
                    unit: "kg".to_string(),
                    reorder_point: dec!(5),
                    ingredient_cost_id: Some(cost.id),
                },
            )
            .unwrap();

        let lines = vec![
            ExtractedLineItem {
                item_name: "ROMA TOMATOES".to_string(),
                quantity: dec!(10),
                unit: "kg".to_string(),
                unit_price: dec!(2.45),
            },
            ExtractedLineItem {
                item_name: "Basil".to_string(),
                quantity: dec!(0.5),
                unit: "kg".to_string(),
                unit_price: dec!(14),
            },
        ];

        let proposals = k.service.propose_invoice_matches(k.tenant_id, &lines).unwrap();
        assert_eq!(proposals[0].decision, MatchDecision::Existing(tomatoes.id));
        assert!(matches!(proposals[1].decision, MatchDecision::New(_)));

        let outcome = k
            .service
            .import_invoice(
                &k.ctx(),
                ImportInvoice {
                    location_id: k.b,
                    lines: proposals.into_iter().map(ConfirmedLine::from).collect(),
                    reference: Some("INV-77".to_string()),
                },
            )
            .unwrap();

        assert_eq!(outcome.entries.len(), 2);
        assert_eq!(k.balance(tomatoes.id, k.b), dec!(10));
        let updated = k.service.cost_record(k.tenant_id, cost.id).unwrap().unwrap();
        assert_eq!(updated.cost, dec!(2.45));

        let basil = k.service.item(k.tenant_id, outcome.created_items[0]).unwrap();
        assert_eq!(basil.balance(k.b), dec!(0.5));
        let basil_cost = basil.ingredient_cost_id.unwrap();
        assert_eq!(
            k.service.cost_record(k.tenant_id, basil_cost).unwrap().unwrap().cost,
            dec!(14)
        );
        k.service.verify_ledger(k.tenant_id).unwrap();
    }

    #[test]
    fn failing_invoice_line_aborts_the_whole_invoice() {
        let k = Kitchen::new();
        let onions = k.item("Onions");
        let ghost = ItemId::new();

        let line = |name: &str| ExtractedLineItem {
            item_name: name.to_string(),
            quantity: dec!(3),
            unit: "kg".to_string(),
            unit_price: dec!(1),
        };
        let err = k
            .service
            .import_invoice(
                &k.ctx(),
                ImportInvoice {
                    location_id: k.a,
                    lines: vec![
                        ConfirmedLine {
                            line: line("Onions"),
                            decision: MatchDecision::Existing(onions),
                        },
                        ConfirmedLine {
                            line: line("Shallots"),
                            decision: MatchDecision::New(ItemId::new()),
                        },
                        ConfirmedLine {
                            line: line("Leeks"),
                            decision: MatchDecision::Existing(ghost),
                        },
                    ],
                    reference: None,
                },
            )
            .unwrap_err();

        assert_eq!(err, LedgerError::UnknownItem(ghost));
        assert_eq!(k.balance(onions, k.a), dec!(0));
        assert_eq!(k.service.items(k.tenant_id).unwrap().len(), 1);
        assert!(k.ledger().is_empty());

        let nowhere = LocationId::new();
        let err = k
            .service
            .import_invoice_auto(&k.ctx(), nowhere, vec![line("Onions")], None)
            .unwrap_err();
        assert_eq!(err, LedgerError::UnknownLocation(nowhere));
    }

    #[test]
    fn auto_import_groups_repeated_new_products() {
        let k = Kitchen::new();
        let lines = vec![
            ExtractedLineItem {
                item_name: "Saffron".to_string(),
                quantity: dec!(1),
                unit: "g".to_string(),
                unit_price: dec!(9),
            },
            ExtractedLineItem {
                item_name: "saffron threads".to_string(),
                quantity: dec!(2),
                unit: "g".to_string(),
                unit_price: dec!(8.5),
            },
        ];

        let outcome = k
            .service
            .import_invoice_auto(&k.ctx(), k.a, lines, None)
            .unwrap();
        assert_eq!(outcome.created_items.len(), 1);
        assert_eq!(k.balance(outcome.created_items[0], k.a), dec!(3));

        let saffron = k.service.item(k.tenant_id, outcome.created_items[0]).unwrap();
        let cost = k
            .service
            .cost_record(k.tenant_id, saffron.ingredient_cost_id.unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(cost.cost, dec!(8.5));
    }

    #[test]
    fn resubmitted_invoice_with_created_item_is_rejected_without_retries() {
        let k = Kitchen::new();
        let lines = vec![ExtractedLineItem {
            item_name: "Basil".to_string(),
            quantity: dec!(0.5),
            unit: "kg".to_string(),
            unit_price: dec!(14),
        }];
        let proposals = k.service.propose_invoice_matches(k.tenant_id, &lines).unwrap();
        let cmd = ImportInvoice {
            location_id: k.a,
            lines: proposals.into_iter().map(ConfirmedLine::from).collect(),
            reference: Some("INV-9".to_string()),
        };
        let outcome = k.service.import_invoice(&k.ctx(), cmd.clone()).unwrap();
        let basil = outcome.created_items[0];

        let err = k.service.import_invoice(&k.ctx(), cmd).unwrap_err();
        assert!(
            matches!(&err, LedgerError::InvalidInput(msg) if msg.contains("already exists")),
            "unexpected error: {err:?}"
        );
        assert_eq!(k.balance(basil, k.a), dec!(0.5));
        assert_eq!(k.ledger().len(), 1);
    }

    #[test]
    fn partial_stock_take_commits_valid_rows_only() {
        let k = Kitchen::with_config(
            LedgerConfig::default().with_stock_take_policy(StockTakePolicy::PartialCommit),
        );
        let rice = k.item("Rice");
        let oil = k.item("Oil");
        k.add(rice, k.a, dec!(10));
        k.add(oil, k.a, dec!(4));

        let nowhere = LocationId::new();
        let outcome = k
            .service
            .submit_stock_take(
                &k.ctx(),
                SubmitStockTake {
                    counts: vec![
                        StockCount {
                            item_id: rice,
                            declared_quantity: dec!(9.5),
                            location_id: None,
                        },
                        StockCount {
                            item_id: oil,
                            declared_quantity: dec!(4),
                            location_id: None,
                        },
                        StockCount {
                            item_id: oil,
                            declared_quantity: dec!(1),
                            location_id: Some(nowhere),
                        },
                        StockCount {
                            item_id: ItemId::new(),
                            declared_quantity: dec!(1),
                            location_id: None,
                        },
                    ],
                    policy: None,
                },
            )
            .unwrap();

        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(outcome.unchanged, vec![oil]);
        assert_eq!(outcome.rejected.len(), 2);
        assert_eq!(outcome.rejected[0].error, LedgerError::UnknownLocation(nowhere));
        assert_eq!(k.balance(rice, k.a), dec!(9.5));

        let atomic = k.service.submit_stock_take(
            &k.ctx(),
            SubmitStockTake {
                counts: vec![
                    StockCount {
                        item_id: rice,
                        declared_quantity: dec!(1),
                        location_id: None,
                    },
                    StockCount {
                        item_id: oil,
                        declared_quantity: dec!(-1),
                        location_id: None,
                    },
                ],
                policy: Some(StockTakePolicy::Atomic),
            },
        );
        assert!(matches!(atomic, Err(LedgerError::InvalidInput(_))));
        assert_eq!(k.balance(rice, k.a), dec!(9.5));
    }

    #[test]
    fn low_stock_uses_total_across_locations() {
        let k = Kitchen::new();
        let butter = k.item("Butter");
        let sugar = k.item("Sugar");
        k.add(butter, k.a, dec!(0.5));
        k.add(butter, k.b, dec!(0.5));
        k.add(sugar, k.a, dec!(0.5));
        k.add(sugar, k.b, dec!(0.75));

        let low: Vec<ItemId> = k
            .service
            .low_stock(k.tenant_id)
            .unwrap()
            .into_iter()
            .map(|item| item.id)
            .collect();
        assert_eq!(low, vec![butter]);
    }

    #[test]
    fn duplicate_item_and_unknown_cost_record_are_invalid() {
        let k = Kitchen::new();
        let cmd = CreateItem {
            item_id: ItemId::new(),
            name: "Yeast".to_string(),
            unit: "g".to_string(),
            reorder_point: dec!(0),
            ingredient_cost_id: None,
        };
        k.service.create_item(&k.ctx(), cmd.clone()).unwrap();
        assert!(matches!(
            k.service.create_item(&k.ctx(), cmd.clone()),
            Err(LedgerError::InvalidInput(_))
        ));

        let dangling = CreateItem {
            item_id: ItemId::new(),
            ingredient_cost_id: Some(CostRecordId::new()),
            ..cmd
        };
        assert!(matches!(
            k.service.create_item(&k.ctx(), dangling),
            Err(LedgerError::InvalidInput(_))
        ));
    }

    #[test]
    fn concurrent_subtracts_never_oversell() {
        let k = Arc::new(Kitchen::with_config(
            LedgerConfig::default().with_max_commit_retries(100),
        ));
        let lemons = k.item("Lemons");
        k.add(lemons, k.a, dec!(5));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let k = Arc::clone(&k);
                std::thread::spawn(move || {
                    k.service.adjust_stock(
                        &k.ctx(),
                        AdjustStock {
                            item_id: lemons,
                            location_id: k.a,
                            quantity: dec!(1),
                            direction: Direction::Subtract,
                            notes: None,
                        },
                    )
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        let oversold = results
            .iter()
            .filter(|r| matches!(r, Err(LedgerError::InsufficientStock { .. })))
            .count();

        assert_eq!(succeeded, 5);
        assert_eq!(oversold, 3);
        assert_eq!(k.balance(lemons, k.a), dec!(0));
        assert_eq!(k.ledger().len(), 6);
    }

    /// Store that reports a conflict on the first `failures` commits.
    struct ConflictingStore {
        inner: InMemoryInventoryStore,
        failures: AtomicU32,
    }

    impl InventoryStore for ConflictingStore {
        fn find_item(
            &self,
            tenant_id: TenantId,
            item_id: ItemId,
        ) -> Result<Option<Versioned<InventoryItem>>, StoreError> {
            self.inner.find_item(tenant_id, item_id)
        }

        fn list_items(
            &self,
            tenant_id: TenantId,
        ) -> Result<Vec<Versioned<InventoryItem>>, StoreError> {
            self.inner.list_items(tenant_id)
        }

        fn find_location(
            &self,
            tenant_id: TenantId,
            location_id: LocationId,
        ) -> Result<Option<InventoryLocation>, StoreError> {
            self.inner.find_location(tenant_id, location_id)
        }

        fn list_locations(
            &self,
            tenant_id: TenantId,
        ) -> Result<Vec<InventoryLocation>, StoreError> {
            self.inner.list_locations(tenant_id)
        }

        fn save_location(
            &self,
            location: InventoryLocation,
        ) -> Result<InventoryLocation, StoreError> {
            self.inner.save_location(location)
        }

        fn find_cost_record(
            &self,
            tenant_id: TenantId,
            cost_id: CostRecordId,
        ) -> Result<Option<Versioned<IngredientCostRecord>>, StoreError> {
            self.inner.find_cost_record(tenant_id, cost_id)
        }

        fn find_entry(
            &self,
            tenant_id: TenantId,
            entry_id: EntryId,
        ) -> Result<Option<LedgerEntry>, StoreError> {
            self.inner.find_entry(tenant_id, entry_id)
        }

        fn entries_for_item(
            &self,
            tenant_id: TenantId,
            item_id: ItemId,
        ) -> Result<Vec<LedgerEntry>, StoreError> {
            self.inner.entries_for_item(tenant_id, item_id)
        }

        fn ledger_snapshot(&self, tenant_id: TenantId) -> Result<Vec<LedgerEntry>, StoreError> {
            self.inner.ledger_snapshot(tenant_id)
        }

        fn commit(&self, changes: ChangeSet) -> Result<CommitReceipt, StoreError> {
            let pending = self.failures.load(Ordering::SeqCst);
            if pending > 0 && !changes.entries.is_empty() {
                self.failures.store(pending - 1, Ordering::SeqCst);
                return Err(StoreError::Concurrency("simulated conflict".to_string()));
            }
            self.inner.commit(changes)
        }
    }

    type ConflictingKitchen =
        (LedgerService<ConflictingStore, AllowAll>, MutationContext, ItemId, LocationId);

    fn conflicting(failures: u32, retries: u32) -> ConflictingKitchen {
        let store = ConflictingStore {
            inner: InMemoryInventoryStore::new(),
            failures: AtomicU32::new(failures),
        };
        let service = LedgerService::new(
            store,
            AllowAll,
            LedgerConfig::default().with_max_commit_retries(retries),
        );
        let ctx = MutationContext::now(TenantId::new(), UserId::new());
        let location = service.register_location(&ctx, "Line").unwrap().id;
        let item = service
            .create_item(
                &ctx,
                CreateItem {
                    item_id: ItemId::new(),
                    name: "Cream".to_string(),
                    unit: "l".to_string(),
                    reorder_point: dec!(0),
                    ingredient_cost_id: None,
                },
            )
            .unwrap();
        (service, ctx, item.id, location)
    }

    fn add_cream(item_id: ItemId, location_id: LocationId) -> AdjustStock {
        AdjustStock {
            item_id,
            location_id,
            quantity: dec!(2),
            direction: Direction::Add,
            notes: None,
        }
    }

    #[test]
    fn conflicts_are_retried_from_a_fresh_snapshot() {
        let (service, ctx, item, location) = conflicting(2, 5);
        service.adjust_stock(&ctx, add_cream(item, location)).unwrap();
        assert_eq!(service.get_balance(ctx.tenant_id, item, location).unwrap(), dec!(2));
        assert_eq!(service.store().ledger_snapshot(ctx.tenant_id).unwrap().len(), 1);
    }

    #[test]
    fn exhausted_retries_surface_as_concurrency() {
        let (service, ctx, item, location) = conflicting(3, 2);
        let err = service.adjust_stock(&ctx, add_cream(item, location)).unwrap_err();
        assert!(matches!(err, LedgerError::Concurrency(_)));
        assert_eq!(service.get_balance(ctx.tenant_id, item, location).unwrap(), dec!(0));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(usize, i64),
        Subtract(usize, i64),
        Transfer(usize, usize, i64),
        Waste(i64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..3usize, 1..40i64).prop_map(|(l, q)| Op::Add(l, q)),
            (0..3usize, 1..40i64).prop_map(|(l, q)| Op::Subtract(l, q)),
            (0..3usize, 0..3usize, 1..40i64).prop_map(|(f, t, q)| Op::Transfer(f, t, q)),
            (1..40i64).prop_map(Op::Waste),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Property: across any sequence of operations, transfers conserve
        /// stock, balances never go negative, and replaying the ledger gives
        /// back every current balance.
        #[test]
        fn ledger_replay_matches_directory(ops in prop::collection::vec(op(), 1..30)) {
            let k = Kitchen::new();
            let ctx = k.ctx();
            let third = k.service.register_location(&ctx, "Pastry").unwrap().id;
            let locations = [k.a, k.b, third];
            let item = k.item("Chocolate");
            let mut total = Decimal::ZERO;

            for op in ops {
                let before: Decimal = locations.iter().map(|&l| k.balance(item, l)).sum();
                match op {
                    Op::Add(l, q) => {
                        let quantity = Decimal::new(q, 1);
                        k.add(item, locations[l], quantity);
                        total += quantity;
                    }
                    Op::Subtract(l, q) => {
                        let quantity = Decimal::new(q, 1);
                        let result = k.service.adjust_stock(&ctx, AdjustStock {
                            item_id: item,
                            location_id: locations[l],
                            quantity,
                            direction: Direction::Subtract,
                            notes: None,
                        });
                        if result.is_ok() {
                            total -= quantity;
                        }
                    }
                    Op::Transfer(f, t, q) => {
                        let result = k.service.transfer_stock(&ctx, TransferStock {
                            item_id: item,
                            from_location_id: locations[f],
                            to_location_id: locations[t],
                            quantity: Decimal::new(q, 1),
                            notes: None,
                        });
                        let after: Decimal = locations.iter().map(|&l| k.balance(item, l)).sum();
                        prop_assert_eq!(before, after);
                        if f == t {
                            prop_assert!(
                                matches!(result, Err(LedgerError::InvalidInput(_))),
                                "same-location transfer must be rejected"
                            );
                        }
                    }
                    Op::Waste(q) => {
                        let quantity = Decimal::new(q, 1);
                        let result = k.service.record_waste(&ctx, RecordWaste {
                            item_id: item,
                            quantity,
                            reason: "dropped".to_string(),
                            notes: None,
                            location_id: None,
                        });
                        if result.is_ok() {
                            total -= quantity;
                        }
                    }
                }

                for &l in &locations {
                    prop_assert!(k.balance(item, l) >= Decimal::ZERO);
                }
                let sum: Decimal = locations.iter().map(|&l| k.balance(item, l)).sum();
                prop_assert_eq!(sum, total);
            }

            for &l in &locations {
                let rows = k
                    .service
                    .stock_report(k.tenant_id, &whole_history().with_locations([l]))
                    .unwrap();
                let replayed = rows.first().map_or(Decimal::ZERO, |row| row.end_stock);
                prop_assert_eq!(replayed, k.balance(item, l));
            }
            prop_assert!(k.service.verify_ledger(k.tenant_id).is_ok());
        }
    }
}
