use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::{Duration, TimeZone, Utc};
use kitchen_auth::AllowAll;
use kitchen_core::{ItemId, TenantId, UserId};
use kitchen_infra::{InMemoryInventoryStore, LedgerConfig, LedgerService};
use kitchen_inventory::{
    reconstruct, AdjustStock, CreateItem, Direction, HistoryQuery, InventoryItem, InventoryStore,
    LedgerEntry, MutationContext, TransferStock,
};
use rust_decimal::Decimal;

struct Seeded {
    items: Vec<InventoryItem>,
    ledger: Vec<LedgerEntry>,
}

/// Build a team with `items` items and roughly `entries_per_item` entries each,
/// spread over 90 days and two locations.
fn seed(items: usize, entries_per_item: usize) -> Seeded {
    let service =
        LedgerService::new(InMemoryInventoryStore::new(), AllowAll, LedgerConfig::default());
    let tenant_id = TenantId::new();
    let user_id = UserId::new();
    let ctx = MutationContext::now(tenant_id, user_id);
    let walk_in = service.register_location(&ctx, "Walk-in").unwrap().id;
    let line = service.register_location(&ctx, "Line").unwrap().id;
    let origin = Utc.with_ymd_and_hms(2026, 1, 1, 6, 0, 0).unwrap();

    for n in 0..items {
        let item_id = service
            .create_item(
                &ctx,
                CreateItem {
                    item_id: ItemId::new(),
                    name: format!("Ingredient {n}"),
                    unit: "kg".to_string(),
                    reorder_point: Decimal::ONE,
                    ingredient_cost_id: None,
                },
            )
            .unwrap()
            .id;

        for e in 0..entries_per_item {
            let at = origin + Duration::hours((e * 90 * 24 / entries_per_item.max(1)) as i64);
            let ctx = MutationContext::new(tenant_id, user_id, at);
            if e % 3 == 2 {
                service
                    .transfer_stock(
                        &ctx,
                        TransferStock {
                            item_id,
                            from_location_id: walk_in,
                            to_location_id: line,
                            quantity: Decimal::ONE,
                            notes: None,
                        },
                    )
                    .unwrap();
            } else {
                service
                    .adjust_stock(
                        &ctx,
                        AdjustStock {
                            item_id,
                            location_id: walk_in,
                            quantity: Decimal::new(25, 1),
                            direction: Direction::Add,
                            notes: None,
                        },
                    )
                    .unwrap();
            }
        }
    }

    let store = service.store();
    Seeded {
        items: store
            .list_items(tenant_id)
            .unwrap()
            .into_iter()
            .map(|v| v.record)
            .collect(),
        ledger: store.ledger_snapshot(tenant_id).unwrap(),
    }
}

fn bench_history_reconstruction(c: &mut Criterion) {
    let mut group = c.benchmark_group("history_reconstruction");
    let query = HistoryQuery::between(
        Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2026, 2, 28, 23, 59, 59).unwrap(),
    )
    .unwrap();

    for &(items, per_item) in &[(10usize, 100usize), (100, 100), (200, 500)] {
        let seeded = seed(items, per_item);
        group.throughput(Throughput::Elements(seeded.ledger.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("entries", seeded.ledger.len()),
            &seeded,
            |b, seeded| {
                b.iter(|| reconstruct(black_box(&seeded.items), black_box(&seeded.ledger), &query));
            },
        );
    }

    group.finish();
}

fn bench_mutation_latency(c: &mut Criterion) {
    let service =
        LedgerService::new(InMemoryInventoryStore::new(), AllowAll, LedgerConfig::default());
    let ctx = MutationContext::now(TenantId::new(), UserId::new());
    let walk_in = service.register_location(&ctx, "Walk-in").unwrap().id;
    let item_id = service
        .create_item(
            &ctx,
            CreateItem {
                item_id: ItemId::new(),
                name: "Flour".to_string(),
                unit: "kg".to_string(),
                reorder_point: Decimal::ZERO,
                ingredient_cost_id: None,
            },
        )
        .unwrap()
        .id;

    c.bench_function("adjust_stock", |b| {
        b.iter(|| {
            service
                .adjust_stock(
                    &ctx,
                    AdjustStock {
                        item_id,
                        location_id: walk_in,
                        quantity: black_box(Decimal::ONE),
                        direction: Direction::Add,
                        notes: None,
                    },
                )
                .unwrap()
        });
    });
}

criterion_group!(benches, bench_history_reconstruction, bench_mutation_latency);
criterion_main!(benches);
