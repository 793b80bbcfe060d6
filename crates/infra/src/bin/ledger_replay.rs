//! Offline ledger replay.
//!
//! ```text
//! ledger-replay demo                       # run the tomatoes walkthrough, print its dump
//! ledger-replay check <dump.json> [FROM TO] # verify a dump and print its movement report
//! ```
//!
//! A dump is `{"items": [InventoryItem], "entries": [LedgerEntry]}`. `check`
//! fails when transfer pairing is broken or when a replayed balance disagrees
//! with the materialized one.

use std::collections::BTreeSet;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use kitchen_auth::AllowAll;
use kitchen_core::{ItemId, LocationId, TenantId, UserId};
use kitchen_infra::{InMemoryInventoryStore, LedgerConfig, LedgerService};
use kitchen_inventory::{
    balance_at, reconstruct, verify_ledger, AdjustStock, CreateItem, Direction, HistoryQuery,
    InventoryItem, InventoryStore, LedgerEntry, MutationContext, RecordWaste, StockCount,
    StockMovementRow, SubmitStockTake, TransferStock,
};

#[derive(Debug, Serialize, Deserialize)]
struct LedgerDump {
    items: Vec<InventoryItem>,
    entries: Vec<LedgerEntry>,
}

#[derive(Debug, Serialize)]
struct Drift {
    item_id: ItemId,
    location_id: LocationId,
    materialized: Decimal,
    replayed: Decimal,
}

#[derive(Debug, Serialize)]
struct CheckReport {
    entries: usize,
    rows: Vec<StockMovementRow>,
    drift: Vec<Drift>,
}

fn main() -> Result<()> {
    kitchen_observability::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("demo") => demo(),
        Some("check") => {
            let path = args.get(1).context("check needs a dump file")?;
            let range = match (args.get(2), args.get(3)) {
                (Some(from), Some(to)) => Some((parse_date(from)?, parse_date(to)?)),
                (None, None) => None,
                _ => bail!("give both FROM and TO dates, or neither"),
            };
            check(path, range)
        }
        _ => bail!("usage: ledger-replay demo | ledger-replay check <dump.json> [FROM TO]"),
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").with_context(|| format!("invalid date '{raw}'"))
}

fn check(path: &str, range: Option<(NaiveDate, NaiveDate)>) -> Result<()> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let dump: LedgerDump = serde_json::from_str(&raw).with_context(|| format!("parsing {path}"))?;

    verify_ledger(&dump.entries).context("ledger verification failed")?;

    let now = dump
        .entries
        .iter()
        .map(|e| e.timestamp)
        .max()
        .map_or_else(Utc::now, |latest| latest.max(Utc::now()));
    let query = match range {
        Some((from, to)) => HistoryQuery::for_days(from, to)?,
        None => HistoryQuery::between(
            Utc.timestamp_opt(0, 0).single().context("epoch out of range")?,
            now,
        )?,
    };
    let rows = reconstruct(&dump.items, &dump.entries, &query);

    let mut drift = Vec::new();
    for item in &dump.items {
        let locations: BTreeSet<LocationId> = item
            .locations()
            .iter()
            .map(|l| l.location_id)
            .chain(
                dump.entries
                    .iter()
                    .filter(|e| e.item_id == item.id)
                    .map(|e| e.location_id),
            )
            .collect();
        for location_id in locations {
            let materialized = item.balance(location_id);
            let replayed = balance_at(&dump.entries, item.id, location_id, now);
            if materialized != replayed {
                warn!(item_id = %item.id, %location_id, %materialized, %replayed, "balance drift");
                drift.push(Drift {
                    item_id: item.id,
                    location_id,
                    materialized,
                    replayed,
                });
            }
        }
    }

    let report = CheckReport {
        entries: dump.entries.len(),
        rows,
        drift,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.drift.is_empty() {
        bail!("{} balance(s) disagree with the ledger", report.drift.len());
    }
    Ok(())
}

fn demo() -> Result<()> {
    let config = LedgerConfig::from_env()?;
    let service = LedgerService::new(InMemoryInventoryStore::new(), AllowAll, config);
    let tenant_id = TenantId::new();
    let user_id = UserId::new();
    let ctx = MutationContext::now(tenant_id, user_id);

    let a = service.register_location(&ctx, "A")?.id;
    let b = service.register_location(&ctx, "B")?.id;
    let tomatoes = service
        .create_item(
            &ctx,
            CreateItem {
                item_id: ItemId::new(),
                name: "Tomatoes".to_string(),
                unit: "kg".to_string(),
                reorder_point: Decimal::ZERO,
                ingredient_cost_id: None,
            },
        )?
        .id;

    service.adjust_stock(
        &ctx,
        AdjustStock {
            item_id: tomatoes,
            location_id: a,
            quantity: Decimal::from(10),
            direction: Direction::Add,
            notes: None,
        },
    )?;
    service.transfer_stock(
        &ctx,
        TransferStock {
            item_id: tomatoes,
            from_location_id: a,
            to_location_id: b,
            quantity: Decimal::from(4),
            notes: None,
        },
    )?;
    service.record_waste(
        &ctx,
        RecordWaste {
            item_id: tomatoes,
            quantity: Decimal::from(6),
            reason: "spoiled".to_string(),
            notes: None,
            location_id: None,
        },
    )?;
    service.submit_stock_take(
        &ctx,
        SubmitStockTake {
            counts: vec![StockCount {
                item_id: tomatoes,
                declared_quantity: Decimal::from(2),
                location_id: None,
            }],
            policy: None,
        },
    )?;

    let store = service.store();
    let dump = LedgerDump {
        items: service.items(tenant_id)?,
        entries: store.ledger_snapshot(tenant_id)?,
    };
    info!(entries = dump.entries.len(), "demo ledger written");
    println!("{}", serde_json::to_string_pretty(&dump)?);
    Ok(())
}
