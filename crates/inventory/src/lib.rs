//! Inventory ledger domain module.
//!
//! This crate contains the business rules for kitchen stock, implemented purely
//! as deterministic domain logic (no IO, no locking, no storage engine):
//!
//! - the item/location/cost data model and the immutable `LedgerEntry`
//! - `StockDirectory`, the per-(item, location) current balance working set
//! - the mutation planners (manual adjust, transfer, waste, stock take, invoice import)
//! - invoice line matching
//! - historical reconstruction by ledger replay
//! - the `InventoryStore` persistence contract the orchestration layer commits through

pub mod command;
pub mod directory;
pub mod entry;
pub mod error;
pub mod history;
pub mod invoice;
pub mod item;
pub mod operations;
pub mod store;
pub mod working_set;

pub use command::{
    AdjustStock, CreateItem, Direction, MutationContext, RecordWaste, StockCount,
    StockTakePolicy, SubmitStockTake, TransferStock, UndoWaste,
};
pub use directory::StockDirectory;
pub use entry::{verify_ledger, verify_transfer_pair, EntryType, LedgerEntry};
pub use error::{LedgerError, LedgerResult};
pub use history::{balance_at, reconstruct, HistoryQuery, StockMovementRow};
pub use invoice::{
    propose_matches, ConfirmedLine, ExtractedLineItem, ImportInvoice, InvoiceOutcome,
    MatchDecision, ProposedMatch,
};
pub use item::{IngredientCostRecord, InventoryItem, InventoryLocation, LocationStock};
pub use operations::{StockTakeOutcome, RejectedCount};
pub use store::{ChangeSet, CommitReceipt, InventoryStore, StoreError};
pub use working_set::WorkingSet;
