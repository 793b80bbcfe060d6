//! Infrastructure layer: storage backends, configuration, and the ledger service
//! that ties the pure inventory domain to them.

pub mod config;
pub mod ledger_service;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use config::{ConfigError, LedgerConfig};
pub use ledger_service::LedgerService;
pub use store::InMemoryInventoryStore;
