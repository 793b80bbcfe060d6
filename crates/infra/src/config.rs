//! Ledger service configuration, loaded from the environment.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use kitchen_inventory::StockTakePolicy;

pub const MAX_COMMIT_RETRIES_VAR: &str = "KITCHEN_LEDGER_MAX_COMMIT_RETRIES";
pub const STOCK_TAKE_POLICY_VAR: &str = "KITCHEN_LEDGER_STOCK_TAKE_POLICY";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {var}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Optimistic commit retries before giving up with `LedgerError::Concurrency`.
    pub max_commit_retries: u32,
    /// Used when a stock take does not name its own policy.
    pub stock_take_policy: StockTakePolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_commit_retries: 5,
            stock_take_policy: StockTakePolicy::Atomic,
        }
    }
}

impl LedgerConfig {
    /// Read overrides from the process environment; unset variables keep defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as `from_env` with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup(MAX_COMMIT_RETRIES_VAR) {
            config.max_commit_retries =
                raw.trim()
                    .parse()
                    .map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue {
                        var: MAX_COMMIT_RETRIES_VAR,
                        value: raw.clone(),
                        reason: e.to_string(),
                    })?;
        }

        if let Some(raw) = lookup(STOCK_TAKE_POLICY_VAR) {
            config.stock_take_policy = raw.parse().map_err(|e: kitchen_inventory::LedgerError| {
                ConfigError::InvalidValue {
                    var: STOCK_TAKE_POLICY_VAR,
                    value: raw.clone(),
                    reason: e.to_string(),
                }
            })?;
        }

        Ok(config)
    }

    pub fn with_max_commit_retries(mut self, retries: u32) -> Self {
        self.max_commit_retries = retries;
        self
    }

    pub fn with_stock_take_policy(mut self, policy: StockTakePolicy) -> Self {
        self.stock_take_policy = policy;
        self
    }
}
