//! Core error model.

use thiserror::Error;

use crate::version::ExpectedVersion;

/// Result type used by core primitives.
pub type CoreResult<T> = Result<T, CoreError>;

/// Failures raised by the shared primitives themselves.
///
/// Business failures (insufficient stock, unknown items, ...) live in the
/// inventory crate; this stays limited to identifiers and versions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A stale version was presented for a versioned record.
    #[error("version conflict: expected {expected:?}, found {}", describe_version(.actual))]
    VersionConflict {
        expected: ExpectedVersion,
        actual: Option<u64>,
    },
}

fn describe_version(actual: &Option<u64>) -> String {
    actual.map_or_else(|| "none".to_string(), |v| v.to_string())
}

impl CoreError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
