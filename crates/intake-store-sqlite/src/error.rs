// crates/intake-store-sqlite/src/error.rs
// ============================================================================
// Module: SQLite Store Errors
// Description: Internal error type for the SQLite-backed stores, and its
// mapping onto the domain error taxonomy.
// Purpose: Keep rusqlite-specific error detail out of the domain layer while
// preserving enough context for operators reading logs.
// Dependencies: rusqlite, thiserror, intake-core
// ============================================================================

use intake_core::DomainError;
use thiserror::Error;

/// Errors internal to the SQLite store implementations.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Filesystem or connection-open failure.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error not otherwise classified.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// A row's stored value violated its own invariants on read-back.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// A unique-constraint violation surfaced where the caller treats it as
    /// a domain conflict rather than a storage error.
    #[error("sqlite store constraint violation: {0}")]
    Constraint(String),
}

impl From<rusqlite::Error> for SqliteStoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl SqliteStoreError {
    /// Maps an internal store error onto the domain taxonomy. Constraint
    /// violations are surfaced to storage-unavailable only as a fallback;
    /// callers that expect a specific conflict (idempotency race,
    /// optimistic-lock loss) should detect it before this conversion runs.
    #[must_use]
    pub fn into_domain(self) -> DomainError {
        match self {
            Self::Io(message) | Self::Db(message) | Self::Constraint(message) => {
                DomainError::StorageUnavailable(message)
            }
            Self::Corrupt(message) => DomainError::Validation(format!("corrupt row: {message}")),
        }
    }
}

impl From<SqliteStoreError> for DomainError {
    fn from(err: SqliteStoreError) -> Self {
        err.into_domain()
    }
}

/// Returns `true` when `err` represents a `SQLite` `UNIQUE` constraint
/// violation, as opposed to any other engine failure.
#[must_use]
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
