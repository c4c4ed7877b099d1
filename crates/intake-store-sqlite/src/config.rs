// crates/intake-store-sqlite/src/config.rs
// ============================================================================
// Module: SQLite Store Configuration
// Description: Connection and durability settings shared by the job/outbox
// store and the rate limiter store.
// Purpose: Isolate pragma choices from call sites so both stores open
// connections identically.
// Dependencies: serde
// ============================================================================

use std::path::PathBuf;

use serde::Deserialize;

/// `SQLite` journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JournalMode {
    /// Write-ahead log; allows concurrent readers alongside the writer.
    #[default]
    Wal,
    /// Legacy rollback journal.
    Delete,
}

impl JournalMode {
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// Configuration for a `SQLite`-backed store.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the database file.
    pub path: PathBuf,
    /// Busy timeout, in milliseconds, before a locked-database error
    /// surfaces to the caller.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Journal mode.
    #[serde(default)]
    pub journal_mode: JournalMode,
}

const fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl SqliteStoreConfig {
    /// Builds a configuration pointing at `path` with defaults otherwise.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path, busy_timeout_ms: default_busy_timeout_ms(), journal_mode: JournalMode::default() }
    }
}
