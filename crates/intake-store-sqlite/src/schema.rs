// crates/intake-store-sqlite/src/schema.rs
// ============================================================================
// Module: SQLite Schema
// Description: Connection opening, pragma application, and schema
// initialization for both the job/outbox database and the rate-limit
// database.
// Purpose: One place that knows the on-disk layout described for the
// `jobs`, `idempotency`, `event_outbox`, and `rate_limit_buckets` tables.
// Dependencies: rusqlite
// ============================================================================

use std::path::Path;

use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::params;

use crate::config::SqliteStoreConfig;
use crate::error::SqliteStoreError;

const SCHEMA_VERSION: i64 = 1;

/// Opens a `SQLite` connection at `config.path` with the pragmas this
/// workspace relies on for durability, then ensures the schema exists.
///
/// # Errors
///
/// Returns [`SqliteStoreError`] if the file cannot be opened or the schema
/// cannot be created.
pub fn open_and_initialize(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    ensure_parent_dir(&config.path)?;
    let mut connection = open_connection(config)?;
    initialize_schema(&mut connection)?;
    Ok(connection)
}

/// Opens a `SQLite` connection at `config.path`, applying the shared
/// pragmas, then runs `initialize` against it. Used for databases with a
/// schema other than the job/outbox/idempotency one (the rate-limit
/// database, specifically).
///
/// # Errors
///
/// Returns [`SqliteStoreError`] if the file cannot be opened or `initialize`
/// fails.
pub fn open_and_initialize_with(
    config: &SqliteStoreConfig,
    initialize: fn(&mut Connection) -> Result<(), SqliteStoreError>,
) -> Result<Connection, SqliteStoreError> {
    ensure_parent_dir(&config.path)?;
    let mut connection = open_connection(config)?;
    initialize(&mut connection)?;
    Ok(connection)
}

fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection =
        Connection::open_with_flags(&config.path, flags).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

fn apply_pragmas(connection: &Connection, config: &SqliteStoreConfig) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;

    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let existing: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .ok();
    if existing.is_none() {
        tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    }

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS jobs (
            id TEXT NOT NULL PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            seller_id TEXT NOT NULL,
            channel TEXT NOT NULL,
            job_type TEXT NOT NULL,
            file_ref TEXT NOT NULL,
            rules_profile_id TEXT NOT NULL,
            status TEXT NOT NULL,
            counters_total INTEGER NOT NULL,
            counters_processed INTEGER NOT NULL,
            counters_errors INTEGER NOT NULL,
            counters_warnings INTEGER NOT NULL,
            idempotency_key TEXT NOT NULL,
            metadata_json TEXT NOT NULL,
            retry_of TEXT,
            retry_depth INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            completed_at TEXT,
            version INTEGER NOT NULL,
            UNIQUE (tenant_id, idempotency_key)
         );
         CREATE INDEX IF NOT EXISTS idx_jobs_tenant_status ON jobs (tenant_id, status);
         CREATE INDEX IF NOT EXISTS idx_jobs_tenant_channel ON jobs (tenant_id, channel);

         CREATE TABLE IF NOT EXISTS idempotency (
            tenant_id TEXT NOT NULL,
            key TEXT NOT NULL,
            response_hash TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            PRIMARY KEY (tenant_id, key)
         );

         CREATE TABLE IF NOT EXISTS event_outbox (
            id TEXT NOT NULL PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            event_version INTEGER NOT NULL,
            correlation_id TEXT,
            payload_json TEXT NOT NULL,
            occurred_at TEXT NOT NULL,
            attempt_count INTEGER NOT NULL,
            last_error TEXT,
            dispatched_at TEXT,
            next_visible_at TEXT NOT NULL,
            dead_lettered INTEGER NOT NULL DEFAULT 0
         );
         CREATE INDEX IF NOT EXISTS idx_event_outbox_dispatch
            ON event_outbox (dispatched_at, next_visible_at, occurred_at);
         CREATE INDEX IF NOT EXISTS idx_event_outbox_tenant
            ON event_outbox (tenant_id, dispatched_at);",
    )
    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;

    tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))
}

/// Initializes the separate rate-limit database (kept apart from the
/// job/outbox database so the limiter owns its own connection, per the
/// concurrency model's "rate limiter owns its own connection pool" rule).
///
/// # Errors
///
/// Returns [`SqliteStoreError`] if the schema cannot be created.
pub fn initialize_rate_limit_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS rate_limit_buckets (
            tenant_id TEXT NOT NULL,
            resource TEXT NOT NULL,
            tokens REAL NOT NULL,
            limit_value INTEGER NOT NULL,
            window_seconds INTEGER NOT NULL,
            updated_at_epoch_ms INTEGER NOT NULL,
            PRIMARY KEY (tenant_id, resource)
         );",
    )
    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))
}
