// crates/intake-store-sqlite/src/idempotency_store.rs
// ============================================================================
// Module: SQLite Idempotency Store
// Description: Durable `(tenant, resolved_key) -> response` store backing
// `intake_core::IdempotencyStore`.
// Purpose: Give the submit use case atomic insert-if-absent semantics with
// constant-time response-hash comparison on replay.
// Dependencies: intake-core, rusqlite, serde_json
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;

use chrono::DateTime;
use chrono::Utc;
use intake_core::DomainError;
use intake_core::IdempotencyRecord;
use intake_core::IdempotencyStore;
use intake_core::ResolvedKey;
use intake_core::TenantId;
use intake_core::Timestamp;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;

use crate::config::SqliteStoreConfig;
use crate::error::SqliteStoreError;
use crate::error::is_unique_violation;
use crate::schema::open_and_initialize;

/// `SQLite`-backed idempotency store.
///
/// May share a database file with [`crate::job_repository::SqliteIntakeStore`]
/// or point at a dedicated one; both are valid per the deployment's storage
/// topology, since this store only ever touches the `idempotency` table.
#[derive(Clone)]
pub struct SqliteIdempotencyStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteIdempotencyStore {
    /// Opens (creating if absent) the database at `config.path` and ensures
    /// its schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] if the database cannot be opened or
    /// initialized.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        let connection = open_and_initialize(config)?;
        Ok(Self { connection: Arc::new(Mutex::new(connection)) })
    }

    /// Wraps an already-open, already-initialized connection. Used when the
    /// idempotency store shares a database file with the job repository.
    #[must_use]
    pub fn from_connection(connection: Arc<Mutex<Connection>>) -> Self {
        Self { connection }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, DomainError> {
        self.connection
            .lock()
            .map_err(|_| DomainError::StorageUnavailable("idempotency store connection mutex poisoned".to_string()))
    }
}

fn parse_timestamp(value: &str) -> Result<Timestamp, SqliteStoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| Timestamp::new(dt.with_timezone(&Utc)))
        .map_err(|err| SqliteStoreError::Corrupt(format!("invalid timestamp: {err}")))
}

fn row_to_record(
    tenant_id: &str,
    key: &str,
    response_hash: &str,
    payload_json: &str,
    created_at: &str,
    expires_at: &str,
) -> Result<IdempotencyRecord, SqliteStoreError> {
    Ok(IdempotencyRecord {
        tenant_id: TenantId::parse(tenant_id).map_err(|_| SqliteStoreError::Corrupt("invalid tenant_id".to_string()))?,
        key: ResolvedKey::from_trusted(key.to_string()),
        response_hash: response_hash.to_string(),
        response_payload: serde_json::from_str(payload_json)
            .map_err(|err| SqliteStoreError::Corrupt(format!("invalid payload_json: {err}")))?,
        created_at: parse_timestamp(created_at)?,
        expires_at: parse_timestamp(expires_at)?,
    })
}

impl IdempotencyStore for SqliteIdempotencyStore {
    fn get(&self, tenant: &TenantId, key: &ResolvedKey) -> Result<Option<IdempotencyRecord>, DomainError> {
        let guard = self.lock()?;
        let row = guard
            .query_row(
                "SELECT tenant_id, key, response_hash, payload_json, created_at, expires_at
                 FROM idempotency WHERE tenant_id = ?1 AND key = ?2",
                params![tenant.as_str(), key.as_str()],
                |row| {
                    let tenant_id: String = row.get(0)?;
                    let key: String = row.get(1)?;
                    let response_hash: String = row.get(2)?;
                    let payload_json: String = row.get(3)?;
                    let created_at: String = row.get(4)?;
                    let expires_at: String = row.get(5)?;
                    Ok(row_to_record(&tenant_id, &key, &response_hash, &payload_json, &created_at, &expires_at))
                },
            )
            .optional()
            .map_err(|err| SqliteStoreError::from(err).into_domain())?;
        drop(guard);

        let Some(record) = row else {
            return Ok(None);
        };
        let record = record.map_err(SqliteStoreError::into_domain)?;
        if record.is_expired(Timestamp::new(Utc::now())) { Ok(None) } else { Ok(Some(record)) }
    }

    fn put(
        &self,
        tenant: &TenantId,
        key: &ResolvedKey,
        payload: &serde_json::Value,
        ttl_seconds: i64,
    ) -> Result<IdempotencyRecord, DomainError> {
        let now = Timestamp::new(Utc::now());
        let expires_at = now.plus_seconds(ttl_seconds);
        let response_hash = intake_core::compute_response_hash(payload)?;
        let payload_json = serde_json::to_string(payload).map_err(|e| DomainError::Validation(e.to_string()))?;

        let guard = self.lock()?;
        let insert = guard.execute(
            "INSERT INTO idempotency (tenant_id, key, response_hash, payload_json, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(tenant_id, key) DO NOTHING",
            params![
                tenant.as_str(),
                key.as_str(),
                response_hash,
                payload_json,
                now.as_datetime().to_rfc3339(),
                expires_at.as_datetime().to_rfc3339(),
            ],
        );
        match insert {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(SqliteStoreError::from(err).into_domain()),
        }

        let existing: (String, String, String, String, String, String) = guard
            .query_row(
                "SELECT tenant_id, key, response_hash, payload_json, created_at, expires_at
                 FROM idempotency WHERE tenant_id = ?1 AND key = ?2",
                params![tenant.as_str(), key.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?)),
            )
            .map_err(|err| SqliteStoreError::from(err).into_domain())?;
        drop(guard);

        let record =
            row_to_record(&existing.0, &existing.1, &existing.2, &existing.3, &existing.4, &existing.5)
                .map_err(SqliteStoreError::into_domain)?;

        if !intake_core::hashes_match(&record.response_hash, &response_hash) {
            return Err(DomainError::IdempotencyConflict { tenant: tenant.clone() });
        }
        Ok(record)
    }

    fn delete(&self, tenant: &TenantId, key: &ResolvedKey) -> Result<bool, DomainError> {
        let guard = self.lock()?;
        let removed = guard
            .execute(
                "DELETE FROM idempotency WHERE tenant_id = ?1 AND key = ?2",
                params![tenant.as_str(), key.as_str()],
            )
            .map_err(|err| SqliteStoreError::from(err).into_domain())?;
        Ok(removed > 0)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test assertions on the SQLite idempotency store; a panic here is a test failure."
    )]

    use super::*;

    fn store() -> (SqliteIdempotencyStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("idempotency.sqlite3");
        let store = SqliteIdempotencyStore::open(&SqliteStoreConfig::new(path)).expect("open store");
        (store, dir)
    }

    fn tenant() -> TenantId {
        TenantId::parse("t_acme").expect("valid tenant")
    }

    #[test]
    fn put_replays_existing_record_on_same_payload() {
        let (store, _dir) = store();
        let key = ResolvedKey::from_trusted("abcdef1234567890abcd".to_string());
        let payload = serde_json::json!({"job_id": "x"});

        let first = store.put(&tenant(), &key, &payload, 3600).expect("put succeeds");
        let second = store.put(&tenant(), &key, &payload, 3600).expect("put succeeds");
        assert_eq!(first.response_hash, second.response_hash);
    }

    #[test]
    fn put_conflicts_on_different_payload_for_same_key() {
        let (store, _dir) = store();
        let key = ResolvedKey::from_trusted("abcdef1234567890abcd".to_string());
        store.put(&tenant(), &key, &serde_json::json!({"job_id": "x"}), 3600).expect("put succeeds");

        let err = store.put(&tenant(), &key, &serde_json::json!({"job_id": "y"}), 3600).unwrap_err();
        assert!(matches!(err, DomainError::IdempotencyConflict { .. }));
    }

    #[test]
    fn get_returns_none_for_unknown_key() {
        let (store, _dir) = store();
        let key = ResolvedKey::from_trusted("abcdef1234567890abcd".to_string());
        assert!(store.get(&tenant(), &key).expect("get succeeds").is_none());
    }

    #[test]
    fn delete_removes_stored_record() {
        let (store, _dir) = store();
        let key = ResolvedKey::from_trusted("abcdef1234567890abcd".to_string());
        store.put(&tenant(), &key, &serde_json::json!({"job_id": "x"}), 3600).expect("put succeeds");

        assert!(store.delete(&tenant(), &key).expect("delete succeeds"));
        assert!(store.get(&tenant(), &key).expect("get succeeds").is_none());
        assert!(!store.delete(&tenant(), &key).expect("delete succeeds"));
    }

    #[test]
    fn records_are_isolated_per_tenant() {
        let (store, _dir) = store();
        let key = ResolvedKey::from_trusted("abcdef1234567890abcd".to_string());
        store.put(&tenant(), &key, &serde_json::json!({"job_id": "x"}), 3600).expect("put succeeds");

        let other = TenantId::parse("t_other").expect("valid tenant");
        assert!(store.get(&other, &key).expect("get succeeds").is_none());
    }
}
