// crates/intake-store-sqlite/src/job_repository.rs
// ============================================================================
// Module: SQLite Job Repository & Outbox Store
// Description: Durable `JobRepository` and `OutboxStore` implementations
// sharing one connection so a job and its pending events commit atomically.
// Purpose: Give the submit/get/retry use cases a backend that honors tenant
// isolation, optimistic concurrency, and outbox-completeness.
// Dependencies: intake-core, rusqlite, serde_json, uuid
// ============================================================================

//! ## Overview
//! `SqliteIntakeStore` holds the one connection the job repository and the
//! outbox share, matching the concurrency model's "one database connection
//! per request (single transaction)" rule: [`JobRepository::save`] writes
//! the `jobs` row and every pending event's `event_outbox` row inside one
//! `SQLite` transaction.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;

use chrono::DateTime;
use chrono::Utc;
use intake_core::Channel;
use intake_core::Counters;
use intake_core::DomainError;
use intake_core::DomainEvent;
use intake_core::FileRef;
use intake_core::Job;
use intake_core::JobFilter;
use intake_core::JobId;
use intake_core::JobRepository;
use intake_core::JobStatus;
use intake_core::JobType;
use intake_core::Metadata;
use intake_core::OutboxEntry;
use intake_core::OutboxStore;
use intake_core::ResolvedKey;
use intake_core::RulesProfileId;
use intake_core::SellerId;
use intake_core::TenantId;
use intake_core::Timestamp;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;
use uuid::Uuid;

use crate::config::SqliteStoreConfig;
use crate::error::SqliteStoreError;
use crate::error::is_unique_violation;
use crate::schema::open_and_initialize;

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed job repository and outbox store.
#[derive(Clone)]
pub struct SqliteIntakeStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteIntakeStore {
    /// Opens (creating if absent) the job/outbox database at
    /// `config.path` and ensures its schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] if the database cannot be opened or
    /// initialized.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        let connection = open_and_initialize(config)?;
        Ok(Self { connection: Arc::new(Mutex::new(connection)) })
    }

    /// Returns the shared connection backing this store, for handing to
    /// [`crate::idempotency_store::SqliteIdempotencyStore::from_connection`]
    /// when both stores live in the same database file.
    #[must_use]
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        self.connection.clone()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, DomainError> {
        self.connection
            .lock()
            .map_err(|_| DomainError::StorageUnavailable("job store connection mutex poisoned".to_string()))
    }
}

// ============================================================================
// SECTION: Row <-> Domain Mapping
// ============================================================================

fn job_type_str(job_type: JobType) -> &'static str {
    match job_type {
        JobType::Validation => "validation",
        JobType::Correction => "correction",
        JobType::Enrichment => "enrichment",
    }
}

fn parse_job_type(value: &str) -> Result<JobType, SqliteStoreError> {
    match value {
        "validation" => Ok(JobType::Validation),
        "correction" => Ok(JobType::Correction),
        "enrichment" => Ok(JobType::Enrichment),
        other => Err(SqliteStoreError::Corrupt(format!("unknown job_type {other}"))),
    }
}

fn status_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Queued => "queued",
        JobStatus::Running => "running",
        JobStatus::Succeeded => "succeeded",
        JobStatus::Failed => "failed",
        JobStatus::Retrying => "retrying",
        JobStatus::Cancelled => "cancelled",
        JobStatus::Expired => "expired",
    }
}

fn parse_status(value: &str) -> Result<JobStatus, SqliteStoreError> {
    match value {
        "queued" => Ok(JobStatus::Queued),
        "running" => Ok(JobStatus::Running),
        "succeeded" => Ok(JobStatus::Succeeded),
        "failed" => Ok(JobStatus::Failed),
        "retrying" => Ok(JobStatus::Retrying),
        "cancelled" => Ok(JobStatus::Cancelled),
        "expired" => Ok(JobStatus::Expired),
        other => Err(SqliteStoreError::Corrupt(format!("unknown status {other}"))),
    }
}

fn timestamp_to_rfc3339(ts: Timestamp) -> String {
    ts.as_datetime().to_rfc3339()
}

fn parse_timestamp(value: &str) -> Result<Timestamp, SqliteStoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| Timestamp::new(dt.with_timezone(&Utc)))
        .map_err(|err| SqliteStoreError::Corrupt(format!("invalid timestamp: {err}")))
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Result<Job, SqliteStoreError>> {
    let id: String = row.get("id")?;
    let tenant_id: String = row.get("tenant_id")?;
    let seller_id: String = row.get("seller_id")?;
    let channel: String = row.get("channel")?;
    let job_type: String = row.get("job_type")?;
    let file_ref: String = row.get("file_ref")?;
    let rules_profile_id: String = row.get("rules_profile_id")?;
    let status: String = row.get("status")?;
    let counters_total: i64 = row.get("counters_total")?;
    let counters_processed: i64 = row.get("counters_processed")?;
    let counters_errors: i64 = row.get("counters_errors")?;
    let counters_warnings: i64 = row.get("counters_warnings")?;
    let idempotency_key: String = row.get("idempotency_key")?;
    let metadata_json: String = row.get("metadata_json")?;
    let retry_of: Option<String> = row.get("retry_of")?;
    let retry_depth: i64 = row.get("retry_depth")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;
    let version: i64 = row.get("version")?;

    Ok(build_job(
        &id,
        &tenant_id,
        &seller_id,
        &channel,
        &job_type,
        &file_ref,
        &rules_profile_id,
        &status,
        counters_total,
        counters_processed,
        counters_errors,
        counters_warnings,
        &idempotency_key,
        &metadata_json,
        retry_of.as_deref(),
        retry_depth,
        &created_at,
        &updated_at,
        completed_at.as_deref(),
        version,
    ))
}

#[allow(clippy::too_many_arguments)]
fn build_job(
    id: &str,
    tenant_id: &str,
    seller_id: &str,
    channel: &str,
    job_type: &str,
    file_ref: &str,
    rules_profile_id: &str,
    status: &str,
    counters_total: i64,
    counters_processed: i64,
    counters_errors: i64,
    counters_warnings: i64,
    idempotency_key: &str,
    metadata_json: &str,
    retry_of: Option<&str>,
    retry_depth: i64,
    created_at: &str,
    updated_at: &str,
    completed_at: Option<&str>,
    version: i64,
) -> Result<Job, SqliteStoreError> {
    let metadata_map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(metadata_json)
        .map_err(|err| SqliteStoreError::Corrupt(format!("invalid metadata_json: {err}")))?;

    Ok(Job::rehydrate(
        JobId::parse(id).map_err(|err| SqliteStoreError::Corrupt(format!("invalid job id: {err}")))?,
        TenantId::parse(tenant_id).map_err(|_| SqliteStoreError::Corrupt("invalid tenant_id".to_string()))?,
        SellerId::parse(seller_id).map_err(|_| SqliteStoreError::Corrupt("invalid seller_id".to_string()))?,
        Channel::parse(channel).map_err(|_| SqliteStoreError::Corrupt("invalid channel".to_string()))?,
        parse_job_type(job_type)?,
        FileRef::parse(file_ref).map_err(|_| SqliteStoreError::Corrupt("invalid file_ref".to_string()))?,
        RulesProfileId::parse(rules_profile_id)
            .map_err(|_| SqliteStoreError::Corrupt("invalid rules_profile_id".to_string()))?,
        parse_status(status)?,
        Counters {
            total: counters_total as u64,
            processed: counters_processed as u64,
            errors: counters_errors as u64,
            warnings: counters_warnings as u64,
        },
        ResolvedKey::from_trusted(idempotency_key.to_string()),
        Metadata::new(metadata_map).map_err(|_| SqliteStoreError::Corrupt("invalid metadata".to_string()))?,
        retry_of
            .map(JobId::parse)
            .transpose()
            .map_err(|err| SqliteStoreError::Corrupt(format!("invalid retry_of: {err}")))?,
        u32::try_from(retry_depth).map_err(|_| SqliteStoreError::Corrupt("negative retry_depth".to_string()))?,
        parse_timestamp(created_at)?,
        parse_timestamp(updated_at)?,
        completed_at.map(parse_timestamp).transpose()?,
        u64::try_from(version).map_err(|_| SqliteStoreError::Corrupt("negative version".to_string()))?,
    ))
}

fn row_to_outbox_entry(row: &Row<'_>) -> rusqlite::Result<Result<OutboxEntry, SqliteStoreError>> {
    let id: String = row.get("id")?;
    let tenant_id: String = row.get("tenant_id")?;
    let event_type: String = row.get("event_type")?;
    let event_version: i64 = row.get("event_version")?;
    let correlation_id: Option<String> = row.get("correlation_id")?;
    let payload_json: String = row.get("payload_json")?;
    let occurred_at: String = row.get("occurred_at")?;
    let attempt_count: i64 = row.get("attempt_count")?;
    let last_error: Option<String> = row.get("last_error")?;
    let dispatched_at: Option<String> = row.get("dispatched_at")?;
    let next_visible_at: String = row.get("next_visible_at")?;

    let built = (|| -> Result<OutboxEntry, SqliteStoreError> {
        Ok(OutboxEntry {
            id: Uuid::parse_str(&id).map_err(|_| SqliteStoreError::Corrupt("invalid outbox id".to_string()))?,
            tenant_id: TenantId::parse(&tenant_id)
                .map_err(|_| SqliteStoreError::Corrupt("invalid tenant_id".to_string()))?,
            event_type,
            event_version: u32::try_from(event_version)
                .map_err(|_| SqliteStoreError::Corrupt("negative event_version".to_string()))?,
            correlation_id,
            payload: serde_json::from_str(&payload_json)
                .map_err(|err| SqliteStoreError::Corrupt(format!("invalid payload_json: {err}")))?,
            occurred_at: parse_timestamp(&occurred_at)?,
            attempt_count: u32::try_from(attempt_count)
                .map_err(|_| SqliteStoreError::Corrupt("negative attempt_count".to_string()))?,
            last_error,
            dispatched_at: dispatched_at.map(|s| parse_timestamp(&s)).transpose()?,
            next_visible_at: parse_timestamp(&next_visible_at)?,
        })
    })();

    Ok(built)
}

// ============================================================================
// SECTION: JobRepository
// ============================================================================

impl JobRepository for SqliteIntakeStore {
    fn save(&self, mut job: Job, correlation_id: Option<&str>) -> Result<Job, DomainError> {
        let events = job.take_pending_events();
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(SqliteStoreError::from)?;

        let expected_prior_version = i64::try_from(job.version()).unwrap_or(i64::MAX) - 1;
        let is_insert = expected_prior_version == 0;

        if is_insert {
            let result = tx.execute(
                "INSERT INTO jobs (
                    id, tenant_id, seller_id, channel, job_type, file_ref, rules_profile_id,
                    status, counters_total, counters_processed, counters_errors, counters_warnings,
                    idempotency_key, metadata_json, retry_of, retry_depth,
                    created_at, updated_at, completed_at, version
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20)",
                params![
                    job.id().to_string(),
                    job.tenant_id().as_str(),
                    job.seller_id().as_str(),
                    job.channel().as_str(),
                    job_type_str(job.job_type()),
                    job.file_ref().to_string(),
                    job.rules_profile_id().as_str(),
                    status_str(job.status()),
                    job.counters().total as i64,
                    job.counters().processed as i64,
                    job.counters().errors as i64,
                    job.counters().warnings as i64,
                    job.idempotency_key().as_str(),
                    serde_json::to_string(job.metadata().as_map()).map_err(|e| DomainError::Validation(e.to_string()))?,
                    job.retry_of().map(|id| id.to_string()),
                    job.retry_depth() as i64,
                    timestamp_to_rfc3339(job.created_at()),
                    timestamp_to_rfc3339(job.updated_at()),
                    job.completed_at().map(timestamp_to_rfc3339),
                    job.version() as i64,
                ],
            );
            match result {
                Ok(_) => {}
                Err(err) if is_unique_violation(&err) => {
                    return Err(DomainError::Validation("duplicate idempotency key for tenant".to_string()));
                }
                Err(err) => return Err(SqliteStoreError::from(err).into_domain()),
            }
        } else {
            let updated = tx
                .execute(
                    "UPDATE jobs SET
                        status = ?1, counters_total = ?2, counters_processed = ?3, counters_errors = ?4,
                        counters_warnings = ?5, metadata_json = ?6, updated_at = ?7, completed_at = ?8,
                        version = ?9
                     WHERE id = ?10 AND tenant_id = ?11 AND version = ?12",
                    params![
                        status_str(job.status()),
                        job.counters().total as i64,
                        job.counters().processed as i64,
                        job.counters().errors as i64,
                        job.counters().warnings as i64,
                        serde_json::to_string(job.metadata().as_map())
                            .map_err(|e| DomainError::Validation(e.to_string()))?,
                        timestamp_to_rfc3339(job.updated_at()),
                        job.completed_at().map(timestamp_to_rfc3339),
                        job.version() as i64,
                        job.id().to_string(),
                        job.tenant_id().as_str(),
                        expected_prior_version,
                    ],
                )
                .map_err(|err| SqliteStoreError::from(err).into_domain())?;
            if updated == 0 {
                return Err(DomainError::ConcurrencyConflict { job_id: job.id() });
            }
        }

        for event in &events {
            insert_outbox_row(&tx, event, correlation_id)?;
        }

        tx.commit().map_err(|err| SqliteStoreError::from(err).into_domain())?;
        drop(guard);
        Ok(job)
    }

    fn find_by_id(&self, tenant: &TenantId, id: JobId) -> Result<Option<Job>, DomainError> {
        let guard = self.lock()?;
        let row = guard
            .query_row(
                "SELECT * FROM jobs WHERE id = ?1",
                params![id.to_string()],
                |row| row_to_job(row),
            )
            .optional()
            .map_err(|err| SqliteStoreError::from(err).into_domain())?;
        drop(guard);

        let Some(job_result) = row else {
            return Ok(None);
        };
        let job = job_result.map_err(SqliteStoreError::into_domain)?;
        if job.tenant_id() != tenant {
            return Err(DomainError::TenantIsolation { job_id: id });
        }
        Ok(Some(job))
    }

    fn find_by_idempotency_key(&self, tenant: &TenantId, key: &ResolvedKey) -> Result<Option<Job>, DomainError> {
        let guard = self.lock()?;
        let row = guard
            .query_row(
                "SELECT * FROM jobs WHERE tenant_id = ?1 AND idempotency_key = ?2",
                params![tenant.as_str(), key.as_str()],
                |row| row_to_job(row),
            )
            .optional()
            .map_err(|err| SqliteStoreError::from(err).into_domain())?;
        drop(guard);
        row.transpose().map_err(SqliteStoreError::into_domain)
    }

    fn find_by_tenant(
        &self,
        tenant: &TenantId,
        filter: &JobFilter,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Job>, DomainError> {
        let guard = self.lock()?;
        let mut sql = "SELECT * FROM jobs WHERE tenant_id = ?1".to_string();
        if filter.status.is_some() {
            sql.push_str(" AND status = ?2");
        }
        if filter.channel.is_some() {
            sql.push_str(" AND channel = ?3");
        }
        if filter.job_type.is_some() {
            sql.push_str(" AND job_type = ?4");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ?5 OFFSET ?6");

        let mut statement = guard.prepare(&sql).map_err(|err| SqliteStoreError::from(err).into_domain())?;
        let status_param = filter.status.map(status_str).unwrap_or_default();
        let channel_param = filter.channel.as_ref().map(Channel::as_str).unwrap_or_default();
        let job_type_param = filter.job_type.map(job_type_str).unwrap_or_default();

        let rows = statement
            .query_map(
                params![
                    tenant.as_str(),
                    status_param,
                    channel_param,
                    job_type_param,
                    i64::from(limit),
                    i64::from(offset),
                ],
                |row| row_to_job(row),
            )
            .map_err(|err| SqliteStoreError::from(err).into_domain())?;

        let mut jobs = Vec::new();
        for row in rows {
            let job = row
                .map_err(|err| SqliteStoreError::from(err).into_domain())?
                .map_err(SqliteStoreError::into_domain)?;
            jobs.push(job);
        }
        Ok(jobs)
    }

    fn count_by_tenant(&self, tenant: &TenantId, filter: &JobFilter) -> Result<u64, DomainError> {
        let guard = self.lock()?;
        let mut sql = "SELECT COUNT(*) FROM jobs WHERE tenant_id = ?1".to_string();
        if filter.status.is_some() {
            sql.push_str(" AND status = ?2");
        }
        if filter.channel.is_some() {
            sql.push_str(" AND channel = ?3");
        }
        if filter.job_type.is_some() {
            sql.push_str(" AND job_type = ?4");
        }
        let status_param = filter.status.map(status_str).unwrap_or_default();
        let channel_param = filter.channel.as_ref().map(Channel::as_str).unwrap_or_default();
        let job_type_param = filter.job_type.map(job_type_str).unwrap_or_default();

        let count: i64 = guard
            .query_row(
                &sql,
                params![tenant.as_str(), status_param, channel_param, job_type_param],
                |row| row.get(0),
            )
            .map_err(|err| SqliteStoreError::from(err).into_domain())?;
        Ok(count as u64)
    }
}

fn insert_outbox_row(
    tx: &rusqlite::Transaction<'_>,
    event: &DomainEvent,
    correlation_id: Option<&str>,
) -> Result<(), DomainError> {
    let payload = serde_json::to_string(event).map_err(|e| DomainError::Validation(e.to_string()))?;
    tx.execute(
        "INSERT INTO event_outbox (
            id, tenant_id, event_type, event_version, correlation_id, payload_json,
            occurred_at, attempt_count, last_error, dispatched_at, next_visible_at
         ) VALUES (?1,?2,?3,?4,?5,?6,?7,0,NULL,NULL,?8)",
        params![
            event.id.to_string(),
            event.tenant_id.as_str(),
            event.event_type(),
            i64::from(event.schema_version),
            correlation_id,
            payload,
            timestamp_to_rfc3339(event.time),
            timestamp_to_rfc3339(event.time),
        ],
    )
    .map_err(|err| SqliteStoreError::from(err).into_domain())?;
    Ok(())
}

// ============================================================================
// SECTION: OutboxStore
// ============================================================================

impl OutboxStore for SqliteIntakeStore {
    fn select_batch(&self, limit: u32, max_attempts: u32, now: Timestamp) -> Result<Vec<OutboxEntry>, DomainError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(
                "SELECT * FROM event_outbox
                 WHERE dispatched_at IS NULL AND attempt_count < ?1 AND next_visible_at <= ?2
                 ORDER BY occurred_at ASC LIMIT ?3",
            )
            .map_err(|err| SqliteStoreError::from(err).into_domain())?;

        let rows = statement
            .query_map(params![i64::from(max_attempts), timestamp_to_rfc3339(now), i64::from(limit)], |row| {
                row_to_outbox_entry(row)
            })
            .map_err(|err| SqliteStoreError::from(err).into_domain())?;

        let mut entries = Vec::new();
        for row in rows {
            let entry = row
                .map_err(|err| SqliteStoreError::from(err).into_domain())?
                .map_err(SqliteStoreError::into_domain)?;
            entries.push(entry);
        }
        Ok(entries)
    }

    fn mark_dispatched(&self, id: Uuid, dispatched_at: Timestamp) -> Result<(), DomainError> {
        let guard = self.lock()?;
        guard
            .execute(
                "UPDATE event_outbox SET dispatched_at = ?1 WHERE id = ?2",
                params![timestamp_to_rfc3339(dispatched_at), id.to_string()],
            )
            .map_err(|err| SqliteStoreError::from(err).into_domain())?;
        Ok(())
    }

    fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        next_visible_at: Timestamp,
        max_attempts: u32,
    ) -> Result<(), DomainError> {
        let guard = self.lock()?;
        guard
            .execute(
                "UPDATE event_outbox SET
                    attempt_count = attempt_count + 1,
                    last_error = ?1,
                    next_visible_at = ?2,
                    dispatched_at = CASE WHEN attempt_count + 1 >= ?3 THEN ?2 ELSE dispatched_at END,
                    dead_lettered = CASE WHEN attempt_count + 1 >= ?3 THEN 1 ELSE dead_lettered END
                 WHERE id = ?4",
                params![error, timestamp_to_rfc3339(next_visible_at), i64::from(max_attempts), id.to_string()],
            )
            .map_err(|err| SqliteStoreError::from(err).into_domain())?;
        Ok(())
    }

    fn dead_letters(&self, tenant: &TenantId, limit: u32) -> Result<Vec<OutboxEntry>, DomainError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(
                "SELECT * FROM event_outbox
                 WHERE tenant_id = ?1 AND dead_lettered = 1
                 ORDER BY occurred_at DESC LIMIT ?2",
            )
            .map_err(|err| SqliteStoreError::from(err).into_domain())?;
        let rows = statement
            .query_map(params![tenant.as_str(), i64::from(limit)], |row| row_to_outbox_entry(row))
            .map_err(|err| SqliteStoreError::from(err).into_domain())?;
        let mut entries = Vec::new();
        for row in rows {
            let entry = row
                .map_err(|err| SqliteStoreError::from(err).into_domain())?
                .map_err(SqliteStoreError::into_domain)?;
            entries.push(entry);
        }
        Ok(entries)
    }

    fn purge_dispatched_before(&self, cutoff: Timestamp) -> Result<u64, DomainError> {
        let guard = self.lock()?;
        let removed = guard
            .execute(
                "DELETE FROM event_outbox WHERE dispatched_at IS NOT NULL AND dispatched_at < ?1",
                params![timestamp_to_rfc3339(cutoff)],
            )
            .map_err(|err| SqliteStoreError::from(err).into_domain())?;
        Ok(removed as u64)
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
        reason = "Test assertions on the SQLite job repository; a panic here is a test failure."
    )]

    use intake_core::ResolvedKey;
    use intake_core::SystemClock;

    use super::*;

    fn store() -> (SqliteIntakeStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("jobs.sqlite3");
        let store = SqliteIntakeStore::open(&SqliteStoreConfig::new(path)).expect("open store");
        (store, dir)
    }

    fn new_job() -> Job {
        let clock = SystemClock;
        Job::create(
            TenantId::parse("t_acme").expect("valid tenant"),
            SellerId::parse("seller-1").expect("valid seller"),
            Channel::parse("marketplace").expect("valid channel"),
            JobType::Validation,
            FileRef::parse("https://example.com/file.csv").expect("valid file ref"),
            RulesProfileId::parse("profile-1").expect("valid profile"),
            ResolvedKey::from_trusted("abcdef1234567890abcd".to_string()),
            Metadata::empty(),
            &clock,
        )
    }

    #[test]
    fn save_and_find_round_trips() {
        let (store, _dir) = store();
        let job = new_job();
        let tenant = job.tenant_id().clone();
        let id = job.id();
        let saved = store.save(job, Some("corr-1")).expect("save succeeds");
        assert_eq!(saved.version(), 1);

        let found = store.find_by_id(&tenant, id).expect("find succeeds").expect("job exists");
        assert_eq!(found.id(), id);
        assert_eq!(found.status(), JobStatus::Queued);
    }

    #[test]
    fn find_by_id_rejects_cross_tenant_access() {
        let (store, _dir) = store();
        let job = new_job();
        let id = job.id();
        store.save(job, None).expect("save succeeds");

        let other_tenant = TenantId::parse("t_other").expect("valid tenant");
        let err = store.find_by_id(&other_tenant, id).unwrap_err();
        assert!(matches!(err, DomainError::TenantIsolation { .. }));
    }

    #[test]
    fn save_appends_pending_event_to_outbox() {
        let (store, _dir) = store();
        let job = new_job();
        store.save(job, None).expect("save succeeds");

        let now = Timestamp::new(chrono::Utc::now());
        let batch = store.select_batch(10, 5, now).expect("select succeeds");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].event_type, "job.submitted");
    }

    #[test]
    fn save_rejects_stale_version() {
        let (store, _dir) = store();
        let job = new_job();
        let tenant = job.tenant_id().clone();
        let id = job.id();
        let saved = store.save(job, None).expect("save succeeds");

        // Re-fetch two independent copies of the same row and race them.
        let first = store.find_by_id(&tenant, id).expect("find succeeds").expect("job exists");
        let second = store.find_by_id(&tenant, id).expect("find succeeds").expect("job exists");
        let clock = SystemClock;
        let second = second.start(&clock).expect("start succeeds");
        store.save(second, None).expect("first writer wins");

        let stale = first.start(&clock).expect("start succeeds");
        let err = store.save(stale, None).unwrap_err();
        assert!(matches!(err, DomainError::ConcurrencyConflict { .. }));
        let _ = saved;
    }

    #[test]
    fn find_by_tenant_filters_by_status() {
        let (store, _dir) = store();
        let job = new_job();
        let tenant = job.tenant_id().clone();
        store.save(job, None).expect("save succeeds");

        let filter = JobFilter { status: Some(JobStatus::Running), ..JobFilter::default() };
        let results = store.find_by_tenant(&tenant, &filter, 10, 0).expect("query succeeds");
        assert!(results.is_empty());

        let filter = JobFilter { status: Some(JobStatus::Queued), ..JobFilter::default() };
        let results = store.find_by_tenant(&tenant, &filter, 10, 0).expect("query succeeds");
        assert_eq!(results.len(), 1);
    }
}
