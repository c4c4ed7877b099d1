// crates/intake-core/src/interfaces.rs
// ============================================================================
// Module: Job Intake Interfaces
// Description: Backend-agnostic ports the rest of the workspace implements:
// job repository, idempotency store, rate limiter, outbox store.
// Purpose: Define the contract surfaces used by the intake use cases without
// embedding backend-specific details.
// Dependencies: crate::job, crate::idempotency, crate::events, crate::errors
// ============================================================================

//! ## Overview
//! Interfaces define how the intake core integrates with external systems
//! without embedding backend-specific details. Implementations must enforce
//! tenant isolation and fail closed on ambiguous or missing data; the
//! concrete SQLite-backed implementations live in `intake-store-sqlite`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use uuid::Uuid;

use crate::errors::DomainError;
use crate::events::DomainEvent;
use crate::identifiers::JobId;
use crate::identifiers::TenantId;
use crate::idempotency::IdempotencyRecord;
use crate::idempotency::ResolvedKey;
use crate::job::Job;
use crate::job::JobFilter;
use crate::time::Timestamp;

// ============================================================================
// SECTION: Job Repository
// ============================================================================

/// Durable storage for job aggregates, co-persisting each job's pending
/// events into the outbox within the same transaction.
pub trait JobRepository: Send + Sync {
    /// Persists `job` and appends its pending events to the outbox in one
    /// transaction. `correlation_id`, if present, is stamped on every
    /// appended outbox row.
    ///
    /// Uses optimistic concurrency: the implementation must fail with
    /// [`DomainError::ConcurrencyConflict`] if the stored version does not
    /// equal `job.version() - 1` (or the row does not yet exist and
    /// `job.version() != 1`).
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::ConcurrencyConflict`] on a lost optimistic
    /// lock, or [`DomainError::StorageUnavailable`] if the backing store
    /// cannot be reached.
    fn save(&self, job: Job, correlation_id: Option<&str>) -> Result<Job, DomainError>;

    /// Loads a job by tenant and id.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::TenantIsolation`] if a row exists under `id`
    /// but belongs to a different tenant, even though the query predicate
    /// already scopes by `tenant`; this is a defense-in-depth check above
    /// whatever the storage layer enforces.
    fn find_by_id(&self, tenant: &TenantId, id: JobId) -> Result<Option<Job>, DomainError>;

    /// Secondary lookup by resolved idempotency key, used only to support
    /// diagnostics; the primary idempotency decision is made by the
    /// [`IdempotencyStore`].
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::StorageUnavailable`] if the backing store
    /// cannot be reached.
    fn find_by_idempotency_key(
        &self,
        tenant: &TenantId,
        key: &ResolvedKey,
    ) -> Result<Option<Job>, DomainError>;

    /// Lists jobs for a tenant matching `filter`, paginated.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::StorageUnavailable`] if the backing store
    /// cannot be reached.
    fn find_by_tenant(
        &self,
        tenant: &TenantId,
        filter: &JobFilter,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Job>, DomainError>;

    /// Counts jobs for a tenant matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::StorageUnavailable`] if the backing store
    /// cannot be reached.
    fn count_by_tenant(&self, tenant: &TenantId, filter: &JobFilter) -> Result<u64, DomainError>;
}

// ============================================================================
// SECTION: Idempotency Store
// ============================================================================

/// Durable `(tenant, resolved_key) -> response` store.
pub trait IdempotencyStore: Send + Sync {
    /// Returns the live (unexpired) record for `(tenant, key)`, if any.
    /// Expired records are treated as absent and may be lazily removed.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::StorageUnavailable`] if the backing store
    /// cannot be reached.
    fn get(&self, tenant: &TenantId, key: &ResolvedKey) -> Result<Option<IdempotencyRecord>, DomainError>;

    /// Atomically inserts a record if absent (`INSERT ... ON CONFLICT DO
    /// NOTHING` followed by a re-read). If an unexpired record already
    /// exists with the same `response_hash`, returns the existing record.
    /// If the hash differs, returns [`DomainError::IdempotencyConflict`].
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::IdempotencyConflict`] on a same-key,
    /// different-response race, or [`DomainError::StorageUnavailable`] if
    /// the backing store cannot be reached.
    fn put(
        &self,
        tenant: &TenantId,
        key: &ResolvedKey,
        payload: &serde_json::Value,
        ttl_seconds: i64,
    ) -> Result<IdempotencyRecord, DomainError>;

    /// Deletes the record for `(tenant, key)`, returning whether a row was
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::StorageUnavailable`] if the backing store
    /// cannot be reached.
    fn delete(&self, tenant: &TenantId, key: &ResolvedKey) -> Result<bool, DomainError>;
}

// ============================================================================
// SECTION: Rate Limiter
// ============================================================================

/// Point-in-time view of a rate-limit bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitInfo {
    /// Tokens currently available.
    pub remaining: u32,
    /// Unix timestamp, in seconds, when the bucket is expected to next
    /// have a token available (only meaningful when `remaining == 0`).
    pub reset_time: i64,
    /// Configured bucket capacity.
    pub limit: u32,
}

/// Per-`(tenant, resource)` token-bucket rate limiter.
pub trait RateLimiter: Send + Sync {
    /// Refills the bucket for elapsed time, then attempts to consume
    /// `tokens`. Returns `true` if the request may proceed.
    ///
    /// Implementations following the fail-open policy (§4.3) must catch
    /// backing-store errors internally, log a warning, and return `Ok(true)`
    /// rather than propagating [`DomainError::StorageUnavailable`], unless
    /// fail-open has been disabled for the deployment.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::StorageUnavailable`] only when fail-open is
    /// disabled and the backing store cannot be reached.
    fn check_and_consume(
        &self,
        tenant: &TenantId,
        resource: &str,
        tokens: u32,
    ) -> Result<bool, DomainError>;

    /// Returns the current bucket state without consuming tokens.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::StorageUnavailable`] if the backing store
    /// cannot be reached.
    fn info(&self, tenant: &TenantId, resource: &str) -> Result<RateLimitInfo, DomainError>;
}

// ============================================================================
// SECTION: Outbox Store
// ============================================================================

/// A durable row in the transactional outbox, ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    /// Outbox row identifier.
    pub id: Uuid,
    /// Tenant the entry belongs to.
    pub tenant_id: TenantId,
    /// CloudEvents `type`.
    pub event_type: String,
    /// Event schema version.
    pub event_version: u32,
    /// Caller-supplied correlation id, if any.
    pub correlation_id: Option<String>,
    /// The event, serialized.
    pub payload: serde_json::Value,
    /// When the underlying transition occurred.
    pub occurred_at: Timestamp,
    /// Number of delivery attempts made so far.
    pub attempt_count: u32,
    /// Most recent delivery error, if any.
    pub last_error: Option<String>,
    /// When the entry was successfully dispatched, or permanently failed.
    pub dispatched_at: Option<Timestamp>,
    /// Earliest time the entry becomes eligible for another delivery
    /// attempt.
    pub next_visible_at: Timestamp,
}

impl OutboxEntry {
    /// Reconstructs the [`DomainEvent`] this entry was derived from.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] if `payload` does not match the
    /// `DomainEvent` schema — this indicates the row was corrupted or
    /// written by an incompatible schema version.
    pub fn to_domain_event(&self) -> Result<DomainEvent, DomainError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| DomainError::Validation(format!("corrupt outbox payload: {e}")))
    }
}

/// Durable storage for outbox rows, drained by the dispatcher.
pub trait OutboxStore: Send + Sync {
    /// Selects up to `limit` undispatched entries with
    /// `attempt_count < max_attempts` and `next_visible_at <= now`, ordered
    /// by `occurred_at` ascending.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::StorageUnavailable`] if the backing store
    /// cannot be reached.
    fn select_batch(
        &self,
        limit: u32,
        max_attempts: u32,
        now: Timestamp,
    ) -> Result<Vec<OutboxEntry>, DomainError>;

    /// Marks an entry as successfully dispatched.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::StorageUnavailable`] if the backing store
    /// cannot be reached.
    fn mark_dispatched(&self, id: Uuid, dispatched_at: Timestamp) -> Result<(), DomainError>;

    /// Records a failed delivery attempt, bumping `attempt_count`, setting
    /// `last_error`, and scheduling `next_visible_at`. When the resulting
    /// `attempt_count >= max_attempts`, the entry must additionally be
    /// marked dispatched (to suppress further retries) so it surfaces only
    /// through the dead-letter query path.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::StorageUnavailable`] if the backing store
    /// cannot be reached.
    fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        next_visible_at: Timestamp,
        max_attempts: u32,
    ) -> Result<(), DomainError>;

    /// Returns permanently-failed entries (`attempt_count >= max_attempts`
    /// and `dispatched_at` set as a result) for the dead-letter query path.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::StorageUnavailable`] if the backing store
    /// cannot be reached.
    fn dead_letters(&self, tenant: &TenantId, limit: u32) -> Result<Vec<OutboxEntry>, DomainError>;

    /// Deletes dispatched entries older than `retention_days`, returning the
    /// count removed.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::StorageUnavailable`] if the backing store
    /// cannot be reached.
    fn purge_dispatched_before(&self, cutoff: Timestamp) -> Result<u64, DomainError>;
}
