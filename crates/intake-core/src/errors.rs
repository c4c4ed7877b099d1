// crates/intake-core/src/errors.rs
// ============================================================================
// Module: Job Intake Domain Errors
// Description: Shared error taxonomy for the idempotency resolver, the job
// aggregate, and the backend-agnostic repository/store/limiter ports.
// Purpose: Give every layer above the domain a single, typed vocabulary to
// map onto transport-level responses.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Every error variant here corresponds to exactly one row of the error
//! taxonomy: trigger condition, HTTP mapping, and whether the message is
//! allowed to carry caller-supplied bytes (it never is).

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::identifiers::JobId;
use crate::identifiers::TenantId;
use crate::job::JobStatus;

// ============================================================================
// SECTION: Domain Error
// ============================================================================

/// Errors raised by the job intake domain layer.
///
/// Messages never echo caller-supplied idempotency keys, file references, or
/// other untrusted input; callers needing diagnostic detail should consult
/// structured log fields instead.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A value object or request field failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// A caller-supplied idempotency key was rejected under `reject` compat
    /// mode. The message deliberately omits the key.
    #[error("invalid idempotency key format")]
    InvalidIdempotencyKey,

    /// The rate-limit bucket for `(tenant, resource)` had no tokens left.
    #[error("rate limit exceeded for resource {resource}")]
    RateLimitExceeded {
        /// Resource the limit was enforced on.
        resource: String,
        /// Unix timestamp, in seconds, when the bucket is expected to refill.
        reset_time: i64,
    },

    /// A `put` under the same `(tenant, key)` saw a different response hash
    /// than what is already stored.
    #[error("idempotency conflict for tenant {tenant}")]
    IdempotencyConflict {
        /// Tenant the conflicting record belongs to.
        tenant: TenantId,
    },

    /// A job transition was attempted that the state table disallows.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Status the job was in.
        from: JobStatus,
        /// Status the caller attempted to move to.
        to: JobStatus,
    },

    /// A business rule outside the state machine was violated (file
    /// unreachable, retry depth exceeded, and similar).
    #[error("business rule violation: {0}")]
    BusinessRuleViolation(String),

    /// An operation addressed a tenant's data using another tenant's
    /// credentials. Raised even when the storage layer itself would have
    /// refused the row, as defense in depth.
    #[error("tenant isolation violation for job {job_id}")]
    TenantIsolation {
        /// Job the caller attempted to access.
        job_id: JobId,
    },

    /// Input matched a known attack pattern (formula injection, path
    /// traversal, dangerous extension) rather than merely failing
    /// validation.
    #[error("security violation: {0}")]
    SecurityViolation(String),

    /// No row exists for the given tenant and identifier.
    #[error("job {job_id} not found")]
    AggregateNotFound {
        /// Identifier that was looked up.
        job_id: JobId,
    },

    /// An optimistic-concurrency `save` lost the race; the in-memory
    /// `version` no longer matches the stored row.
    #[error("concurrent modification of job {job_id}")]
    ConcurrencyConflict {
        /// Job whose version was stale.
        job_id: JobId,
    },

    /// A backing store (database, rate limiter) could not be reached.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl DomainError {
    /// Returns the stable machine-readable code used in the HTTP error
    /// envelope and in structured logs.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::InvalidIdempotencyKey => "VALIDATION_ERROR",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::IdempotencyConflict { .. } | Self::InvalidStateTransition { .. } => "CONFLICT",
            Self::BusinessRuleViolation(_) => "UNPROCESSABLE",
            Self::TenantIsolation { .. } => "TENANT_ISOLATION_VIOLATION",
            Self::SecurityViolation(_) => "SECURITY_VIOLATION",
            Self::AggregateNotFound { .. } => "NOT_FOUND",
            Self::ConcurrencyConflict { .. } => "CONFLICT",
            Self::StorageUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    /// Returns whether this error should additionally be surfaced through
    /// the security audit path (§7 taxonomy: `TenantIsolationError` and
    /// `SecurityViolation` rows).
    #[must_use]
    pub const fn is_security_relevant(&self) -> bool {
        matches!(self, Self::TenantIsolation { .. } | Self::SecurityViolation(_))
    }
}
