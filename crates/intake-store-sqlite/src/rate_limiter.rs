// crates/intake-store-sqlite/src/rate_limiter.rs
// ============================================================================
// Module: SQLite Token-Bucket Rate Limiter
// Description: Per-`(tenant, resource)` token bucket with linear refill,
// backed by its own `SQLite` database and connection.
// Purpose: Enforce submission quotas without a shared-state dependency
// (Redis, etc.), fail-open on storage errors per the concurrency model.
// Dependencies: intake-core, rusqlite, tracing
// ============================================================================

//! ## Overview
//! One row per `(tenant, resource)` holds the bucket's current token count
//! and the epoch millisecond it was last refilled. `check_and_consume`
//! refills linearly for elapsed time, caps at the configured limit, then
//! attempts to subtract the requested token count — all inside one
//! transaction so concurrent callers serialize correctly. Storage failures
//! are swallowed and logged per the fail-open policy unless the deployment
//! disables it.

use std::sync::Arc;
use std::sync::Mutex;

use intake_core::DomainError;
use intake_core::RateLimitInfo;
use intake_core::RateLimiter;
use intake_core::TenantId;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;

use crate::config::SqliteStoreConfig;
use crate::error::SqliteStoreError;
use crate::schema::initialize_rate_limit_schema;
use crate::schema::open_and_initialize_with;

/// Bucket capacity and refill rate for one resource class.
#[derive(Debug, Clone, Copy)]
pub struct BucketPolicy {
    /// Maximum tokens the bucket can hold.
    pub limit: u32,
    /// Seconds over which the bucket fully refills from empty.
    pub window_seconds: u32,
}

impl BucketPolicy {
    /// Builds a policy that grants `limit` tokens per `window_seconds`.
    #[must_use]
    pub const fn new(limit: u32, window_seconds: u32) -> Self {
        Self { limit, window_seconds }
    }

    fn tokens_per_ms(self) -> f64 {
        f64::from(self.limit) / (f64::from(self.window_seconds) * 1000.0)
    }
}

/// Resolves the [`BucketPolicy`] to apply for a given resource name.
pub trait PolicyResolver: Send + Sync {
    /// Returns the policy for `resource`, or a deployment-wide default.
    fn resolve(&self, resource: &str) -> BucketPolicy;
}

/// A [`PolicyResolver`] that applies the same policy to every resource.
#[derive(Debug, Clone, Copy)]
pub struct FixedPolicy(pub BucketPolicy);

impl PolicyResolver for FixedPolicy {
    fn resolve(&self, _resource: &str) -> BucketPolicy {
        self.0
    }
}

/// `SQLite`-backed token-bucket rate limiter.
///
/// Owns its own connection, separate from the job/outbox/idempotency
/// stores, per the concurrency model's rule that the limiter is on the hot
/// path of every request and must never contend with job-write traffic.
#[derive(Clone)]
pub struct SqliteRateLimiter<P: PolicyResolver> {
    connection: Arc<Mutex<Connection>>,
    policy: Arc<P>,
    fail_open: bool,
}

impl<P: PolicyResolver> SqliteRateLimiter<P> {
    /// Opens (creating if absent) the rate-limit database at `config.path`.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] if the database cannot be opened or
    /// initialized.
    pub fn open(config: &SqliteStoreConfig, policy: P, fail_open: bool) -> Result<Self, SqliteStoreError> {
        let connection = open_and_initialize_with(config, initialize_rate_limit_schema)?;
        Ok(Self { connection: Arc::new(Mutex::new(connection)), policy: Arc::new(policy), fail_open })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, DomainError> {
        self.connection
            .lock()
            .map_err(|_| DomainError::StorageUnavailable("rate limiter connection mutex poisoned".to_string()))
    }

    fn try_consume(&self, tenant: &TenantId, resource: &str, tokens: u32) -> Result<bool, SqliteStoreError> {
        let policy = self.policy.resolve(resource);
        let now_ms = chrono_now_ms();

        let guard = self.lock().map_err(|_| SqliteStoreError::Db("mutex poisoned".to_string()))?;
        let tx = guard.unchecked_transaction().map_err(SqliteStoreError::from)?;

        let existing: Option<(f64, i64)> = tx
            .query_row(
                "SELECT tokens, updated_at_epoch_ms FROM rate_limit_buckets WHERE tenant_id = ?1 AND resource = ?2",
                params![tenant.as_str(), resource],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(SqliteStoreError::from)?;

        let (current_tokens, last_update_ms) = existing.unwrap_or((f64::from(policy.limit), now_ms));
        let elapsed_ms = (now_ms - last_update_ms).max(0) as f64;
        let refilled = (current_tokens + elapsed_ms * policy.tokens_per_ms()).min(f64::from(policy.limit));

        let allowed = refilled >= f64::from(tokens);
        let remaining_tokens = if allowed { refilled - f64::from(tokens) } else { refilled };

        tx.execute(
            "INSERT INTO rate_limit_buckets (tenant_id, resource, tokens, limit_value, window_seconds, updated_at_epoch_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(tenant_id, resource) DO UPDATE SET
                tokens = excluded.tokens,
                limit_value = excluded.limit_value,
                window_seconds = excluded.window_seconds,
                updated_at_epoch_ms = excluded.updated_at_epoch_ms",
            params![
                tenant.as_str(),
                resource,
                remaining_tokens,
                i64::from(policy.limit),
                i64::from(policy.window_seconds),
                now_ms,
            ],
        )
        .map_err(SqliteStoreError::from)?;

        tx.commit().map_err(SqliteStoreError::from)?;
        drop(guard);
        Ok(allowed)
    }

    fn bucket_info(&self, tenant: &TenantId, resource: &str) -> Result<RateLimitInfo, SqliteStoreError> {
        let policy = self.policy.resolve(resource);
        let now_ms = chrono_now_ms();

        let guard = self.lock().map_err(|_| SqliteStoreError::Db("mutex poisoned".to_string()))?;
        let existing: Option<(f64, i64)> = guard
            .query_row(
                "SELECT tokens, updated_at_epoch_ms FROM rate_limit_buckets WHERE tenant_id = ?1 AND resource = ?2",
                params![tenant.as_str(), resource],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(SqliteStoreError::from)?;
        drop(guard);

        let (current_tokens, last_update_ms) = existing.unwrap_or((f64::from(policy.limit), now_ms));
        let elapsed_ms = (now_ms - last_update_ms).max(0) as f64;
        let refilled = (current_tokens + elapsed_ms * policy.tokens_per_ms()).min(f64::from(policy.limit));
        let remaining = refilled.floor().max(0.0) as u32;

        let reset_time = if remaining == 0 {
            let ms_to_one_token = (1.0 / policy.tokens_per_ms()) as i64;
            (now_ms + ms_to_one_token) / 1000
        } else {
            now_ms / 1000
        };

        Ok(RateLimitInfo { remaining, reset_time, limit: policy.limit })
    }
}

fn chrono_now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl<P: PolicyResolver> RateLimiter for SqliteRateLimiter<P> {
    fn check_and_consume(&self, tenant: &TenantId, resource: &str, tokens: u32) -> Result<bool, DomainError> {
        match self.try_consume(tenant, resource, tokens) {
            Ok(allowed) => Ok(allowed),
            Err(err) if self.fail_open => {
                tracing::warn!(
                    tenant = tenant.as_str(),
                    resource,
                    error = %err,
                    "rate limiter storage error, failing open"
                );
                Ok(true)
            }
            Err(err) => Err(err.into_domain()),
        }
    }

    fn info(&self, tenant: &TenantId, resource: &str) -> Result<RateLimitInfo, DomainError> {
        self.bucket_info(tenant, resource).map_err(SqliteStoreError::into_domain)
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
        reason = "Test assertions on the SQLite rate limiter; a panic here is a test failure."
    )]

    use super::*;

    fn limiter(limit: u32, window_seconds: u32, fail_open: bool) -> (SqliteRateLimiter<FixedPolicy>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rate_limit.sqlite3");
        let limiter = SqliteRateLimiter::open(&SqliteStoreConfig::new(path), FixedPolicy(BucketPolicy::new(limit, window_seconds)), fail_open)
            .expect("open store");
        (limiter, dir)
    }

    fn tenant() -> TenantId {
        TenantId::parse("t_acme").expect("valid tenant")
    }

    #[test]
    fn denies_once_tokens_exhausted() {
        let (limiter, _dir) = limiter(2, 60, false);
        assert!(limiter.check_and_consume(&tenant(), "submit", 1).expect("ok"));
        assert!(limiter.check_and_consume(&tenant(), "submit", 1).expect("ok"));
        assert!(!limiter.check_and_consume(&tenant(), "submit", 1).expect("ok"));
    }

    #[test]
    fn buckets_are_isolated_per_resource() {
        let (limiter, _dir) = limiter(1, 60, false);
        assert!(limiter.check_and_consume(&tenant(), "submit", 1).expect("ok"));
        assert!(!limiter.check_and_consume(&tenant(), "submit", 1).expect("ok"));
        assert!(limiter.check_and_consume(&tenant(), "status", 1).expect("ok"));
    }

    #[test]
    fn info_reports_remaining_tokens() {
        let (limiter, _dir) = limiter(3, 60, false);
        assert!(limiter.check_and_consume(&tenant(), "submit", 2).expect("ok"));
        let info = limiter.info(&tenant(), "submit").expect("info succeeds");
        assert_eq!(info.limit, 3);
        assert_eq!(info.remaining, 1);
    }

    #[test]
    fn buckets_are_isolated_per_tenant() {
        let (limiter, _dir) = limiter(1, 60, false);
        assert!(limiter.check_and_consume(&tenant(), "submit", 1).expect("ok"));
        let other = TenantId::parse("t_other").expect("valid tenant");
        assert!(limiter.check_and_consume(&other, "submit", 1).expect("ok"));
    }
}
