// crates/intake-core/src/inmemory.rs
// ============================================================================
// Module: In-Process Backends
// Description: Per-process rate limiter and idempotency store, used by
// default for single-instance deployments and throughout the test suite.
// Purpose: Give every port a backend that needs no database, so tests (and
// local/dev runs) never depend on `intake-store-sqlite`.
// Dependencies: std::sync
// ============================================================================

//! ## Overview
//! Grounded on the teacher's own in-process rate limiter
//! (`decision-gate-mcp::server`'s `RateLimiter`/`RateLimitBucket`: a mutexed
//! `HashMap` keyed by caller, periodic eviction once a capacity bound is
//! exceeded). The idempotency store follows the same shape. Neither survives
//! a process restart; a replicated deployment needs the durable
//! `intake-store-sqlite` backends instead (§5).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::errors::DomainError;
use crate::identifiers::TenantId;
use crate::idempotency::IdempotencyRecord;
use crate::idempotency::ResolvedKey;
use crate::interfaces::IdempotencyStore;
use crate::interfaces::RateLimitInfo;
use crate::interfaces::RateLimiter;
use crate::time::Clock;
use crate::time::SystemClock;
use crate::time::Timestamp;

/// Upper bound on tracked buckets/records before the oldest entries are
/// evicted, mirroring the teacher's `max_entries` bound.
const DEFAULT_MAX_ENTRIES: usize = 100_000;

// ============================================================================
// SECTION: In-Memory Rate Limiter
// ============================================================================

struct Bucket {
    tokens: f64,
    last_refill: Timestamp,
    last_seen: Timestamp,
}

/// Per-process token-bucket rate limiter, keyed by `(tenant, resource)`.
pub struct InMemoryRateLimiter {
    limit: u32,
    window_seconds: i64,
    max_entries: usize,
    fail_open: bool,
    clock: Arc<dyn Clock>,
    buckets: Mutex<HashMap<(TenantId, String), Bucket>>,
}

impl InMemoryRateLimiter {
    /// Builds a limiter with a fixed `limit` tokens per `window_seconds`,
    /// evicting the least-recently-seen buckets once `max_entries` is
    /// exceeded.
    #[must_use]
    pub fn new(limit: u32, window_seconds: i64, fail_open: bool) -> Self {
        Self::with_clock(limit, window_seconds, fail_open, Arc::new(SystemClock))
    }

    /// Builds a limiter driven by an explicit clock, for deterministic
    /// tests.
    #[must_use]
    pub fn with_clock(limit: u32, window_seconds: i64, fail_open: bool, clock: Arc<dyn Clock>) -> Self {
        Self { limit, window_seconds, max_entries: DEFAULT_MAX_ENTRIES, fail_open, clock, buckets: Mutex::new(HashMap::new()) }
    }

    fn refill(&self, bucket: &mut Bucket, now: Timestamp) {
        let elapsed = now.seconds_since(&bucket.last_refill).max(0);
        if elapsed > 0 && self.window_seconds > 0 {
            #[allow(clippy::cast_precision_loss, reason = "token/second counts stay well within f64 precision")]
            let refilled = (elapsed as f64 / self.window_seconds as f64) * f64::from(self.limit);
            bucket.tokens = (bucket.tokens + refilled).min(f64::from(self.limit));
            bucket.last_refill = now;
        }
    }
}

impl RateLimiter for InMemoryRateLimiter {
    fn check_and_consume(&self, tenant: &TenantId, resource: &str, tokens: u32) -> Result<bool, DomainError> {
        let now = self.clock.now();
        let Ok(mut buckets) = self.buckets.lock() else {
            return if self.fail_open {
                Ok(true)
            } else {
                Err(DomainError::StorageUnavailable("rate limiter poisoned".to_string()))
            };
        };

        if buckets.len() > self.max_entries {
            let cutoff_seconds = self.window_seconds.saturating_mul(2).max(1);
            buckets.retain(|_, bucket| now.seconds_since(&bucket.last_seen) <= cutoff_seconds);
        }

        let key = (tenant.clone(), resource.to_string());
        let bucket =
            buckets.entry(key).or_insert_with(|| Bucket { tokens: f64::from(self.limit), last_refill: now, last_seen: now });
        self.refill(bucket, now);
        bucket.last_seen = now;

        let requested = f64::from(tokens);
        if bucket.tokens >= requested {
            bucket.tokens -= requested;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn info(&self, tenant: &TenantId, resource: &str) -> Result<RateLimitInfo, DomainError> {
        let now = self.clock.now();
        let Ok(mut buckets) = self.buckets.lock() else {
            return Err(DomainError::StorageUnavailable("rate limiter poisoned".to_string()));
        };
        let key = (tenant.clone(), resource.to_string());
        let bucket =
            buckets.entry(key).or_insert_with(|| Bucket { tokens: f64::from(self.limit), last_refill: now, last_seen: now });
        self.refill(bucket, now);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, reason = "tokens is bounded by self.limit above")]
        let remaining = bucket.tokens.floor() as u32;
        let reset_time = if remaining > 0 { now.as_datetime().timestamp() } else { now.plus_seconds(self.window_seconds).as_datetime().timestamp() };
        Ok(RateLimitInfo { remaining, reset_time, limit: self.limit })
    }
}

// ============================================================================
// SECTION: In-Memory Idempotency Store
// ============================================================================

/// Per-process `(tenant, resolved_key) -> response` store.
pub struct InMemoryIdempotencyStore {
    clock: Arc<dyn Clock>,
    records: Mutex<HashMap<(TenantId, ResolvedKey), IdempotencyRecord>>,
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryIdempotencyStore {
    /// Builds an empty store backed by the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Builds an empty store driven by an explicit clock, for deterministic
    /// tests.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock, records: Mutex::new(HashMap::new()) }
    }
}

impl IdempotencyStore for InMemoryIdempotencyStore {
    fn get(&self, tenant: &TenantId, key: &ResolvedKey) -> Result<Option<IdempotencyRecord>, DomainError> {
        let records =
            self.records.lock().map_err(|_| DomainError::StorageUnavailable("idempotency store poisoned".to_string()))?;
        let now = self.clock.now();
        Ok(records.get(&(tenant.clone(), key.clone())).filter(|record| !record.is_expired(now)).cloned())
    }

    fn put(
        &self,
        tenant: &TenantId,
        key: &ResolvedKey,
        payload: &serde_json::Value,
        ttl_seconds: i64,
    ) -> Result<IdempotencyRecord, DomainError> {
        let now = self.clock.now();
        let response_hash = crate::idempotency::compute_response_hash(payload)?;
        let mut records =
            self.records.lock().map_err(|_| DomainError::StorageUnavailable("idempotency store poisoned".to_string()))?;

        let map_key = (tenant.clone(), key.clone());
        if let Some(existing) = records.get(&map_key) {
            if !existing.is_expired(now) {
                return if crate::idempotency::hashes_match(&existing.response_hash, &response_hash) {
                    Ok(existing.clone())
                } else {
                    Err(DomainError::IdempotencyConflict { tenant: tenant.clone() })
                };
            }
        }

        let record = IdempotencyRecord {
            tenant_id: tenant.clone(),
            key: key.clone(),
            response_hash,
            response_payload: payload.clone(),
            created_at: now,
            expires_at: now.plus_seconds(ttl_seconds),
        };
        records.insert(map_key, record.clone());
        Ok(record)
    }

    fn delete(&self, tenant: &TenantId, key: &ResolvedKey) -> Result<bool, DomainError> {
        let mut records =
            self.records.lock().map_err(|_| DomainError::StorageUnavailable("idempotency store poisoned".to_string()))?;
        Ok(records.remove(&(tenant.clone(), key.clone())).is_some())
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
        reason = "Test assertions on in-memory backends; a panic here is a test failure."
    )]

    use super::*;
    use crate::time::FixedClock;

    fn tenant() -> TenantId {
        TenantId::parse("t_acme").expect("valid")
    }

    #[test]
    fn rate_limiter_denies_once_tokens_exhausted() {
        let limiter = InMemoryRateLimiter::new(2, 60, false);
        assert!(limiter.check_and_consume(&tenant(), "submit", 1).expect("ok"));
        assert!(limiter.check_and_consume(&tenant(), "submit", 1).expect("ok"));
        assert!(!limiter.check_and_consume(&tenant(), "submit", 1).expect("ok"));
    }

    #[test]
    fn rate_limiter_refills_after_window() {
        let clock = Arc::new(FixedClock::new(Timestamp::new(chrono::DateTime::from_timestamp(0, 0).expect("epoch"))));
        let limiter = InMemoryRateLimiter::with_clock(1, 10, false, clock.clone());
        assert!(limiter.check_and_consume(&tenant(), "submit", 1).expect("ok"));
        assert!(!limiter.check_and_consume(&tenant(), "submit", 1).expect("ok"));
        clock.advance(10);
        assert!(limiter.check_and_consume(&tenant(), "submit", 1).expect("ok"));
    }

    #[test]
    fn idempotency_store_replays_same_payload() {
        let store = InMemoryIdempotencyStore::new();
        let key = ResolvedKey::from_trusted("abcdef1234567890abcd".to_string());
        let payload = serde_json::json!({"job_id": "x"});
        let first = store.put(&tenant(), &key, &payload, 3600).expect("ok");
        let second = store.put(&tenant(), &key, &payload, 3600).expect("ok");
        assert_eq!(first.response_hash, second.response_hash);
    }

    #[test]
    fn idempotency_store_conflicts_on_different_payload() {
        let store = InMemoryIdempotencyStore::new();
        let key = ResolvedKey::from_trusted("abcdef1234567890abcd".to_string());
        store.put(&tenant(), &key, &serde_json::json!({"job_id": "x"}), 3600).expect("ok");
        let err = store.put(&tenant(), &key, &serde_json::json!({"job_id": "y"}), 3600).unwrap_err();
        assert!(matches!(err, DomainError::IdempotencyConflict { .. }));
    }
}
