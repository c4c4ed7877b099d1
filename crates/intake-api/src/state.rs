// crates/intake-api/src/state.rs
// ============================================================================
// Module: Application State
// Description: The composition root's collaborators, shared read-only across
// every request via axum's `State` extractor.
// Purpose: One struct assembled once at startup holds every port
// implementation; no global singletons, per the composition-root notes.
// Dependencies: intake-core, intake-config, axum
// ============================================================================

use std::sync::Arc;

use intake_core::CompatMode;
use intake_core::DomainEvent;
use intake_core::IdempotencyStore;
use intake_core::JobRepository;
use intake_core::OutboxStore;
use intake_core::RateLimiter;
use tokio::sync::broadcast;

use crate::auth::JwtVerifier;

/// Submission-path tuning that does not belong to any single collaborator.
#[derive(Debug, Clone, Copy)]
pub struct SubmitPolicy {
    /// Idempotency-key compatibility mode.
    pub compat_mode: CompatMode,
    /// TTL, in seconds, applied to freshly written idempotency records.
    pub idempotency_ttl_seconds: i64,
    /// Maximum retry-chain depth before `retry()` is rejected.
    pub max_retry_depth: u32,
}

/// Collaborators assembled once at startup and shared by every handler.
#[derive(Clone)]
pub struct AppState {
    /// Durable job/outbox storage.
    pub jobs: Arc<dyn JobRepository>,
    /// Durable idempotency record storage.
    pub idempotency: Arc<dyn IdempotencyStore>,
    /// Per-tenant submission rate limiter.
    pub rate_limiter: Arc<dyn RateLimiter>,
    /// Outbox storage, consulted by the `/ready` dependency breakdown.
    pub outbox: Arc<dyn OutboxStore>,
    /// Bearer token verifier.
    pub jwt_verifier: Arc<JwtVerifier>,
    /// Fan-out for the live `/v1/jobs/stream` endpoint. The dispatcher is
    /// wired with a matching `BroadcastSubscriber` at the composition root.
    pub events: broadcast::Sender<DomainEvent>,
    /// Submission-path tuning.
    pub policy: SubmitPolicy,
    /// Hostnames accepted in the `Host` header; empty disables the check.
    pub trusted_hosts: Arc<Vec<String>>,
}

impl AppState {
    /// Assembles application state from its collaborators.
    #[must_use]
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        idempotency: Arc<dyn IdempotencyStore>,
        rate_limiter: Arc<dyn RateLimiter>,
        outbox: Arc<dyn OutboxStore>,
        jwt_verifier: Arc<JwtVerifier>,
        policy: SubmitPolicy,
        trusted_hosts: Vec<String>,
    ) -> Self {
        let (events, _receiver) = broadcast::channel(1024);
        Self { jobs, idempotency, rate_limiter, outbox, jwt_verifier, events, policy, trusted_hosts: Arc::new(trusted_hosts) }
    }
}
