// crates/intake-api/src/lib.rs
// ============================================================================
// Crate: intake-api
// Description: HTTP surface for the job intake service — submit/get/retry/
// list/stream routes, authentication, and the error/request-context
// middleware that wraps them.
// Dependencies: axum, tower-http, intake-core, intake-config, intake-dispatch
// ============================================================================

//! ## Overview
//! `intake-api` owns nothing durable itself; every handler is a thin
//! adapter over the ports in [`intake_core::interfaces`], assembled once at
//! startup into [`state::AppState`]. Running the HTTP server (binding the
//! listener, wiring `intake-store-sqlite` backends, starting the
//! `intake-dispatch` worker) is the composition root's job, which lives in
//! `intake-cli`.

pub mod auth;
pub mod broadcast_subscriber;
pub mod context;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

use axum::Router;
use axum::middleware::from_fn;
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::routing::post;
use intake_config::CorsConfig;

pub use auth::JwtVerifier;
pub use broadcast_subscriber::BroadcastSubscriber;
pub use state::AppState;
pub use state::SubmitPolicy;

/// Builds the complete router: every `/v1/jobs*` route, `/health`/`/ready`,
/// and the trusted-host/CORS/access-log middleware stack, in the order they
/// must run (trusted host first, so CORS and logging never process a
/// request this service will not serve).
#[must_use]
pub fn build_router(state: AppState, cors: &CorsConfig) -> Router {
    let jobs = Router::new()
        .route("/v1/jobs", post(routes::jobs::submit_job).get(routes::jobs::list_jobs))
        .route("/v1/jobs/stream", get(routes::jobs::stream_jobs))
        .route("/v1/jobs/:job_id", get(routes::jobs::get_job))
        .route("/v1/jobs/:job_id/retry", post(routes::jobs::retry_job));

    let health = Router::new().route("/health", get(routes::health::health)).route("/ready", get(routes::health::ready));

    Router::new()
        .merge(jobs)
        .merge(health)
        .layer(middleware::build_cors_layer(cors))
        .layer(from_fn(middleware::access_log))
        .layer(from_fn_with_state(state.clone(), middleware::trusted_host_layer))
        .with_state(state)
}
