// crates/intake-api/src/routes/health.rs
// ============================================================================
// Module: Health and Readiness Routes
// Description: Liveness and per-dependency readiness checks.
// Purpose: Let a load balancer or orchestrator distinguish "process is up"
// from "process can actually serve traffic".
// Dependencies: axum, intake-core
// ============================================================================

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use intake_core::JobFilter;
use intake_core::TenantId;

use crate::dto::DependencyStatus;
use crate::dto::HealthResponse;
use crate::dto::ReadyResponse;
use crate::state::AppState;

/// Tenant used only to probe the rate limiter's backing store; no real
/// tenant is ever provisioned under this id.
const READINESS_PROBE_TENANT: &str = "t_system_readiness";
const READINESS_PROBE_RESOURCE: &str = "readiness_probe";

/// `GET /health`. Always `200` once the process is accepting connections;
/// never consults a backing store.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

/// `GET /ready`. Probes the job repository and rate limiter, returning `200`
/// with `status: "ready"` only if both are `Ok`, otherwise `503` with the
/// per-dependency breakdown.
pub async fn ready(State(state): State<AppState>) -> Response {
    let database = probe_database(&state);
    let rate_limiter = probe_rate_limiter(&state);
    ready_response(database, rate_limiter)
}

fn ready_response(database: DependencyStatus, rate_limiter: DependencyStatus) -> Response {
    if database == DependencyStatus::Ok && rate_limiter == DependencyStatus::Ok {
        (StatusCode::OK, Json(ReadyResponse { status: "ready", database, rate_limiter })).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(ReadyResponse { status: "degraded", database, rate_limiter }))
            .into_response()
    }
}

fn probe_database(state: &AppState) -> DependencyStatus {
    let Ok(tenant) = TenantId::parse(READINESS_PROBE_TENANT) else {
        return DependencyStatus::Down;
    };
    match state.jobs.count_by_tenant(&tenant, &JobFilter::default()) {
        Ok(_) => DependencyStatus::Ok,
        Err(err) => {
            tracing::warn!(error = %err, "readiness probe: database unreachable");
            DependencyStatus::Down
        }
    }
}

fn probe_rate_limiter(state: &AppState) -> DependencyStatus {
    let Ok(tenant) = TenantId::parse(READINESS_PROBE_TENANT) else {
        return DependencyStatus::Down;
    };
    match state.rate_limiter.info(&tenant, READINESS_PROBE_RESOURCE) {
        Ok(_) => DependencyStatus::Ok,
        Err(err) => {
            tracing::warn!(error = %err, "readiness probe: rate limiter unreachable");
            DependencyStatus::Degraded
        }
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
        reason = "Test assertions on health/ready responses; a panic here is a test failure."
    )]

    use axum::body::to_bytes;

    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body readable");
        serde_json::from_slice(&bytes).expect("body is valid json")
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let Json(body) = health().await;
        assert_eq!(body.status, "healthy");
    }

    #[tokio::test]
    async fn ready_response_is_200_ready_when_every_dependency_is_ok() {
        let response = ready_response(DependencyStatus::Ok, DependencyStatus::Ok);
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ready");
        assert_eq!(body["database"], "ok");
        assert_eq!(body["rate_limiter"], "ok");
    }

    #[tokio::test]
    async fn ready_response_is_503_when_database_is_down() {
        let response = ready_response(DependencyStatus::Down, DependencyStatus::Ok);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["database"], "down");
    }

    #[tokio::test]
    async fn ready_response_is_503_when_rate_limiter_is_degraded() {
        let response = ready_response(DependencyStatus::Ok, DependencyStatus::Degraded);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["rate_limiter"], "degraded");
    }
}
