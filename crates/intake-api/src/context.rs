// crates/intake-api/src/context.rs
// ============================================================================
// Module: Request Context
// Description: Per-request tenant, request id, trace id, and authenticated
// caller, extracted once at the handler boundary.
// Purpose: Flow one immutable context through every use case call instead of
// re-deriving it (or reaching for thread-local state) inside handlers.
// Dependencies: axum
// ============================================================================

//! ## Overview
//! Grounded on `decision-gate-mcp::auth::RequestContext`, adapted from that
//! module's transport-agnostic (stdio/HTTP/SSE) shape to this service's
//! HTTP-only surface: tenant id and bearer auth replace peer IP / mTLS
//! subject as the primary identity signals.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use intake_core::TenantId;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::state::AppState;

/// Upper bound on any single header value this service reads, beyond
/// whatever the HTTP layer itself enforces.
const MAX_HEADER_VALUE_BYTES: usize = 4 * 1024;

/// Per-request context threaded through every use case call.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Tenant the request is scoped to.
    pub tenant_id: TenantId,
    /// Request identifier: echoed from `X-Request-Id` if present and valid,
    /// otherwise freshly generated.
    pub request_id: String,
    /// Distributed trace identifier, if propagated by the caller.
    pub trace_id: Option<String>,
    /// Authenticated caller.
    pub auth: AuthContext,
}

/// Rejection returned when request context extraction fails, rendered the
/// same way any other `ApiError` would be.
pub struct ContextRejection(pub crate::error::ApiError);

impl axum::response::IntoResponse for ContextRejection {
    fn into_response(self) -> axum::response::Response {
        self.0.into_response()
    }
}

impl FromRequestParts<AppState> for RequestContext {
    type Rejection = ContextRejection;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let request_id = resolve_request_id(&parts.headers);

        let auth_header = header_str(&parts.headers, AUTHORIZATION.as_str());
        let auth = state
            .jwt_verifier
            .authenticate(auth_header)
            .map_err(|e| ContextRejection(crate::error::ApiError::from_auth(e, &request_id)))?;

        let tenant_raw = header_str(&parts.headers, "x-tenant-id").ok_or_else(|| {
            ContextRejection(crate::error::ApiError::from_domain(
                intake_core::DomainError::Validation("missing X-Tenant-Id header".to_string()),
                &request_id,
            ))
        })?;
        let tenant_id = TenantId::parse(tenant_raw).map_err(|_| {
            ContextRejection(crate::error::ApiError::from_domain(
                intake_core::DomainError::Validation("invalid X-Tenant-Id header".to_string()),
                &request_id,
            ))
        })?;

        let trace_id = header_str(&parts.headers, "x-trace-id").map(ToString::to_string);

        Ok(Self { tenant_id, request_id, trace_id, auth })
    }
}

/// Returns a header's value as `&str` if present, non-empty, within the
/// size bound, and free of characters that would corrupt a later response
/// header (defense in depth above the HTTP layer's own CR/LF rejection).
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let value = headers.get(name)?.to_str().ok()?.trim();
    if value.is_empty() || value.len() > MAX_HEADER_VALUE_BYTES {
        return None;
    }
    if value.chars().any(|c| c.is_control()) {
        return None;
    }
    Some(value)
}

/// Idempotency key header names, in priority order (§6): `Idempotency-Key`
/// wins, then `X-Idempotency-Key`, then the legacy `Idempotency-Token`.
const IDEMPOTENCY_HEADER_NAMES: [&str; 3] =
    ["idempotency-key", "x-idempotency-key", "idempotency-token"];

/// Extracts the caller-supplied idempotency key, honoring header priority.
#[must_use]
pub fn extract_idempotency_key(headers: &HeaderMap) -> Option<String> {
    IDEMPOTENCY_HEADER_NAMES.iter().find_map(|name| header_str(headers, name)).map(ToString::to_string)
}

fn resolve_request_id(headers: &HeaderMap) -> String {
    header_str(headers, "x-request-id").map(ToString::to_string).unwrap_or_else(|| Uuid::new_v4().to_string())
}
