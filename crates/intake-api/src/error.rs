// crates/intake-api/src/error.rs
// ============================================================================
// Module: HTTP Error Mapping
// Description: Maps intake-core::DomainError and auth failures onto the
// HTTP status/error-envelope taxonomy.
// Purpose: Give every route handler a single `?`-compatible error type that
// renders a stable, non-leaking JSON body.
// Dependencies: axum, serde, thiserror, intake-core
// ============================================================================

//! ## Overview
//! `message` on the error envelope is always derived from `DomainError`'s
//! `Display` impl, which never echoes a rejected idempotency key or file
//! reference. `TenantIsolation` and `SecurityViolation` are additionally
//! logged through the security audit path at `warn`.

use axum::Json;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use intake_core::DomainError;
use serde::Serialize;

use crate::auth::AuthError;

/// HTTP-facing error, carrying enough context to render the response
/// envelope required by the external interface.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    retry_after_seconds: Option<i64>,
    request_id: String,
}

impl ApiError {
    /// Wraps a domain error for the given request, applying the taxonomy.
    #[must_use]
    pub fn from_domain(err: DomainError, request_id: &str) -> Self {
        if err.is_security_relevant() {
            tracing::warn!(code = err.code(), request_id, "security audit event");
        }

        let (status, retry_after_seconds) = match &err {
            DomainError::Validation(_) | DomainError::InvalidIdempotencyKey => {
                (StatusCode::BAD_REQUEST, None)
            }
            DomainError::RateLimitExceeded { reset_time, .. } => {
                let now = chrono::Utc::now().timestamp();
                (StatusCode::TOO_MANY_REQUESTS, Some((*reset_time - now).max(0)))
            }
            DomainError::IdempotencyConflict { .. } | DomainError::InvalidStateTransition { .. } => {
                (StatusCode::CONFLICT, None)
            }
            DomainError::BusinessRuleViolation(_) => (StatusCode::UNPROCESSABLE_ENTITY, None),
            DomainError::TenantIsolation { .. } => (StatusCode::FORBIDDEN, None),
            DomainError::SecurityViolation(_) => (StatusCode::BAD_REQUEST, None),
            DomainError::AggregateNotFound { .. } => (StatusCode::NOT_FOUND, None),
            DomainError::ConcurrencyConflict { .. } => (StatusCode::CONFLICT, None),
            DomainError::StorageUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, None),
        };

        Self {
            status,
            code: err.code(),
            message: err.to_string(),
            retry_after_seconds,
            request_id: request_id.to_string(),
        }
    }

    /// Wraps an authentication/authorization failure.
    #[must_use]
    pub fn from_auth(err: AuthError, request_id: &str) -> Self {
        let (status, code) = match err {
            AuthError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED"),
            AuthError::Unauthorized(_) => (StatusCode::FORBIDDEN, "TENANT_ISOLATION_VIOLATION"),
        };
        Self {
            status,
            code,
            message: err.to_string(),
            retry_after_seconds: None,
            request_id: request_id.to_string(),
        }
    }

    /// Builds a generic internal error, for failures that are not otherwise
    /// classified by the domain taxonomy (serialization bugs, channel
    /// closures). Never carries caller-supplied content.
    #[must_use]
    pub fn internal(request_id: &str) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL_SERVER_ERROR",
            message: "internal server error".to_string(),
            retry_after_seconds: None,
            request_id: request_id.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope<'a> {
    code: &'a str,
    message: &'a str,
    request_id: &'a str,
    timestamp: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let envelope = ErrorEnvelope {
            code: self.code,
            message: &self.message,
            request_id: &self.request_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let mut response = (self.status, Json(envelope)).into_response();
        if let Some(seconds) = self.retry_after_seconds {
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}
