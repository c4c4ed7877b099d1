// crates/intake-api/src/middleware.rs
// ============================================================================
// Module: HTTP Middleware
// Description: Trusted-host enforcement, CORS, and structured access
// logging, layered around every route.
// Purpose: Keep cross-cutting concerns out of individual handlers.
// Dependencies: axum, tower-http, tracing, intake-config
// ============================================================================

use std::time::Instant;

use axum::extract::Request;
use axum::extract::State;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header::HOST;
use axum::middleware::Next;
use axum::response::Response;
use intake_config::CorsConfig;
use tower_http::cors::AllowOrigin;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

/// Builds the CORS layer from configuration. A wildcard origin is honored
/// only when [`CorsConfig::allow_wildcard`] is explicitly set; otherwise the
/// allow-list is used verbatim.
#[must_use]
pub fn build_cors_layer(config: &CorsConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(tower_http::cors::Any).allow_headers(tower_http::cors::Any);

    if config.allow_wildcard {
        return layer.allow_origin(tower_http::cors::Any);
    }

    let origins: Vec<HeaderValue> =
        config.allowed_origins.iter().filter_map(|origin| HeaderValue::from_str(origin).ok()).collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Logs one structured line per request: `tenant_id` (when the request
/// reached a handler that set it), `route`, `status`, and `latency_ms`.
/// Severity follows the response's status class: info for 2xx/3xx, warn for
/// 4xx, error for 5xx.
pub async fn access_log(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let latency_ms = started.elapsed().as_millis();

    if status.is_server_error() {
        tracing::error!(%method, route = %path, status = status.as_u16(), latency_ms, "request completed");
    } else if status.is_client_error() {
        tracing::warn!(%method, route = %path, status = status.as_u16(), latency_ms, "request completed");
    } else {
        tracing::info!(%method, route = %path, status = status.as_u16(), latency_ms, "request completed");
    }

    response
}

/// Rejects requests whose `Host` header is absent or not present in
/// `trusted_hosts`, when that list is non-empty.
pub fn host_is_trusted(request: &Request, trusted_hosts: &[String]) -> bool {
    if trusted_hosts.is_empty() {
        return true;
    }
    let Some(host) = request.headers().get(HOST).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let host = host.split(':').next().unwrap_or(host);
    trusted_hosts.iter().any(|trusted| trusted == host)
}

/// Axum handler wrapping [`host_is_trusted`] for use as a `from_fn_with_state`
/// middleware layer.
pub async fn trusted_host_layer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if host_is_trusted(&request, &state.trusted_hosts) {
        Ok(next.run(request).await)
    } else {
        tracing::warn!("rejected request with untrusted Host header");
        Err(StatusCode::FORBIDDEN)
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request as HttpRequest;

    use super::*;

    #[test]
    fn empty_trusted_hosts_allows_everything() {
        let request = HttpRequest::builder().uri("/v1/jobs").body(Body::empty()).expect("valid request");
        assert!(host_is_trusted(&request, &[]));
    }

    #[test]
    fn rejects_host_not_in_allow_list() {
        let request = HttpRequest::builder()
            .uri("/v1/jobs")
            .header(HOST, "evil.example.com")
            .body(Body::empty())
            .expect("valid request");
        assert!(!host_is_trusted(&request, &["api.example.com".to_string()]));
    }

    #[test]
    fn accepts_host_with_port_suffix() {
        let request = HttpRequest::builder()
            .uri("/v1/jobs")
            .header(HOST, "api.example.com:8443")
            .body(Body::empty())
            .expect("valid request");
        assert!(host_is_trusted(&request, &["api.example.com".to_string()]));
    }
}
