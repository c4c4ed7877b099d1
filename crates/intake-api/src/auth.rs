// crates/intake-api/src/auth.rs
// ============================================================================
// Module: Bearer/JWT Authentication
// Description: Verifies the `Authorization: Bearer <token>` header against
// configured JWT key material, issuer, and audience.
// Purpose: Authenticate the caller before any use case runs. Tenant scoping
// itself is carried separately by the `X-Tenant-Id` header (§6) and enforced
// by the repository/idempotency/rate-limit layers, not by JWT claims.
// Dependencies: jsonwebtoken, sha2, serde, thiserror
// ============================================================================

//! ## Overview
//! Fail-closed: a missing, malformed, or unverifiable bearer token is
//! `AuthError::Unauthenticated`; a verifiable token whose claims fail an
//! authorization check is `AuthError::Unauthorized`. Every decision is
//! available to the caller for an audit log entry; the raw token is never
//! logged, only its SHA-256 fingerprint.

use intake_config::JwtAlgorithm;
use intake_config::JwtConfig;
use jsonwebtoken::Algorithm;
use jsonwebtoken::DecodingKey;
use jsonwebtoken::Validation;
use jsonwebtoken::decode;
use serde::Deserialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

/// Upper bound on an `Authorization` header's byte length, before parsing is
/// even attempted.
const MAX_AUTH_HEADER_BYTES: usize = 8 * 1024;

/// Authentication or authorization failures.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Missing, malformed, or unverifiable bearer token.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    /// Verified caller is not authorized for the requested action.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

/// Claims this service requires on an inbound access token.
#[derive(Debug, Clone, Deserialize)]
struct Claims {
    sub: String,
}

/// Authenticated caller, derived from a verified bearer token.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Subject claim from the verified token.
    pub subject: String,
    /// SHA-256 hex fingerprint of the raw token, safe to log.
    pub token_fingerprint: String,
}

/// Verifies bearer tokens against configured key material.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Builds a verifier from the resolved public key material and the
    /// configured algorithm/issuer/audience/clock-skew.
    ///
    /// # Errors
    ///
    /// Returns an error if `public_key_pem` is not a valid PEM key for the
    /// configured algorithm family.
    pub fn new(public_key_pem: &str, config: &JwtConfig) -> Result<Self, jsonwebtoken::errors::Error> {
        let algorithm = match config.algorithm {
            JwtAlgorithm::Rs256 => Algorithm::RS256,
            JwtAlgorithm::Es256 => Algorithm::ES256,
        };
        let decoding_key = match config.algorithm {
            JwtAlgorithm::Rs256 => DecodingKey::from_rsa_pem(public_key_pem.as_bytes())?,
            JwtAlgorithm::Es256 => DecodingKey::from_ec_pem(public_key_pem.as_bytes())?,
        };
        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[&config.issuer]);
        validation.set_audience(&[&config.audience]);
        validation.leeway = u64::try_from(config.clock_skew_seconds).unwrap_or(0);
        Ok(Self { decoding_key, validation })
    }

    /// Authenticates the raw `Authorization` header value, returning the
    /// verified caller context.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unauthenticated`] when the header is missing,
    /// oversized, not a well-formed `Bearer` scheme, or the token fails
    /// signature/issuer/audience/expiry verification.
    pub fn authenticate(&self, auth_header: Option<&str>) -> Result<AuthContext, AuthError> {
        let token = parse_bearer_token(auth_header)?;
        let claims = decode::<Claims>(&token, &self.decoding_key, &self.validation)
            .map_err(|e| AuthError::Unauthenticated(format!("token verification failed: {e}")))?
            .claims;
        let fingerprint = hex_encode(&Sha256::digest(token.as_bytes()));
        Ok(AuthContext { subject: claims.sub, token_fingerprint: fingerprint })
    }
}

fn parse_bearer_token(auth_header: Option<&str>) -> Result<String, AuthError> {
    let header = auth_header
        .ok_or_else(|| AuthError::Unauthenticated("missing authorization header".to_string()))?;
    if header.len() > MAX_AUTH_HEADER_BYTES {
        return Err(AuthError::Unauthenticated("authorization header too large".to_string()));
    }
    let mut parts = header.trim().splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default().trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthError::Unauthenticated("invalid authorization header".to_string()));
    }
    Ok(token.to_string())
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        reason = "Test assertions on header parsing; a panic here is a test failure."
    )]

    use super::*;

    #[test]
    fn rejects_missing_header() {
        let err = parse_bearer_token(None).unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated(_)));
    }

    #[test]
    fn rejects_non_bearer_scheme() {
        let err = parse_bearer_token(Some("Basic abc123")).unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated(_)));
    }

    #[test]
    fn accepts_well_formed_bearer_header() {
        let token = parse_bearer_token(Some("Bearer abc.def.ghi")).unwrap();
        assert_eq!(token, "abc.def.ghi");
    }

    #[test]
    fn rejects_oversized_header() {
        let oversized = format!("Bearer {}", "a".repeat(MAX_AUTH_HEADER_BYTES));
        let err = parse_bearer_token(Some(&oversized)).unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated(_)));
    }
}
