// crates/intake-core/src/idempotency.rs
// ============================================================================
// Module: Idempotency Resolver
// Description: Canonicalizes caller-supplied idempotency keys into a safe,
// tenant- and scope-isolated form, and models the durable record a store
// keys on that form.
// Purpose: Guarantee exactly-once response semantics under a hostile input
// space (formula injection, cross-tenant collision, legacy clients) without
// any I/O.
// Dependencies: sha2, base64, rand, subtle, serde
// ============================================================================

//! ## Overview
//! [`resolve`] is the only place a raw idempotency key is allowed to touch
//! application logic. Everything downstream — the idempotency store, rate
//! limiter attribution, log sinks — consumes [`ResolvedKey`], never the raw
//! bytes. The algorithm and constants mirror the reference resolver this
//! module was ported from: 20 random bytes base32-encoded as the
//! auto-generated seed, SHA-256 truncated to 16 bytes and base64url-encoded
//! (22 characters, unpadded) for both the generated and canonicalized forms,
//! and a fixed formula-character set guarded with a `'k'` prefix repair.

// ============================================================================
// SECTION: Imports
// ============================================================================

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::errors::DomainError;
use crate::identifiers::TenantId;
use crate::time::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// First characters that could be interpreted as spreadsheet formulas by a
/// downstream CSV/XLSX export. A resolved key is never allowed to start
/// with one of these.
const FORMULA_CHARS: [char; 4] = ['=', '+', '-', '@'];

const MIN_RESOLVED_LEN: usize = 16;
const MAX_RESOLVED_LEN: usize = 128;

// ============================================================================
// SECTION: Compat Mode
// ============================================================================

/// Behavior applied to a raw key that does not already match the secure
/// fast-path format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompatMode {
    /// Hash the raw key (scoped and tenant-isolated) into a secure form.
    Canonicalize,
    /// Refuse the request outright.
    Reject,
}

impl Default for CompatMode {
    fn default() -> Self {
        Self::Canonicalize
    }
}

// ============================================================================
// SECTION: Scope Hash
// ============================================================================

/// First 8 hex characters of `SHA256(UPPER(method) ":" route_template)`.
///
/// Distinct HTTP scopes (method + route template) partition the idempotency
/// namespace, so the same raw key submitted against two different endpoints
/// never collides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeHash(String);

impl ScopeHash {
    /// Computes the scope hash for an HTTP method and route template.
    #[must_use]
    pub fn compute(method: &str, route_template: &str) -> Self {
        let scope_input = format!("{}:{route_template}", method.to_ascii_uppercase());
        let digest = Sha256::digest(scope_input.as_bytes());
        let hex = hex_encode(&digest);
        Self(hex[..8].to_string())
    }

    /// Returns the 8-character hex representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

// ============================================================================
// SECTION: Resolved Key
// ============================================================================

/// A canonicalized, scope- and tenant-bound idempotency key.
///
/// This is the only form ever persisted or compared; it is always
/// 16–128 characters from `[A-Za-z0-9_-]` and never starts with a formula
/// character.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolvedKey(String);

impl ResolvedKey {
    /// Wraps `value` as a resolved key without re-validating it.
    ///
    /// Callers must only use this for values already produced by
    /// [`resolve`] or read back from durable storage that enforced the
    /// invariant at write time.
    #[must_use]
    pub fn from_trusted(value: String) -> Self {
        Self(value)
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResolvedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Returns `true` iff `key` is 16–128 characters from the resolved-key
/// alphabet and does not start with a formula character.
///
/// A value failing this check at an internal boundary (read back from a
/// store, for instance) indicates a programming error: callers should treat
/// it as fail-closed rather than attempt repair.
#[must_use]
pub fn validate_resolved(key: &str) -> bool {
    let len = key.chars().count();
    if !(MIN_RESOLVED_LEN..=MAX_RESOLVED_LEN).contains(&len) {
        return false;
    }
    if key.chars().any(|c| !is_resolved_alphabet(c)) {
        return false;
    }
    !starts_with_formula_char(key)
}

fn is_resolved_alphabet(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn starts_with_formula_char(key: &str) -> bool {
    key.chars().next().is_some_and(|c| FORMULA_CHARS.contains(&c))
}

fn ensure_safe_first_char(key: String) -> String {
    if starts_with_formula_char(&key) {
        format!("k{key}")
    } else {
        key
    }
}

fn base64url_truncated(input: &[u8]) -> String {
    let digest = Sha256::digest(input);
    URL_SAFE_NO_PAD.encode(&digest[..16])
}

// ============================================================================
// SECTION: Resolve
// ============================================================================

/// Checks whether `raw` already satisfies the secure fast-path format:
/// 16–128 chars from the resolved alphabet, safe first character.
fn is_fast_path(raw: &str) -> bool {
    validate_resolved(raw)
}

/// Canonicalizes a caller-supplied idempotency key into a [`ResolvedKey`].
///
/// Pure function; performs no I/O. `raw` is the trimmed, optional
/// caller-supplied value (already extracted from whichever header won
/// priority); `tenant`, `method`, and `route_template` establish isolation.
///
/// # Errors
///
/// Returns [`DomainError::InvalidIdempotencyKey`] when `raw` does not match
/// the secure format and `compat_mode` is [`CompatMode::Reject`]. The error
/// message never includes `raw`.
pub fn resolve(
    raw: Option<&str>,
    tenant: &TenantId,
    method: &str,
    route_template: &str,
    compat_mode: CompatMode,
) -> Result<ResolvedKey, DomainError> {
    let scope = ScopeHash::compute(method, route_template);

    let raw = raw.map(str::trim).filter(|s| !s.is_empty());

    let Some(raw) = raw else {
        return Ok(ResolvedKey(generate(tenant, &scope)));
    };

    if is_fast_path(raw) {
        return Ok(ResolvedKey(raw.to_string()));
    }

    match compat_mode {
        CompatMode::Reject => Err(DomainError::InvalidIdempotencyKey),
        CompatMode::Canonicalize => {
            let canonical_input = format!("{}:{}:{raw}", tenant.as_str(), scope.as_str());
            let canonical = base64url_truncated(canonical_input.as_bytes());
            Ok(ResolvedKey(ensure_safe_first_char(canonical)))
        }
    }
}

/// Generates a fresh, tenant- and scope-bound key when no caller-supplied
/// value is present.
fn generate(tenant: &TenantId, scope: &ScopeHash) -> String {
    let mut seed = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut seed);
    let ksuid = base32_lower_unpadded(&seed);

    let hash_input = format!("{}:{}:{ksuid}", tenant.as_str(), scope.as_str());
    let candidate = base64url_truncated(hash_input.as_bytes());
    ensure_safe_first_char(candidate)
}

/// RFC 4648 base32, lowercased, padding stripped — used only as an
/// intermediate seed representation, never persisted directly.
fn base32_lower_unpadded(bytes: &[u8]) -> String {
    const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
    let mut out = String::new();
    let mut buffer: u32 = 0;
    let mut bits_in_buffer = 0u32;

    for &byte in bytes {
        buffer = (buffer << 8) | u32::from(byte);
        bits_in_buffer += 8;
        while bits_in_buffer >= 5 {
            bits_in_buffer -= 5;
            let index = ((buffer >> bits_in_buffer) & 0x1f) as usize;
            out.push(ALPHABET[index] as char);
        }
    }
    if bits_in_buffer > 0 {
        let index = ((buffer << (5 - bits_in_buffer)) & 0x1f) as usize;
        out.push(ALPHABET[index] as char);
    }
    out.to_ascii_lowercase()
}

// ============================================================================
// SECTION: Idempotency Record
// ============================================================================

/// Durable `(tenant, resolved_key) -> response` mapping owned by an
/// [`crate::interfaces::IdempotencyStore`] implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Tenant the record belongs to.
    pub tenant_id: TenantId,
    /// Resolved key the record is keyed on.
    pub key: ResolvedKey,
    /// `SHA256(canonical_json(response_payload))`, hex-encoded.
    pub response_hash: String,
    /// The stored response body, replayed verbatim on a duplicate request.
    pub response_payload: serde_json::Value,
    /// When the record was written.
    pub created_at: Timestamp,
    /// When the record stops being eligible as a replay source.
    pub expires_at: Timestamp,
}

impl IdempotencyRecord {
    /// Returns `true` if `now` is at or past [`Self::expires_at`].
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }
}

/// Computes `response_hash` for a payload: `SHA256(canonical_json(payload))`
/// hex-encoded, where canonical JSON sorts object keys.
///
/// # Errors
///
/// Returns [`DomainError::Validation`] if `payload` cannot be serialized
/// into canonical form (non-finite floats, for instance).
pub fn compute_response_hash(payload: &serde_json::Value) -> Result<String, DomainError> {
    let canonical = canonicalize_json(payload);
    let bytes = serde_json::to_vec(&canonical)
        .map_err(|e| DomainError::Validation(format!("payload not serializable: {e}")))?;
    Ok(hex_encode(&Sha256::digest(&bytes)))
}

/// Recursively sorts object keys so that semantically identical payloads
/// hash identically regardless of field insertion order.
fn canonicalize_json(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), canonicalize_json(&map[key]));
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize_json).collect())
        }
        other => other.clone(),
    }
}

/// Constant-time comparison of two response hashes, used when deciding
/// whether a `put` race is a true replay or an [`DomainError::IdempotencyConflict`].
#[must_use]
pub fn hashes_match(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test assertions on parse/resolve results; a panic here is a test failure."
    )]

    use super::*;

    fn tenant() -> TenantId {
        TenantId::parse("t_acme").expect("valid tenant")
    }

    #[test]
    fn fast_path_key_is_returned_unchanged() {
        let raw = "abcdef1234567890abcd";
        let resolved = resolve(Some(raw), &tenant(), "POST", "/jobs", CompatMode::Canonicalize)
            .expect("resolves");
        assert_eq!(resolved.as_str(), raw);
    }

    #[test]
    fn missing_key_generates_valid_resolved_form() {
        let resolved =
            resolve(None, &tenant(), "POST", "/jobs", CompatMode::Canonicalize).expect("resolves");
        assert!(validate_resolved(resolved.as_str()));
    }

    #[test]
    fn formula_prefixed_key_is_canonicalized_not_echoed() {
        let raw = "=SUM(A1:A10)";
        let resolved = resolve(Some(raw), &tenant(), "POST", "/jobs", CompatMode::Canonicalize)
            .expect("resolves");
        assert!(validate_resolved(resolved.as_str()));
        assert!(!resolved.as_str().contains("SUM"));
    }

    #[test]
    fn reject_mode_rejects_legacy_key() {
        let err = resolve(
            Some("order.123"),
            &tenant(),
            "POST",
            "/jobs",
            CompatMode::Reject,
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::InvalidIdempotencyKey));
    }

    #[test]
    fn resolve_is_deterministic() {
        let a = resolve(
            Some("order.123"),
            &tenant(),
            "POST",
            "/jobs",
            CompatMode::Canonicalize,
        )
        .expect("resolves");
        let b = resolve(
            Some("order.123"),
            &tenant(),
            "POST",
            "/jobs",
            CompatMode::Canonicalize,
        )
        .expect("resolves");
        assert_eq!(a, b);
    }

    #[test]
    fn tenant_isolation_changes_resolved_key() {
        let t1 = TenantId::parse("t_acme").expect("valid");
        let t2 = TenantId::parse("t_other").expect("valid");
        let a = resolve(Some("order.123"), &t1, "POST", "/jobs", CompatMode::Canonicalize)
            .expect("resolves");
        let b = resolve(Some("order.123"), &t2, "POST", "/jobs", CompatMode::Canonicalize)
            .expect("resolves");
        assert_ne!(a, b);
    }

    #[test]
    fn scope_isolation_changes_resolved_key() {
        let t = tenant();
        let a = resolve(Some("order.123"), &t, "POST", "/jobs", CompatMode::Canonicalize)
            .expect("resolves");
        let b = resolve(
            Some("order.123"),
            &t,
            "POST",
            "/jobs/retry",
            CompatMode::Canonicalize,
        )
        .expect("resolves");
        assert_ne!(a, b);
    }

    #[test]
    fn response_hash_is_order_independent() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(
            compute_response_hash(&a).expect("hashes"),
            compute_response_hash(&b).expect("hashes")
        );
    }
}
