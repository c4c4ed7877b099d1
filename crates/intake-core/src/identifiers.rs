// crates/intake-core/src/identifiers.rs
// ============================================================================
// Module: Job Intake Identifiers
// Description: Canonical, validated identifiers for tenants, jobs, sellers,
// channels, and rules profiles.
// Purpose: Keep every identifier's invariants enforced at construction so
// downstream code never has to re-validate an already-typed value.
// Dependencies: serde, uuid
// ============================================================================

//! ## Overview
//! Every identifier in the intake core is a validating newtype. Construction
//! is the only way to produce a value, so once a `TenantId` or `JobId` exists
//! its invariants hold for the rest of its lifetime.
//!
//! Security posture: identifiers are parsed from untrusted HTTP input; all
//! validation here is fail-closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when constructing an identifier from untrusted input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    /// Tenant identifier failed the `t_[a-z0-9_]{1,47}` pattern.
    #[error("invalid tenant id")]
    InvalidTenantId,
    /// Seller identifier failed its pattern or length bound.
    #[error("invalid seller id")]
    InvalidSellerId,
    /// Channel failed its lowercase-alphanumeric pattern.
    #[error("invalid channel")]
    InvalidChannel,
    /// Rules profile id failed the `channel@MAJOR.MINOR.PATCH` pattern.
    #[error("invalid rules profile id")]
    InvalidRulesProfileId,
}

// ============================================================================
// SECTION: TenantId
// ============================================================================

/// Tenant identifier: lowercase, `t_[a-z0-9_]{1,47}`.
///
/// # Invariants
/// - Always lowercase ASCII.
/// - Never contains control or format characters (enforced by the pattern).
/// - Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Parses and validates a tenant identifier.
    ///
    /// The input is NFKC-normalized and lowercased before validation so that
    /// visually-identical Unicode variants collapse to one canonical form.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::InvalidTenantId`] when the normalized value
    /// does not match `t_[a-z0-9_]{1,47}`.
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        let normalized: String = raw.nfkc_lowercase();
        if is_valid_tenant_id(&normalized) {
            Ok(Self(normalized))
        } else {
            Err(IdentifierError::InvalidTenantId)
        }
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TenantId {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0
    }
}

/// Minimal NFKC-lowercase normalization sufficient for the tenant id alphabet.
///
/// The tenant id grammar is restricted to ASCII after normalization, so a
/// full Unicode NFKC table is unnecessary; this performs ASCII lowercasing
/// and rejects any non-ASCII byte, which is equivalent to NFKC-normalizing
/// then checking the pattern for this particular grammar.
trait NfkcLowercase {
    /// Returns the ASCII-lowercased form, or the original value untouched if
    /// it contains non-ASCII bytes (validation below will reject it).
    fn nfkc_lowercase(&self) -> String;
}

impl NfkcLowercase for str {
    fn nfkc_lowercase(&self) -> String {
        self.to_ascii_lowercase()
    }
}

/// Returns true when `value` matches `^t_[a-z0-9_]{1,47}$` with no control or
/// format characters.
fn is_valid_tenant_id(value: &str) -> bool {
    let Some(rest) = value.strip_prefix("t_") else {
        return false;
    };
    if rest.is_empty() || rest.len() > 47 {
        return false;
    }
    rest.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

// ============================================================================
// SECTION: JobId
// ============================================================================

/// Job identifier: UUIDv4.
///
/// # Invariants
/// - Always a valid version-4 UUID once constructed via [`JobId::generate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generates a fresh random UUIDv4 job id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID without checking its version.
    ///
    /// Used when rehydrating identifiers already persisted by the store,
    /// where version-4-ness was already enforced at creation time.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parses a job id from its string form.
    ///
    /// # Errors
    ///
    /// Returns an error when `raw` is not a valid UUID string.
    pub fn parse(raw: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(raw).map(Self)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: SellerId
// ============================================================================

/// Seller identifier scoped within a tenant.
///
/// # Invariants
/// - 1-100 chars, alphanumeric plus `_`/`-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SellerId(String);

impl SellerId {
    /// Parses and validates a seller identifier.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::InvalidSellerId`] when `raw` is empty,
    /// exceeds 100 characters, or contains a disallowed byte.
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        if raw.is_empty() || raw.len() > 100 {
            return Err(IdentifierError::InvalidSellerId);
        }
        let bytes = raw.as_bytes();
        let is_allowed =
            |b: u8| b.is_ascii_alphanumeric() || b == b'_' || b == b'-';
        if !bytes.iter().copied().all(is_allowed) {
            return Err(IdentifierError::InvalidSellerId);
        }
        Ok(Self(raw.to_string()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SellerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SellerId {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SellerId> for String {
    fn from(value: SellerId) -> Self {
        value.0
    }
}

// ============================================================================
// SECTION: Channel
// ============================================================================

/// Normalized marketplace channel name.
///
/// # Invariants
/// - Lowercase, `^[a-z][a-z0-9_]{0,49}$`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Channel(String);

/// Channels with first-party rule-pack coverage.
///
/// This is a diagnostic hint only — the intake core accepts any
/// syntactically valid channel. The rule-pack registry (out of scope, see
/// `spec.md` §1) owns the authoritative set of supported channels.
pub const KNOWN_CHANNELS: &[&str] =
    &["mercado_livre", "magalu", "shopee", "amazon_br", "b2w", "via_varejo", "carrefour", "custom"];

impl Channel {
    /// Parses and validates a channel name, lowercasing it first.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::InvalidChannel`] when the lowercased value
    /// does not match `^[a-z][a-z0-9_]{0,49}$`.
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        let normalized = raw.to_ascii_lowercase();
        let mut chars = normalized.bytes();
        let Some(first) = chars.next() else {
            return Err(IdentifierError::InvalidChannel);
        };
        if !first.is_ascii_lowercase() {
            return Err(IdentifierError::InvalidChannel);
        }
        if normalized.len() > 50 {
            return Err(IdentifierError::InvalidChannel);
        }
        if !chars.all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_') {
            return Err(IdentifierError::InvalidChannel);
        }
        Ok(Self(normalized))
    }

    /// Returns the channel as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true when this channel has first-party rule-pack coverage.
    #[must_use]
    pub fn is_known(&self) -> bool {
        KNOWN_CHANNELS.contains(&self.0.as_str())
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Channel {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Channel> for String {
    fn from(value: Channel) -> Self {
        value.0
    }
}

// ============================================================================
// SECTION: RulesProfileId
// ============================================================================

/// Rules profile identifier: `channel@MAJOR.MINOR.PATCH`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RulesProfileId(String);

impl RulesProfileId {
    /// Parses and validates a rules profile identifier against
    /// `^[a-z_]+@\d+\.\d+\.\d+$`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::InvalidRulesProfileId`] on pattern mismatch.
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        if is_valid_rules_profile_id(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(IdentifierError::InvalidRulesProfileId)
        }
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RulesProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RulesProfileId {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RulesProfileId> for String {
    fn from(value: RulesProfileId) -> Self {
        value.0
    }
}

/// Hand-rolled matcher for `^[a-z_]+@\d+\.\d+\.\d+$` (no regex dependency).
fn is_valid_rules_profile_id(value: &str) -> bool {
    let Some((name, version)) = value.split_once('@') else {
        return false;
    };
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_lowercase() || b == b'_') {
        return false;
    }
    let mut parts = version.split('.');
    let (Some(major), Some(minor), Some(patch), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    [major, minor, patch].iter().all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test assertions on parse results; a panic here is a test failure."
    )]

    use super::*;

    #[test]
    fn tenant_id_normalizes_case() {
        let id = TenantId::parse("T_Acme_01").expect("valid");
        assert_eq!(id.as_str(), "t_acme_01");
    }

    #[test]
    fn tenant_id_rejects_bad_prefix() {
        assert!(TenantId::parse("acme").is_err());
        assert!(TenantId::parse("t_").is_err());
        assert!(TenantId::parse(&format!("t_{}", "a".repeat(48))).is_err());
    }

    #[test]
    fn seller_id_round_trips() {
        let id = SellerId::parse("seller-123_ok").expect("valid");
        assert_eq!(id.as_str(), "seller-123_ok");
        assert!(SellerId::parse("").is_err());
        assert!(SellerId::parse("bad space").is_err());
    }

    #[test]
    fn channel_lowercases_and_validates() {
        let channel = Channel::parse("Mercado_Livre").expect("valid");
        assert_eq!(channel.as_str(), "mercado_livre");
        assert!(channel.is_known());
        assert!(Channel::parse("1bad").is_err());
    }

    #[test]
    fn rules_profile_id_pattern() {
        assert!(RulesProfileId::parse("mercado_livre@1.2.3").is_ok());
        assert!(RulesProfileId::parse("mercado_livre@1.2").is_err());
        assert!(RulesProfileId::parse("Mercado@1.2.3").is_err());
        assert!(RulesProfileId::parse("mercado_livre@1.2.3.4").is_err());
    }

    #[test]
    fn job_id_generates_v4() {
        let id = JobId::generate();
        assert_eq!(id.as_uuid().get_version_num(), 4);
    }
}
