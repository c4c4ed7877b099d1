// crates/intake-config/src/secrets.rs
// ============================================================================
// Module: Secrets Source
// Description: Indirection for loading secret material (DB DSNs, JWT keys)
// by name, so the config file carries references rather than values.
// Purpose: Keep secret material out of the TOML config file and out of
// process environment variables except at the narrow bootstrap path.
// Dependencies: std::env
// ============================================================================

//! ## Overview
//! The config file names secrets by a key (e.g. `jwt_public_key_secret`);
//! the actual value is fetched from a [`SecretsSource`] at startup, never
//! written to or read from the config file itself. This keeps the
//! persisted/checked-in config safe to share while still allowing the
//! process's actual key material to come from whatever secret store a
//! deployment uses. [`EnvSecretsSource`] is the only implementation shipped
//! here, reserved for the narrow bootstrap path (and local/dev use); a
//! production deployment is expected to supply its own implementation
//! (vault, KMS, mounted file) without needing to change this crate.

use thiserror::Error;

/// Errors returned while resolving a secret by name.
#[derive(Debug, Error)]
pub enum SecretsError {
    /// No value was found for the requested secret name.
    #[error("secret not found: {0}")]
    NotFound(String),
}

/// Resolves named secrets at startup.
pub trait SecretsSource: Send + Sync {
    /// Returns the value for `name`, or `None` if it is not configured.
    fn get(&self, name: &str) -> Option<String>;

    /// Returns the value for `name`, or [`SecretsError::NotFound`].
    ///
    /// # Errors
    ///
    /// Returns [`SecretsError::NotFound`] if `name` is not configured.
    fn require(&self, name: &str) -> Result<String, SecretsError> {
        self.get(name).ok_or_else(|| SecretsError::NotFound(name.to_string()))
    }
}

/// Resolves secrets from process environment variables.
///
/// Intended for local development and the bootstrap path; production
/// deployments should supply a `SecretsSource` backed by their actual
/// secret store instead of relying on plain env vars for key material.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecretsSource;

impl SecretsSource for EnvSecretsSource {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        reason = "Test assertions on secrets resolution; a panic here is a test failure."
    )]

    use super::*;

    struct FixedSecrets(Vec<(&'static str, &'static str)>);

    impl SecretsSource for FixedSecrets {
        fn get(&self, name: &str) -> Option<String> {
            self.0.iter().find(|(k, _)| *k == name).map(|(_, v)| (*v).to_string())
        }
    }

    #[test]
    fn require_returns_configured_value() {
        let secrets = FixedSecrets(vec![("jwt_public_key", "abc123")]);
        assert_eq!(secrets.require("jwt_public_key").unwrap(), "abc123");
    }

    #[test]
    fn require_fails_on_missing_name() {
        let secrets = FixedSecrets(Vec::new());
        assert!(matches!(secrets.require("missing"), Err(SecretsError::NotFound(_))));
    }
}
