// crates/intake-config/src/config.rs
// ============================================================================
// Module: Job Intake Configuration
// Description: Configuration loading and validation for the intake service.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: intake-core, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path
//! limits, then validated for internal consistency. Secret-shaped fields
//! (the database DSN, JWT verification key material) are never read from the
//! TOML file directly; the file names them by a secret key, and
//! [`IntakeConfig::resolve_secrets`] fetches the actual values from a
//! [`crate::secrets::SecretsSource`] after parsing.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;

use intake_core::CompatMode;
use serde::Deserialize;
use thiserror::Error;

use crate::secrets::SecretsSource;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "intake.toml";
/// Environment variable used to override the config path.
pub(crate) const CONFIG_ENV_VAR: &str = "INTAKE_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum number of CORS origins.
pub(crate) const MAX_CORS_ORIGINS: usize = 64;
/// Maximum number of trusted hosts.
pub(crate) const MAX_TRUSTED_HOSTS: usize = 64;
/// Maximum number of rate-limit overrides.
pub(crate) const MAX_RATE_LIMIT_OVERRIDES: usize = 256;
/// Minimum idempotency TTL, in seconds.
pub(crate) const MIN_IDEMPOTENCY_TTL_SECONDS: i64 = 60;
/// Maximum idempotency TTL, in seconds.
pub(crate) const MAX_IDEMPOTENCY_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
/// Minimum outbox dispatch poll interval, in milliseconds.
pub(crate) const MIN_POLL_INTERVAL_MS: u64 = 50;
/// Maximum outbox dispatch poll interval, in milliseconds.
pub(crate) const MAX_POLL_INTERVAL_MS: u64 = 60_000;

// ============================================================================
// SECTION: Top-Level Configuration
// ============================================================================

/// Job intake service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IntakeConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// JWT verification configuration.
    pub jwt: JwtConfig,
    /// Idempotency resolution and storage configuration.
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    /// Rate limiting defaults and per-resource overrides.
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    /// Outbox dispatcher configuration.
    #[serde(default)]
    pub dispatch: DispatchSettings,
    /// Retry chain configuration.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl IntakeConfig {
    /// Loads configuration from disk using the default resolution rules:
    /// an explicit `path`, then `INTAKE_CONFIG`, then `./intake.toml`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read, exceeds the
    /// size limit, is not valid UTF-8 TOML, or fails [`Self::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let config: Self = toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when any section is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.jwt.validate()?;
        self.idempotency.validate()?;
        self.rate_limit.validate()?;
        self.dispatch.validate()?;
        self.retry.validate()?;
        Ok(())
    }

    /// Resolves every secret-shaped field (JWT public key, database DSN)
    /// from `secrets`, returning a [`ResolvedSecrets`] bundle. Called once
    /// at startup after [`Self::load`]; nothing else in this crate reads
    /// these values from the parsed TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Secret`] if a required secret is not
    /// configured in `secrets`.
    pub fn resolve_secrets(&self, secrets: &dyn SecretsSource) -> Result<ResolvedSecrets, ConfigError> {
        let jwt_public_key = secrets
            .require(&self.jwt.public_key_secret_name)
            .map_err(|e| ConfigError::Secret(e.to_string()))?;
        let database_dsn = match &self.database.dsn_secret_name {
            Some(name) => Some(secrets.require(name).map_err(|e| ConfigError::Secret(e.to_string()))?),
            None => None,
        };
        Ok(ResolvedSecrets { jwt_public_key, database_dsn })
    }
}

/// Secret material resolved at startup, kept out of the parsed config
/// struct so it is never accidentally re-serialized or logged alongside it.
#[derive(Clone)]
pub struct ResolvedSecrets {
    /// JWT verification key material (PEM or JWK, per [`JwtConfig::algorithm`]).
    pub jwt_public_key: String,
    /// Database connection string, when the backend uses one (the SQLite
    /// backend instead uses [`DatabaseConfig::jobs_db_path`] directly and
    /// requires no DSN secret).
    pub database_dsn: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets").field("jwt_public_key", &"<redacted>").field("database_dsn", &self.database_dsn.as_ref().map(|_| "<redacted>")).finish()
    }
}

// ============================================================================
// SECTION: Server Configuration
// ============================================================================

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP listener.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// CORS configuration.
    #[serde(default)]
    pub cors: CorsConfig,
    /// Hostnames accepted in the `Host` header; requests with any other
    /// host are rejected before routing.
    #[serde(default)]
    pub trusted_hosts: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_body_bytes: default_max_body_bytes(),
            cors: CorsConfig::default(),
            trusted_hosts: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Validates server configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        let bind: SocketAddr =
            self.bind.parse().map_err(|_| ConfigError::Invalid("server.bind is not a valid address".to_string()))?;
        let _ = bind;
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid("server.max_body_bytes must be greater than zero".to_string()));
        }
        self.cors.validate()?;
        if self.trusted_hosts.len() > MAX_TRUSTED_HOSTS {
            return Err(ConfigError::Invalid("server.trusted_hosts has too many entries".to_string()));
        }
        for host in &self.trusted_hosts {
            if host.trim().is_empty() || host.contains(['\r', '\n']) {
                return Err(ConfigError::Invalid("server.trusted_hosts entries must be non-empty and single-line".to_string()));
            }
        }
        Ok(())
    }
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CorsConfig {
    /// Allowed origins. Must not contain `"*"` unless
    /// [`CorsConfig::allow_wildcard`] is explicitly set, which a production
    /// deployment should never do.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// Explicit opt-in to a wildcard origin, for local development only.
    #[serde(default)]
    pub allow_wildcard: bool,
}

impl CorsConfig {
    /// Validates CORS configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.allowed_origins.len() > MAX_CORS_ORIGINS {
            return Err(ConfigError::Invalid("server.cors.allowed_origins has too many entries".to_string()));
        }
        for origin in &self.allowed_origins {
            if origin == "*" && !self.allow_wildcard {
                return Err(ConfigError::Invalid(
                    "server.cors.allowed_origins must not contain \"*\" without explicit allow_wildcard".to_string(),
                ));
            }
            if origin.trim().is_empty() {
                return Err(ConfigError::Invalid("server.cors.allowed_origins entries must be non-empty".to_string()));
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Database Configuration
// ============================================================================

/// Database configuration for the job/outbox/idempotency store and the
/// rate-limit store.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the job/outbox/idempotency `SQLite` database file.
    #[serde(default = "default_jobs_db_path")]
    pub jobs_db_path: PathBuf,
    /// Path to the rate-limit `SQLite` database file.
    #[serde(default = "default_rate_limit_db_path")]
    pub rate_limit_db_path: PathBuf,
    /// Name of a secret holding a connection string, for non-`SQLite`
    /// backends. The `SQLite` backend shipped in this workspace does not
    /// require this.
    #[serde(default)]
    pub dsn_secret_name: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            jobs_db_path: default_jobs_db_path(),
            rate_limit_db_path: default_rate_limit_db_path(),
            dsn_secret_name: None,
        }
    }
}

impl DatabaseConfig {
    /// Validates database configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_path_buf("database.jobs_db_path", &self.jobs_db_path)?;
        validate_path_buf("database.rate_limit_db_path", &self.rate_limit_db_path)?;
        if self.jobs_db_path == self.rate_limit_db_path {
            return Err(ConfigError::Invalid(
                "database.jobs_db_path and database.rate_limit_db_path must differ".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: JWT Configuration
// ============================================================================

/// Supported JWT verification algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JwtAlgorithm {
    /// RSA PKCS#1 v1.5 with SHA-256.
    Rs256,
    /// ECDSA on P-256 with SHA-256.
    Es256,
}

/// JWT verification configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    /// Expected `iss` claim.
    pub issuer: String,
    /// Expected `aud` claim.
    pub audience: String,
    /// Verification algorithm.
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: JwtAlgorithm,
    /// Name of the secret holding the verification key material (PEM or
    /// JWK), resolved via [`IntakeConfig::resolve_secrets`].
    pub public_key_secret_name: String,
    /// Clock skew tolerance, in seconds, applied to `exp`/`nbf` checks.
    #[serde(default = "default_jwt_clock_skew_seconds")]
    pub clock_skew_seconds: u64,
}

impl JwtConfig {
    /// Validates JWT configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.trim().is_empty() {
            return Err(ConfigError::Invalid("jwt.issuer must be non-empty".to_string()));
        }
        if self.audience.trim().is_empty() {
            return Err(ConfigError::Invalid("jwt.audience must be non-empty".to_string()));
        }
        if self.public_key_secret_name.trim().is_empty() {
            return Err(ConfigError::Invalid("jwt.public_key_secret_name must be non-empty".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Idempotency Configuration
// ============================================================================

/// Idempotency resolution and storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IdempotencyConfig {
    /// Behavior for raw keys outside the canonical fast-path format.
    #[serde(default)]
    pub compat_mode: CompatMode,
    /// Time-to-live for stored idempotency records, in seconds.
    #[serde(default = "default_idempotency_ttl_seconds")]
    pub ttl_seconds: i64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            compat_mode: CompatMode::default(),
            ttl_seconds: default_idempotency_ttl_seconds(),
        }
    }
}

impl IdempotencyConfig {
    /// Validates idempotency configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl_seconds < MIN_IDEMPOTENCY_TTL_SECONDS || self.ttl_seconds > MAX_IDEMPOTENCY_TTL_SECONDS {
            return Err(ConfigError::Invalid(format!(
                "idempotency.ttl_seconds must be between {MIN_IDEMPOTENCY_TTL_SECONDS} and {MAX_IDEMPOTENCY_TTL_SECONDS}"
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Rate Limit Configuration
// ============================================================================

/// Default bucket settings and named per-resource overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    /// Default bucket capacity.
    #[serde(default = "default_rate_limit")]
    pub default_limit: u32,
    /// Default refill window, in seconds.
    #[serde(default = "default_rate_limit_window_seconds")]
    pub default_window_seconds: u32,
    /// Whether a rate-limiter storage failure allows the request through.
    #[serde(default = "default_fail_open")]
    pub fail_open: bool,
    /// Per-resource overrides of the default bucket.
    #[serde(default)]
    pub overrides: Vec<RateLimitOverride>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            default_limit: default_rate_limit(),
            default_window_seconds: default_rate_limit_window_seconds(),
            fail_open: default_fail_open(),
            overrides: Vec::new(),
        }
    }
}

impl RateLimitSettings {
    /// Validates rate limit configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_limit == 0 {
            return Err(ConfigError::Invalid("rate_limit.default_limit must be greater than zero".to_string()));
        }
        if self.default_window_seconds == 0 {
            return Err(ConfigError::Invalid("rate_limit.default_window_seconds must be greater than zero".to_string()));
        }
        if self.overrides.len() > MAX_RATE_LIMIT_OVERRIDES {
            return Err(ConfigError::Invalid("rate_limit.overrides has too many entries".to_string()));
        }
        for over in &self.overrides {
            over.validate()?;
        }
        Ok(())
    }
}

/// A named override of the default rate-limit bucket.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitOverride {
    /// Resource name this override applies to (e.g. `jobs.submit`).
    pub resource: String,
    /// Bucket capacity for this resource.
    pub limit: u32,
    /// Refill window, in seconds, for this resource.
    pub window_seconds: u32,
}

impl RateLimitOverride {
    /// Validates a single rate-limit override.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.resource.trim().is_empty() {
            return Err(ConfigError::Invalid("rate_limit.overrides.resource must be non-empty".to_string()));
        }
        if self.limit == 0 {
            return Err(ConfigError::Invalid(format!("rate_limit.overrides[{}].limit must be greater than zero", self.resource)));
        }
        if self.window_seconds == 0 {
            return Err(ConfigError::Invalid(format!(
                "rate_limit.overrides[{}].window_seconds must be greater than zero",
                self.resource
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Dispatch Configuration
// ============================================================================

/// Outbox dispatcher configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchSettings {
    /// Poll interval, in milliseconds, used as a fallback when no
    /// batch-available notification arrives.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Entries selected per drain pass.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Delivery attempts before an entry is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff, in seconds, for the first retry.
    #[serde(default = "default_base_backoff_seconds")]
    pub base_backoff_seconds: i64,
    /// Upper bound on computed backoff, in seconds.
    #[serde(default = "default_max_backoff_seconds")]
    pub max_backoff_seconds: i64,
    /// Age, in days, a dispatched outbox entry must reach before the
    /// periodic purge removes it.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            base_backoff_seconds: default_base_backoff_seconds(),
            max_backoff_seconds: default_max_backoff_seconds(),
            retention_days: default_retention_days(),
        }
    }
}

impl DispatchSettings {
    /// Validates dispatch configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS || self.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            return Err(ConfigError::Invalid(format!(
                "dispatch.poll_interval_ms must be between {MIN_POLL_INTERVAL_MS} and {MAX_POLL_INTERVAL_MS}"
            )));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("dispatch.batch_size must be greater than zero".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("dispatch.max_attempts must be greater than zero".to_string()));
        }
        if self.base_backoff_seconds <= 0 {
            return Err(ConfigError::Invalid("dispatch.base_backoff_seconds must be greater than zero".to_string()));
        }
        if self.max_backoff_seconds < self.base_backoff_seconds {
            return Err(ConfigError::Invalid("dispatch.max_backoff_seconds must be >= base_backoff_seconds".to_string()));
        }
        if self.retention_days == 0 {
            return Err(ConfigError::Invalid("dispatch.retention_days must be greater than zero".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Retry Configuration
// ============================================================================

/// Retry chain configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Maximum retry chain depth before `job.retry` is rejected as a
    /// business rule violation.
    #[serde(default = "default_max_retry_depth")]
    pub max_retry_depth: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retry_depth: default_max_retry_depth() }
    }
}

impl RetryConfig {
    /// Validates retry configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retry_depth == 0 {
            return Err(ConfigError::Invalid("retry.max_retry_depth must be greater than zero".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

const fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_jobs_db_path() -> PathBuf {
    PathBuf::from("data/jobs.sqlite3")
}

fn default_rate_limit_db_path() -> PathBuf {
    PathBuf::from("data/rate_limits.sqlite3")
}

const fn default_jwt_algorithm() -> JwtAlgorithm {
    JwtAlgorithm::Rs256
}

const fn default_jwt_clock_skew_seconds() -> u64 {
    60
}

const fn default_idempotency_ttl_seconds() -> i64 {
    24 * 60 * 60
}

const fn default_rate_limit() -> u32 {
    100
}

const fn default_rate_limit_window_seconds() -> u32 {
    60
}

const fn default_fail_open() -> bool {
    true
}

const fn default_poll_interval_ms() -> u64 {
    1_000
}

const fn default_batch_size() -> u32 {
    100
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_base_backoff_seconds() -> i64 {
    1
}

const fn default_max_backoff_seconds() -> i64 {
    300
}

const fn default_retention_days() -> u32 {
    30
}

const fn default_max_retry_depth() -> u32 {
    3
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors returned while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
    /// A required secret was not available from the configured
    /// [`SecretsSource`].
    #[error("secret resolution error: {0}")]
    Secret(String),
}

// ============================================================================
// SECTION: Path Helpers
// ============================================================================

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a configured path field against the same limits applied to the
/// config file's own path.
fn validate_path_buf(field: &str, path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in path.components() {
        if component.as_os_str().to_string_lossy().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test assertions on config parsing; a panic here is a test failure."
    )]

    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
        [jwt]
        issuer = "https://auth.example.com/"
        audience = "job-intake"
        public_key_secret_name = "JOB_INTAKE_JWT_PUBLIC_KEY"
        "#
    }

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config: IntakeConfig = toml::from_str(minimal_toml()).expect("parses");
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.dispatch.max_attempts, 5);
        assert_eq!(config.retry.max_retry_depth, 3);
        config.validate().expect("valid");
    }

    #[test]
    fn rejects_wildcard_cors_without_opt_in() {
        let mut config: IntakeConfig = toml::from_str(minimal_toml()).expect("parses");
        config.server.cors.allowed_origins = vec!["*".to_string()];
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn allows_wildcard_cors_with_explicit_opt_in() {
        let mut config: IntakeConfig = toml::from_str(minimal_toml()).expect("parses");
        config.server.cors.allowed_origins = vec!["*".to_string()];
        config.server.cors.allow_wildcard = true;
        config.validate().expect("valid with explicit opt-in");
    }

    #[test]
    fn rejects_matching_db_paths() {
        let mut config: IntakeConfig = toml::from_str(minimal_toml()).expect("parses");
        config.database.rate_limit_db_path = config.database.jobs_db_path.clone();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn resolves_secrets_from_source() {
        let config: IntakeConfig = toml::from_str(minimal_toml()).expect("parses");
        struct Secrets;
        impl SecretsSource for Secrets {
            fn get(&self, name: &str) -> Option<String> {
                (name == "JOB_INTAKE_JWT_PUBLIC_KEY").then(|| "key-material".to_string())
            }
        }
        let resolved = config.resolve_secrets(&Secrets).expect("resolves");
        assert_eq!(resolved.jwt_public_key, "key-material");
        assert!(resolved.database_dsn.is_none());
    }

    #[test]
    fn resolve_secrets_fails_when_missing() {
        let config: IntakeConfig = toml::from_str(minimal_toml()).expect("parses");
        struct EmptySecrets;
        impl SecretsSource for EmptySecrets {
            fn get(&self, _name: &str) -> Option<String> {
                None
            }
        }
        assert!(matches!(config.resolve_secrets(&EmptySecrets), Err(ConfigError::Secret(_))));
    }
}
