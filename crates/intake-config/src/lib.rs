// crates/intake-config/src/lib.rs
// ============================================================================
// Crate: intake-config
// Description: Canonical configuration model, TOML loading, validation, and
// secret resolution for the job intake service.
// Dependencies: intake-core, serde, toml
// ============================================================================

//! `intake-config` defines the canonical configuration model for the job
//! intake service: server/CORS/trusted-host settings, JWT verification,
//! idempotency and rate-limit defaults, and outbox dispatch tuning. It
//! provides strict, fail-closed validation and keeps secret material out of
//! the parsed config via [`secrets::SecretsSource`].

pub mod config;
pub mod secrets;

pub use config::ConfigError;
pub use config::CorsConfig;
pub use config::DatabaseConfig;
pub use config::DispatchSettings;
pub use config::IdempotencyConfig;
pub use config::IntakeConfig;
pub use config::JwtAlgorithm;
pub use config::JwtConfig;
pub use config::RateLimitOverride;
pub use config::RateLimitSettings;
pub use config::ResolvedSecrets;
pub use config::RetryConfig;
pub use config::ServerConfig;
pub use secrets::EnvSecretsSource;
pub use secrets::SecretsError;
pub use secrets::SecretsSource;
