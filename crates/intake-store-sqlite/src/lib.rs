// crates/intake-store-sqlite/src/lib.rs
// ============================================================================
// Crate: intake-store-sqlite
// Description: SQLite-backed implementations of intake-core's storage ports:
// job repository + outbox, idempotency store, and rate limiter.
// ============================================================================

//! ## Overview
//! Three independently openable stores, each wrapping its own
//! `Arc<Mutex<rusqlite::Connection>>`. [`SqliteIntakeStore`] and
//! [`SqliteIdempotencyStore`] may point at the same database file (the
//! idempotency table lives in the same schema) or separate ones; the rate
//! limiter always owns a dedicated connection so limiter traffic never
//! contends with job writes.

pub mod config;
pub mod error;
pub mod idempotency_store;
pub mod job_repository;
pub mod rate_limiter;
pub mod schema;

pub use config::JournalMode;
pub use config::SqliteStoreConfig;
pub use error::SqliteStoreError;
pub use idempotency_store::SqliteIdempotencyStore;
pub use job_repository::SqliteIntakeStore;
pub use rate_limiter::BucketPolicy;
pub use rate_limiter::FixedPolicy;
pub use rate_limiter::PolicyResolver;
pub use rate_limiter::SqliteRateLimiter;
