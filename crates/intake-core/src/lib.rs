// crates/intake-core/src/lib.rs
// ============================================================================
// Crate: intake-core
// Description: Domain types, the idempotency resolver, the job
// aggregate/state machine, and the backend-agnostic interfaces the rest of
// the workspace implements. No I/O lives in this crate.
// ============================================================================

//! ## Overview
//! `intake-core` is the pure domain layer of the job intake service: value
//! objects, the idempotency resolver, the job aggregate and its state
//! machine, domain events, and the interfaces (ports) that storage,
//! dispatch, and API crates implement. Nothing here performs I/O or depends
//! on a specific backend.

pub mod errors;
pub mod events;
pub mod identifiers;
pub mod idempotency;
pub mod inmemory;
pub mod interfaces;
pub mod job;
pub mod time;

pub use errors::DomainError;
pub use events::DomainEvent;
pub use events::EventData;
pub use identifiers::Channel;
pub use identifiers::IdentifierError;
pub use identifiers::JobId;
pub use identifiers::RulesProfileId;
pub use identifiers::SellerId;
pub use identifiers::TenantId;
pub use idempotency::CompatMode;
pub use idempotency::IdempotencyRecord;
pub use idempotency::ResolvedKey;
pub use idempotency::ScopeHash;
pub use idempotency::compute_response_hash;
pub use idempotency::hashes_match;
pub use idempotency::resolve as resolve_idempotency_key;
pub use inmemory::InMemoryIdempotencyStore;
pub use inmemory::InMemoryRateLimiter;
pub use interfaces::IdempotencyStore;
pub use interfaces::JobRepository;
pub use interfaces::OutboxEntry;
pub use interfaces::OutboxStore;
pub use interfaces::RateLimitInfo;
pub use interfaces::RateLimiter;
pub use job::Counters;
pub use job::FileRef;
pub use job::Job;
pub use job::JobFilter;
pub use job::JobStatus;
pub use job::JobType;
pub use job::Metadata;
pub use time::Clock;
pub use time::SystemClock;
pub use time::Timestamp;
