// crates/intake-core/src/time.rs
// ============================================================================
// Module: Job Intake Time Model
// Description: UTC timestamp newtype and the clock seam used by the
// aggregate and stores.
// Purpose: Keep "now" injectable so state-machine and TTL logic is testable
// without sleeping.
// Dependencies: chrono
// ============================================================================

//! ## Overview
//! All durable timestamps in the intake core are UTC and wrapped in
//! [`Timestamp`]. A [`Clock`] trait is the only source of "now" the domain
//! layer is allowed to consult, so tests can supply deterministic time.

// ============================================================================
// SECTION: Imports
// ============================================================================

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// UTC timestamp used throughout the intake core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Wraps an existing UTC `DateTime`.
    #[must_use]
    pub const fn new(value: DateTime<Utc>) -> Self {
        Self(value)
    }

    /// Returns the underlying `chrono` value.
    #[must_use]
    pub const fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Returns a timestamp `seconds` in the future.
    #[must_use]
    pub fn plus_seconds(&self, seconds: i64) -> Self {
        Self(self.0 + chrono::Duration::seconds(seconds))
    }

    /// Returns the difference `self - other`, in whole seconds.
    #[must_use]
    pub fn seconds_since(&self, other: &Self) -> i64 {
        (self.0 - other.0).num_seconds()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Source of "now" for the domain and application layers.
///
/// Production code uses [`SystemClock`]; tests use a fixed or steppable
/// fake so state-machine and TTL assertions are deterministic.
pub trait Clock: Send + Sync {
    /// Returns the current UTC time.
    fn now(&self) -> Timestamp;
}

/// Clock backed by the operating system's wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp(Utc::now())
    }
}

#[cfg(test)]
pub use test_support::FixedClock;

#[cfg(test)]
mod test_support {
    #![allow(clippy::unwrap_used, reason = "Test-only fake clock; a poisoned mutex is a test bug.")]

    use std::sync::Mutex;

    use super::Clock;
    use super::Timestamp;

    /// Clock that returns a fixed, mutable instant. Useful for asserting
    /// `created_at`/`updated_at`/TTL behavior without real sleeps.
    pub struct FixedClock {
        /// Current instant returned by `now`.
        instant: Mutex<Timestamp>,
    }

    impl FixedClock {
        /// Creates a fixed clock starting at `instant`.
        #[must_use]
        pub fn new(instant: Timestamp) -> Self {
            Self {
                instant: Mutex::new(instant),
            }
        }

        /// Advances the clock by `seconds`.
        pub fn advance(&self, seconds: i64) {
            let mut guard = self.instant.lock().unwrap();
            *guard = guard.plus_seconds(seconds);
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> Timestamp {
            *self.instant.lock().unwrap()
        }
    }
}
