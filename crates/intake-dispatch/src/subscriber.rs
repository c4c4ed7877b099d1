// crates/intake-dispatch/src/subscriber.rs
// ============================================================================
// Module: Dispatch Subscribers
// Description: The `Subscriber` trait outbox delivery fans out to, and the
// one built-in implementation this workspace ships.
// Purpose: Let the dispatcher stay ignorant of what consumes an event while
// giving every registered subscriber the same interest/deliver contract.
// Dependencies: intake-core, tracing
// ============================================================================

//! ## Overview
//! Mirrors the teacher's `Sink` trait in `decision-gate-broker`: delivery is
//! synchronous and returns a typed error on failure, with interest declared
//! per event type (or wildcard) rather than the dispatcher hardcoding which
//! subscriber wants which event. Only [`LoggingSubscriber`] ships built-in —
//! an HTTP/webhook subscriber is out of scope (spec Non-goals exclude
//! webhook delivery); downstream processing workers are expected to consume
//! the outbox directly or through a deployment-specific `Subscriber` impl.

use intake_core::DomainEvent;
use thiserror::Error;

/// Errors a [`Subscriber`] may return from [`Subscriber::handle`].
#[derive(Debug, Error)]
pub enum SubscriberError {
    /// The subscriber could not complete delivery; the caller should retry.
    #[error("subscriber {subscriber} delivery failed: {message}")]
    DeliveryFailed {
        /// Name of the subscriber that failed.
        subscriber: String,
        /// Failure detail.
        message: String,
    },
}

/// Which event types a [`Subscriber`] wants delivered to it.
#[derive(Debug, Clone)]
pub enum Interest {
    /// Every event type.
    All,
    /// Exactly these `type` strings (e.g. `job.submitted`).
    Types(Vec<String>),
}

impl Interest {
    fn matches(&self, event_type: &str) -> bool {
        match self {
            Self::All => true,
            Self::Types(types) => types.iter().any(|t| t == event_type),
        }
    }
}

/// A registered consumer of dispatched domain events.
pub trait Subscriber: Send + Sync {
    /// Stable name used in logs and delivery-failure messages.
    fn name(&self) -> &str;

    /// Declares which event types this subscriber wants to receive.
    fn interest(&self) -> Interest;

    /// Delivers `event` to this subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriberError::DeliveryFailed`] if delivery did not
    /// succeed; the dispatcher treats this the same as any other delivery
    /// failure (bumps `attempt_count`, schedules a backoff retry).
    fn handle(&self, event: &DomainEvent) -> Result<(), SubscriberError>;

    /// Returns whether this subscriber is interested in `event_type`.
    fn is_interested_in(&self, event_type: &str) -> bool {
        self.interest().matches(event_type)
    }
}

/// Subscriber that logs every event at `info` level via `tracing`.
///
/// Always registered; gives every deployment a durable audit trail of
/// dispatched events even when no other subscriber is configured.
pub struct LoggingSubscriber {
    name: String,
}

impl LoggingSubscriber {
    /// Creates a logging subscriber under the name `"logging"`.
    #[must_use]
    pub fn new() -> Self {
        Self { name: "logging".to_string() }
    }
}

impl Default for LoggingSubscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl Subscriber for LoggingSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    fn interest(&self) -> Interest {
        Interest::All
    }

    fn handle(&self, event: &DomainEvent) -> Result<(), SubscriberError> {
        tracing::info!(
            event_id = %event.id,
            event_type = event.event_type(),
            tenant_id = event.tenant_id.as_str(),
            subject = %event.subject,
            aggregate_version = event.aggregate_version,
            "dispatched event"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test assertions on subscriber delivery; a panic here is a test failure."
    )]

    use intake_core::EventData;
    use intake_core::JobId;
    use intake_core::TenantId;
    use intake_core::Timestamp;

    use super::*;

    #[test]
    fn logging_subscriber_accepts_every_event() {
        let subscriber = LoggingSubscriber::new();
        assert!(subscriber.is_interested_in("job.submitted"));
        assert!(subscriber.is_interested_in("job.anything"));

        let tenant = TenantId::parse("t_acme").expect("valid");
        let event = DomainEvent::new(
            tenant,
            JobId::generate(),
            1,
            Timestamp::new(chrono::Utc::now()),
            EventData::Submitted,
        );
        assert!(subscriber.handle(&event).is_ok());
    }

    #[test]
    fn interest_types_restricts_matching() {
        let interest = Interest::Types(vec!["job.failed".to_string()]);
        assert!(interest.matches("job.failed"));
        assert!(!interest.matches("job.submitted"));
    }
}
