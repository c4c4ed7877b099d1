// crates/intake-dispatch/src/dispatcher.rs
// ============================================================================
// Module: Composite Dispatcher
// Description: Drains the outbox, fans each entry out to every interested
// subscriber, and bookkeeps retry/backoff/dead-letter state back into the
// outbox store.
// Purpose: Give the outbox a single, restartable drain loop decoupled from
// whatever consumes the events.
// Dependencies: intake-core, rand, tracing
// ============================================================================

//! ## Overview
//! Mirrors the shape of `decision-gate-broker::CompositeBroker`: a builder
//! assembles a registry, and a single dispatch entry point fans a unit of
//! work out to the registered consumers. Here the registry is a list of
//! [`Subscriber`]s rather than a scheme-keyed map (an outbox entry can be of
//! interest to more than one subscriber at once), and delivery failures are
//! turned into retry scheduling instead of propagated as a hard error.

use std::sync::Arc;

use intake_core::DomainError;
use intake_core::OutboxEntry;
use intake_core::OutboxStore;
use intake_core::Timestamp;
use rand::Rng;

use crate::subscriber::Subscriber;

/// Tunables for the dispatch loop's retry/backoff behavior.
#[derive(Debug, Clone, Copy)]
pub struct DispatchPolicy {
    /// Entries to select per drain pass.
    pub batch_size: u32,
    /// Delivery attempts before an entry is dead-lettered.
    pub max_attempts: u32,
    /// Base backoff, in seconds, for the first retry.
    pub base_backoff_seconds: i64,
    /// Upper bound on computed backoff, in seconds.
    pub max_backoff_seconds: i64,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_attempts: 5,
            base_backoff_seconds: 1,
            max_backoff_seconds: 300,
        }
    }
}

impl DispatchPolicy {
    /// Computes the exponential backoff, with jitter, for `attempt_count`
    /// failures seen so far (1 after the first failure).
    fn backoff_seconds(&self, attempt_count: u32) -> i64 {
        let exponent = attempt_count.min(16);
        let raw = self.base_backoff_seconds.saturating_mul(1_i64 << exponent);
        let capped = raw.min(self.max_backoff_seconds).max(self.base_backoff_seconds);
        let jitter = rand::thread_rng().gen_range(0..=capped / 4 + 1);
        (capped - jitter).max(self.base_backoff_seconds)
    }
}

/// Outcome of one drain pass, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainSummary {
    /// Entries selected this pass.
    pub selected: u32,
    /// Entries that delivered to every interested subscriber.
    pub delivered: u32,
    /// Entries that failed at least one subscriber and were rescheduled.
    pub retried: u32,
    /// Entries that exhausted their attempt budget and were dead-lettered.
    pub dead_lettered: u32,
}

/// Fans outbox entries out to registered subscribers and bookkeeps outcomes.
pub struct CompositeDispatcher {
    outbox: Arc<dyn OutboxStore>,
    subscribers: Vec<Arc<dyn Subscriber>>,
    policy: DispatchPolicy,
}

impl CompositeDispatcher {
    /// Creates a dispatcher over `outbox`, with no subscribers registered.
    #[must_use]
    pub fn new(outbox: Arc<dyn OutboxStore>, policy: DispatchPolicy) -> Self {
        Self { outbox, subscribers: Vec::new(), policy }
    }

    /// Registers a subscriber. Order of registration is the order
    /// subscribers are invoked in for each entry.
    #[must_use]
    pub fn with_subscriber(mut self, subscriber: impl Subscriber + 'static) -> Self {
        self.subscribers.push(Arc::new(subscriber));
        self
    }

    /// Selects one batch from the outbox and attempts delivery to every
    /// interested subscriber for each entry.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::StorageUnavailable`] if the outbox cannot be
    /// read or written; individual subscriber delivery failures are
    /// recovered internally as retries, not propagated.
    pub fn drain_once(&self, now: Timestamp) -> Result<DrainSummary, DomainError> {
        let batch = self.outbox.select_batch(self.policy.batch_size, self.policy.max_attempts, now)?;
        let mut summary = DrainSummary { selected: u32::try_from(batch.len()).unwrap_or(u32::MAX), ..DrainSummary::default() };

        for entry in &batch {
            match self.deliver_one(entry) {
                Ok(()) => {
                    self.outbox.mark_dispatched(entry.id, now)?;
                    summary.delivered += 1;
                }
                Err(failure) => {
                    let next_attempt = entry.attempt_count + 1;
                    let next_visible_at = now.plus_seconds(self.policy.backoff_seconds(next_attempt));
                    self.outbox.mark_failed(entry.id, &failure, next_visible_at, self.policy.max_attempts)?;
                    if next_attempt >= self.policy.max_attempts {
                        summary.dead_lettered += 1;
                        tracing::warn!(
                            outbox_id = %entry.id,
                            event_type = entry.event_type,
                            attempts = next_attempt,
                            "outbox entry dead-lettered"
                        );
                    } else {
                        summary.retried += 1;
                    }
                }
            }
        }

        Ok(summary)
    }

    /// Removes dispatched outbox entries older than `cutoff`, per the
    /// retention-driven periodic purge.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::StorageUnavailable`] if the outbox cannot be
    /// written.
    pub fn purge_dispatched_before(&self, cutoff: Timestamp) -> Result<u64, DomainError> {
        self.outbox.purge_dispatched_before(cutoff)
    }

    /// Delivers one entry to every interested, currently-registered
    /// subscriber. The first subscriber failure short-circuits the rest;
    /// the caller treats this as a single failed delivery attempt.
    fn deliver_one(&self, entry: &OutboxEntry) -> Result<(), String> {
        let event = entry.to_domain_event().map_err(|e| e.to_string())?;
        for subscriber in &self.subscribers {
            if !subscriber.is_interested_in(entry.event_type.as_str()) {
                continue;
            }
            subscriber.handle(&event).map_err(|e| format!("{}: {e}", subscriber.name()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test assertions on dispatch outcomes; a panic here is a test failure."
    )]

    use std::sync::Mutex;

    use intake_core::DomainEvent;
    use intake_core::EventData;
    use intake_core::JobId;
    use intake_core::TenantId;
    use uuid::Uuid;

    use super::*;
    use crate::subscriber::Interest;
    use crate::subscriber::SubscriberError;

    struct InMemoryOutbox {
        entries: Mutex<Vec<OutboxEntry>>,
    }

    impl InMemoryOutbox {
        fn with_entries(entries: Vec<OutboxEntry>) -> Self {
            Self { entries: Mutex::new(entries) }
        }
    }

    impl OutboxStore for InMemoryOutbox {
        fn select_batch(
            &self,
            limit: u32,
            max_attempts: u32,
            now: Timestamp,
        ) -> Result<Vec<OutboxEntry>, DomainError> {
            let guard = self.entries.lock().unwrap();
            Ok(guard
                .iter()
                .filter(|e| e.dispatched_at.is_none() && e.attempt_count < max_attempts && e.next_visible_at.as_datetime() <= now.as_datetime())
                .take(limit as usize)
                .cloned()
                .collect())
        }

        fn mark_dispatched(&self, id: Uuid, dispatched_at: Timestamp) -> Result<(), DomainError> {
            let mut guard = self.entries.lock().unwrap();
            if let Some(e) = guard.iter_mut().find(|e| e.id == id) {
                e.dispatched_at = Some(dispatched_at);
            }
            Ok(())
        }

        fn mark_failed(
            &self,
            id: Uuid,
            error: &str,
            next_visible_at: Timestamp,
            max_attempts: u32,
        ) -> Result<(), DomainError> {
            let mut guard = self.entries.lock().unwrap();
            if let Some(e) = guard.iter_mut().find(|e| e.id == id) {
                e.attempt_count += 1;
                e.last_error = Some(error.to_string());
                e.next_visible_at = next_visible_at;
                if e.attempt_count >= max_attempts {
                    e.dispatched_at = Some(next_visible_at);
                }
            }
            Ok(())
        }

        fn dead_letters(&self, _tenant: &TenantId, limit: u32) -> Result<Vec<OutboxEntry>, DomainError> {
            let guard = self.entries.lock().unwrap();
            Ok(guard.iter().filter(|e| e.attempt_count > 0 && e.dispatched_at.is_some()).take(limit as usize).cloned().collect())
        }

        fn purge_dispatched_before(&self, _cutoff: Timestamp) -> Result<u64, DomainError> {
            Ok(0)
        }
    }

    struct FailingSubscriber;

    impl Subscriber for FailingSubscriber {
        fn name(&self) -> &str {
            "failing"
        }
        fn interest(&self) -> Interest {
            Interest::All
        }
        fn handle(&self, _event: &DomainEvent) -> Result<(), SubscriberError> {
            Err(SubscriberError::DeliveryFailed { subscriber: "failing".to_string(), message: "nope".to_string() })
        }
    }

    fn sample_entry(now: Timestamp) -> OutboxEntry {
        let tenant = TenantId::parse("t_acme").expect("valid");
        let event = DomainEvent::new(tenant.clone(), JobId::generate(), 1, now, EventData::Submitted);
        OutboxEntry {
            id: Uuid::new_v4(),
            tenant_id: tenant,
            event_type: event.event_type().to_string(),
            event_version: 1,
            correlation_id: None,
            payload: serde_json::to_value(&event).expect("serializable"),
            occurred_at: now,
            attempt_count: 0,
            last_error: None,
            dispatched_at: None,
            next_visible_at: now,
        }
    }

    #[test]
    fn delivers_to_subscribed_consumer() {
        let now = Timestamp::new(chrono::Utc::now());
        let outbox = Arc::new(InMemoryOutbox::with_entries(vec![sample_entry(now)]));
        let dispatcher = CompositeDispatcher::new(outbox, DispatchPolicy::default())
            .with_subscriber(crate::subscriber::LoggingSubscriber::new());

        let summary = dispatcher.drain_once(now).expect("drain succeeds");
        assert_eq!(summary.selected, 1);
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.retried, 0);
    }

    #[test]
    fn retries_then_dead_letters_on_persistent_failure() {
        let now = Timestamp::new(chrono::Utc::now());
        let entry = sample_entry(now);
        let id = entry.id;
        let outbox = Arc::new(InMemoryOutbox::with_entries(vec![entry]));
        let policy = DispatchPolicy { max_attempts: 2, ..DispatchPolicy::default() };
        let dispatcher = CompositeDispatcher::new(outbox.clone(), policy).with_subscriber(FailingSubscriber);

        let first = dispatcher.drain_once(now).expect("drain succeeds");
        assert_eq!(first.retried, 1);
        assert_eq!(first.dead_lettered, 0);

        let later = now.plus_seconds(policy.max_backoff_seconds + 1);
        let second = dispatcher.drain_once(later).expect("drain succeeds");
        assert_eq!(second.dead_lettered, 1);

        let guard = outbox.entries.lock().unwrap();
        let stored = guard.iter().find(|e| e.id == id).expect("entry present");
        assert!(stored.dispatched_at.is_some());
        assert_eq!(stored.attempt_count, 2);
    }
}
