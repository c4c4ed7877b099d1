// crates/intake-api/src/broadcast_subscriber.rs
// ============================================================================
// Module: Live Stream Subscriber
// Description: Forwards every delivered domain event onto an in-process
// broadcast channel, fanning out to every open `/v1/jobs/stream` connection.
// Purpose: Let the SSE endpoint observe outbox deliveries without polling
// the store, while keeping the dispatcher itself unaware of HTTP.
// Dependencies: intake-dispatch, intake-core, tokio
// ============================================================================

//! ## Overview
//! Registered alongside `LoggingSubscriber` at the composition root. A lagged
//! or disconnected receiver never blocks delivery: `tokio::sync::broadcast`
//! drops to slow subscribers rather than propagating backpressure onto the
//! dispatcher.

use intake_core::DomainEvent;
use intake_dispatch::Interest;
use intake_dispatch::Subscriber;
use intake_dispatch::SubscriberError;
use tokio::sync::broadcast;

/// Forwards delivered events onto a broadcast channel for SSE fan-out.
pub struct BroadcastSubscriber {
    sender: broadcast::Sender<DomainEvent>,
}

impl BroadcastSubscriber {
    /// Wraps an existing broadcast sender (shared with the live stream
    /// route's `AppState`).
    #[must_use]
    pub const fn new(sender: broadcast::Sender<DomainEvent>) -> Self {
        Self { sender }
    }
}

impl Subscriber for BroadcastSubscriber {
    fn name(&self) -> &str {
        "live_stream"
    }

    fn interest(&self) -> Interest {
        Interest::All
    }

    fn handle(&self, event: &DomainEvent) -> Result<(), SubscriberError> {
        // No open SSE connections is the common case, not a failure.
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}
