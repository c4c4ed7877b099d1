// crates/intake-core/src/events.rs
// ============================================================================
// Module: Domain Events
// Description: CloudEvents-1.0-shaped envelope and the tagged union of
// job-lifecycle event payloads.
// Purpose: Give the job aggregate a single event type it can emit and the
// outbox a single type it can durably store and later redeliver.
// Dependencies: serde, uuid, crate::identifiers, crate::job, crate::time
// ============================================================================

//! ## Overview
//! The source system modeled each event as a subclass of a common base
//! class; here they are one enum tagged on `type`, matched exhaustively by
//! dispatch code instead of relying on runtime type checks.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::identifiers::JobId;
use crate::identifiers::TenantId;
use crate::job::Counters;
use crate::time::Timestamp;

/// Schema version carried on every emitted event's envelope.
pub const SCHEMA_VERSION: u32 = 1;

/// CloudEvents `specversion` carried on every emitted event.
pub const CLOUDEVENTS_SPEC_VERSION: &str = "1.0";

/// CloudEvents `source` attribute for events emitted by this service.
pub const EVENT_SOURCE: &str = "job-intake-core";

// ============================================================================
// SECTION: Event Payloads
// ============================================================================

/// The event-specific body. Serialized under the envelope's `data` field,
/// keyed by a lowercase variant tag; the envelope's own `type` field (see
/// [`DomainEvent::event_type`]) carries the canonical `job.<verb>` string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventData {
    /// A job was accepted and queued.
    Submitted,
    /// A worker picked up the job.
    Started,
    /// The job completed successfully.
    Succeeded {
        /// Final processing counters.
        counters: Counters,
    },
    /// The job failed.
    Failed {
        /// Human-readable failure reason. Never includes caller-supplied
        /// raw bytes (file references, idempotency keys).
        error: String,
    },
    /// The job was cancelled by its caller.
    Cancelled {
        /// Caller-supplied cancellation reason.
        reason: String,
    },
    /// A retry was queued on behalf of a failed job.
    Retried {
        /// The job this retry was queued on behalf of.
        retry_of: JobId,
        /// Depth of this retry within its chain (1 for the first retry).
        retry_depth: u32,
    },
    /// A queued job expired before being picked up.
    Expired,
}

impl EventData {
    /// Returns the CloudEvents `type` string for this payload.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Submitted => "job.submitted",
            Self::Started => "job.started",
            Self::Succeeded { .. } => "job.succeeded",
            Self::Failed { .. } => "job.failed",
            Self::Cancelled { .. } => "job.cancelled",
            Self::Retried { .. } => "job.retried",
            Self::Expired => "job.expired",
        }
    }
}

// ============================================================================
// SECTION: Domain Event Envelope
// ============================================================================

/// A CloudEvents-1.0-shaped domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Unique event identifier.
    pub id: Uuid,
    /// CloudEvents `source`.
    pub source: String,
    /// CloudEvents `specversion`, always `"1.0"`.
    pub specversion: String,
    /// CloudEvents `type`, e.g. `job.submitted`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// CloudEvents `subject`, `job:<uuid>`.
    pub subject: String,
    /// Tenant the event belongs to.
    pub tenant_id: TenantId,
    /// Aggregate version immediately after the transition this event
    /// records.
    pub aggregate_version: u64,
    /// Actor responsible for the transition, if known.
    pub actor_id: Option<String>,
    /// Distributed trace identifier, if propagated by the caller.
    pub trace_id: Option<String>,
    /// Event schema version.
    pub schema_version: u32,
    /// When the transition occurred.
    pub time: Timestamp,
    /// Event-specific payload.
    pub data: EventData,
}

impl DomainEvent {
    /// Builds a new domain event envelope around `data`.
    #[must_use]
    pub fn new(
        tenant_id: TenantId,
        job_id: JobId,
        aggregate_version: u64,
        occurred_at: Timestamp,
        data: EventData,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: EVENT_SOURCE.to_string(),
            specversion: CLOUDEVENTS_SPEC_VERSION.to_string(),
            event_type: data.event_type().to_string(),
            subject: format!("job:{job_id}"),
            tenant_id,
            aggregate_version,
            actor_id: None,
            trace_id: None,
            schema_version: SCHEMA_VERSION,
            time: occurred_at,
            data,
        }
    }

    /// Attaches an actor and trace id supplied by the calling use case.
    #[must_use]
    pub fn with_context(mut self, actor_id: Option<String>, trace_id: Option<String>) -> Self {
        self.actor_id = actor_id;
        self.trace_id = trace_id;
        self
    }

    /// Returns the CloudEvents `type` for this event.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Returns the event payload.
    #[must_use]
    pub fn data(&self) -> &EventData {
        &self.data
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test assertions on event construction; a panic here is a test failure."
    )]

    use super::*;

    #[test]
    fn envelope_carries_cloudevents_fields() {
        let tenant = TenantId::parse("t_acme").expect("valid");
        let job_id = JobId::generate();
        let now = Timestamp::new(chrono::Utc::now());
        let event = DomainEvent::new(tenant, job_id, 1, now, EventData::Submitted);
        assert_eq!(event.specversion, "1.0");
        assert_eq!(event.subject, format!("job:{job_id}"));
        assert_eq!(event.event_type(), "job.submitted");
    }

    #[test]
    fn event_type_matches_payload_tag() {
        let tenant = TenantId::parse("t_acme").expect("valid");
        let job_id = JobId::generate();
        let now = Timestamp::new(chrono::Utc::now());
        let event = DomainEvent::new(
            tenant,
            job_id,
            2,
            now,
            EventData::Failed { error: "boom".to_string() },
        );
        assert_eq!(event.event_type(), "job.failed");
    }
}
