// crates/intake-core/src/job.rs
// ============================================================================
// Module: Job Aggregate & State Machine
// Description: The Job aggregate root, its value objects, and the validated
// status transitions that emit domain events.
// Purpose: Give the rest of the system a single, immutable-construction
// source of truth for "what is a job and what can happen to it".
// Dependencies: crate::identifiers, crate::events, crate::time, crate::errors
// ============================================================================

//! ## Overview
//! A [`Job`] is created once via [`Job::create`] and thereafter only ever
//! replaced by the result of a transition method (`start`, `succeed`,
//! `fail`, `cancel`, `retry`, `expire`). Every transition either returns a
//! new, valid `Job` with exactly one freshly appended event, or fails with
//! [`DomainError::InvalidStateTransition`] and leaves the caller's value
//! untouched (transition methods take `&self` and return a new `Job`).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use url::Url;

use crate::errors::DomainError;
use crate::events::DomainEvent;
use crate::events::EventData;
use crate::identifiers::Channel;
use crate::identifiers::JobId;
use crate::identifiers::RulesProfileId;
use crate::identifiers::SellerId;
use crate::identifiers::TenantId;
use crate::idempotency::ResolvedKey;
use crate::time::Clock;
use crate::time::Timestamp;

// ============================================================================
// SECTION: Job Type
// ============================================================================

/// The kind of work a job performs against its input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Validate the input file against the job's rules profile.
    Validation,
    /// Validate and apply automatic corrections.
    Correction,
    /// Validate and enrich records with derived fields.
    Enrichment,
}

// ============================================================================
// SECTION: FileRef
// ============================================================================

/// File extensions that are never accepted regardless of scheme.
const DANGEROUS_EXTENSIONS: &[&str] =
    &["exe", "zip", "bat", "cmd", "sh", "dll", "com", "scr"];

/// Schemes an input file reference may use.
const ALLOWED_SCHEMES: &[&str] = &["https", "s3", "gs"];

/// A validated reference to the seller's uploaded input file.
///
/// # Invariants
/// - Scheme is one of `https`, `s3`, `gs`.
/// - No `..` path segment (defense against path traversal on schemes where
///   the path is later used as a filesystem key).
/// - Extension is not in [`DANGEROUS_EXTENSIONS`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileRef(Url);

impl FileRef {
    /// Parses and validates a file reference URL.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] when `raw` is not a URL, uses a
    /// disallowed scheme, or contains a `..` path segment; returns
    /// [`DomainError::SecurityViolation`] when the extension is on the
    /// dangerous-extension denylist, since that pattern indicates intent
    /// rather than a mere formatting mistake.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let url = Url::parse(raw).map_err(|_| DomainError::Validation("invalid file reference".into()))?;

        if !ALLOWED_SCHEMES.contains(&url.scheme()) {
            return Err(DomainError::Validation("unsupported file reference scheme".into()));
        }

        if url.path_segments().into_iter().flatten().any(|segment| segment == "..") {
            return Err(DomainError::SecurityViolation("path traversal in file reference".into()));
        }

        if let Some(extension) = extension_of(&url) {
            if DANGEROUS_EXTENSIONS.contains(&extension.as_str()) {
                return Err(DomainError::SecurityViolation("disallowed file extension".into()));
            }
        }

        Ok(Self(url))
    }

    /// Returns the file reference as a URL.
    #[must_use]
    pub fn as_url(&self) -> &Url {
        &self.0
    }
}

fn extension_of(url: &Url) -> Option<String> {
    let last_segment = url.path_segments()?.next_back()?;
    last_segment.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())
}

impl std::fmt::Display for FileRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for FileRef {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FileRef> for String {
    fn from(value: FileRef) -> Self {
        value.0.into()
    }
}

// ============================================================================
// SECTION: Metadata
// ============================================================================

/// Maximum canonical-JSON size, in bytes, a `Metadata` value may occupy.
const MAX_METADATA_BYTES: usize = 16 * 1024;

/// Caller-supplied opaque metadata, capped in size so it cannot be used to
/// smuggle unbounded payloads through the job row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Map<String, serde_json::Value>")]
pub struct Metadata(serde_json::Map<String, serde_json::Value>);

impl Metadata {
    /// Returns an empty metadata map.
    #[must_use]
    pub fn empty() -> Self {
        Self(serde_json::Map::new())
    }

    /// Validates and wraps a caller-supplied metadata map.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] when the canonical JSON
    /// serialization exceeds [`MAX_METADATA_BYTES`].
    pub fn new(map: serde_json::Map<String, serde_json::Value>) -> Result<Self, DomainError> {
        let size = serde_json::to_vec(&map)
            .map_err(|e| DomainError::Validation(format!("metadata not serializable: {e}")))?
            .len();
        if size > MAX_METADATA_BYTES {
            return Err(DomainError::Validation("metadata exceeds size limit".into()));
        }
        Ok(Self(map))
    }

    /// Returns the underlying JSON map.
    #[must_use]
    pub fn as_map(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.0
    }

    /// Returns a metadata value carrying a `retry_of` backlink to the
    /// original job, merged over any caller-supplied metadata.
    #[must_use]
    pub fn with_retry_of(mut self, original: JobId) -> Self {
        self.0.insert("retry_of".to_string(), serde_json::Value::String(original.to_string()));
        self
    }
}

impl TryFrom<serde_json::Map<String, serde_json::Value>> for Metadata {
    type Error = DomainError;

    fn try_from(value: serde_json::Map<String, serde_json::Value>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

// ============================================================================
// SECTION: Counters
// ============================================================================

/// Progress counters for a job's processing run.
///
/// # Invariants
/// - All fields non-negative.
/// - `processed <= total`.
/// - `errors + warnings <= processed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Counters {
    /// Total records to process.
    pub total: u64,
    /// Records processed so far.
    pub processed: u64,
    /// Records that errored.
    pub errors: u64,
    /// Records that produced warnings.
    pub warnings: u64,
}

impl Counters {
    /// Validates the counter invariants.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] when `processed > total` or
    /// `errors + warnings > processed`.
    pub fn validate(self) -> Result<Self, DomainError> {
        if self.processed > self.total {
            return Err(DomainError::Validation("processed exceeds total".into()));
        }
        if self.errors.saturating_add(self.warnings) > self.processed {
            return Err(DomainError::Validation("errors + warnings exceeds processed".into()));
        }
        Ok(self)
    }
}

// ============================================================================
// SECTION: Job Status
// ============================================================================

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, waiting to be picked up by a worker.
    Queued,
    /// Being processed by a worker.
    Running,
    /// Completed successfully. Terminal.
    Succeeded,
    /// Completed with an unrecoverable error. Can be retried.
    Failed,
    /// A fresh retry has been queued on behalf of a failed job.
    Retrying,
    /// Cancelled by the caller. Terminal.
    Cancelled,
    /// Expired before being picked up. Terminal.
    Expired,
}

impl JobStatus {
    /// Returns true for statuses that never transition further.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Cancelled | Self::Expired)
    }

    /// Returns true iff `self -> to` is an allowed transition per the status
    /// table.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Queued, Self::Running | Self::Cancelled | Self::Expired)
                | (Self::Running, Self::Succeeded | Self::Failed | Self::Cancelled)
                | (Self::Failed, Self::Retrying)
                | (Self::Retrying, Self::Queued | Self::Failed)
        )
    }
}

// ============================================================================
// SECTION: Job Aggregate
// ============================================================================

/// Default maximum retry-chain depth before `retry()` raises
/// [`DomainError::BusinessRuleViolation`].
pub const DEFAULT_MAX_RETRY_DEPTH: u32 = 3;

/// The job aggregate root.
///
/// Construction (`create`) and every transition method are the only ways to
/// produce a value; there are no public setters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    id: JobId,
    tenant_id: TenantId,
    seller_id: SellerId,
    channel: Channel,
    job_type: JobType,
    file_ref: FileRef,
    rules_profile_id: RulesProfileId,
    status: JobStatus,
    counters: Counters,
    idempotency_key: ResolvedKey,
    metadata: Metadata,
    retry_of: Option<JobId>,
    retry_depth: u32,
    created_at: Timestamp,
    updated_at: Timestamp,
    completed_at: Option<Timestamp>,
    version: u64,
    #[serde(skip)]
    pending_events: Vec<DomainEvent>,
}

impl Job {
    /// Creates a new job in `QUEUED` status, stamping `created_at` and
    /// `updated_at` from `clock`, and pushing one `job.submitted` event.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Validation`] if `counters` (always zeroed
    /// here, kept for symmetry with the other constructors) fails its
    /// invariants — in practice this constructor cannot fail on counters,
    /// but callers rehydrating a job use the same validation path.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        tenant_id: TenantId,
        seller_id: SellerId,
        channel: Channel,
        job_type: JobType,
        file_ref: FileRef,
        rules_profile_id: RulesProfileId,
        idempotency_key: ResolvedKey,
        metadata: Metadata,
        clock: &dyn Clock,
    ) -> Self {
        let now = clock.now();
        let id = JobId::generate();
        let mut job = Self {
            id,
            tenant_id,
            seller_id,
            channel,
            job_type,
            file_ref,
            rules_profile_id,
            status: JobStatus::Queued,
            counters: Counters::default(),
            idempotency_key,
            metadata,
            retry_of: None,
            retry_depth: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
            version: 1,
            pending_events: Vec::new(),
        };
        job.pending_events.push(job.event(EventData::Submitted, now));
        job
    }

    fn event(&self, data: EventData, occurred_at: Timestamp) -> DomainEvent {
        DomainEvent::new(self.tenant_id.clone(), self.id, self.version, occurred_at, data)
    }

    fn transition(&self, to: JobStatus, clock: &dyn Clock, data: EventData) -> Result<Self, DomainError> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::InvalidStateTransition { from: self.status, to });
        }
        let now = clock.now();
        let mut next = self.clone();
        next.status = to;
        next.updated_at = now;
        next.version += 1;
        if to.is_terminal() || matches!(to, JobStatus::Succeeded | JobStatus::Failed) {
            next.completed_at = Some(now);
        }
        next.pending_events.clear();
        next.pending_events.push(next.event(data, now));
        Ok(next)
    }

    /// Moves the job from `QUEUED` to `RUNNING`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidStateTransition`] unless the job is
    /// currently `QUEUED`.
    pub fn start(&self, clock: &dyn Clock) -> Result<Self, DomainError> {
        self.transition(JobStatus::Running, clock, EventData::Started)
    }

    /// Moves the job from `RUNNING` to `SUCCEEDED`, recording final counters.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidStateTransition`] unless the job is
    /// currently `RUNNING`, or [`DomainError::Validation`] if `counters`
    /// fails its invariants.
    pub fn succeed(&self, counters: Counters, clock: &dyn Clock) -> Result<Self, DomainError> {
        let counters = counters.validate()?;
        let mut next = self.transition(JobStatus::Succeeded, clock, EventData::Succeeded { counters })?;
        next.counters = counters;
        Ok(next)
    }

    /// Moves the job from `RUNNING` to `FAILED`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidStateTransition`] unless the job is
    /// currently `RUNNING`.
    pub fn fail(&self, error: String, clock: &dyn Clock) -> Result<Self, DomainError> {
        self.transition(JobStatus::Failed, clock, EventData::Failed { error })
    }

    /// Cancels the job from `QUEUED` or `RUNNING`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidStateTransition`] from any other
    /// status.
    pub fn cancel(&self, reason: String, clock: &dyn Clock) -> Result<Self, DomainError> {
        self.transition(JobStatus::Cancelled, clock, EventData::Cancelled { reason })
    }

    /// Expires the job from `QUEUED`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidStateTransition`] unless the job is
    /// currently `QUEUED`.
    pub fn expire(&self, clock: &dyn Clock) -> Result<Self, DomainError> {
        self.transition(JobStatus::Expired, clock, EventData::Expired)
    }

    /// Does not mutate `self`. Returns a freshly created job with the same
    /// submission parameters, a new id, `QUEUED` status, metadata linking
    /// back to `self`, and its own `job.retried` event.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidStateTransition`] unless `self` is
    /// `FAILED`, or [`DomainError::BusinessRuleViolation`] if retrying would
    /// exceed `max_retry_depth`.
    pub fn retry(&self, max_retry_depth: u32, clock: &dyn Clock) -> Result<Self, DomainError> {
        if self.status != JobStatus::Failed {
            return Err(DomainError::InvalidStateTransition { from: self.status, to: JobStatus::Retrying });
        }
        let next_depth = self.retry_depth + 1;
        if next_depth > max_retry_depth {
            return Err(DomainError::BusinessRuleViolation(format!(
                "retry depth {next_depth} exceeds maximum {max_retry_depth}"
            )));
        }

        let now = clock.now();
        let new_id = JobId::generate();
        let mut retried = Self {
            id: new_id,
            tenant_id: self.tenant_id.clone(),
            seller_id: self.seller_id.clone(),
            channel: self.channel.clone(),
            job_type: self.job_type,
            file_ref: self.file_ref.clone(),
            rules_profile_id: self.rules_profile_id.clone(),
            status: JobStatus::Queued,
            counters: Counters::default(),
            idempotency_key: self.idempotency_key.clone(),
            metadata: self.metadata.clone().with_retry_of(self.id),
            retry_of: Some(self.id),
            retry_depth: next_depth,
            created_at: now,
            updated_at: now,
            completed_at: None,
            version: 1,
            pending_events: Vec::new(),
        };
        retried.pending_events.push(retried.event(
            EventData::Retried { retry_of: self.id, retry_depth: next_depth },
            now,
        ));
        Ok(retried)
    }

    /// Reconstructs a `Job` from already-validated, already-persisted
    /// field values.
    ///
    /// Unlike [`Job::create`] and the transition methods, this performs no
    /// invariant checking and produces no pending events: it exists solely
    /// for repository implementations reading a row back from durable
    /// storage, where every invariant was already enforced at the time the
    /// row was written.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn rehydrate(
        id: JobId,
        tenant_id: TenantId,
        seller_id: SellerId,
        channel: Channel,
        job_type: JobType,
        file_ref: FileRef,
        rules_profile_id: RulesProfileId,
        status: JobStatus,
        counters: Counters,
        idempotency_key: ResolvedKey,
        metadata: Metadata,
        retry_of: Option<JobId>,
        retry_depth: u32,
        created_at: Timestamp,
        updated_at: Timestamp,
        completed_at: Option<Timestamp>,
        version: u64,
    ) -> Self {
        Self {
            id,
            tenant_id,
            seller_id,
            channel,
            job_type,
            file_ref,
            rules_profile_id,
            status,
            counters,
            idempotency_key,
            metadata,
            retry_of,
            retry_depth,
            created_at,
            updated_at,
            completed_at,
            version,
            pending_events: Vec::new(),
        }
    }

    /// Drains and returns the events appended by the most recent
    /// construction or transition call.
    ///
    /// Ownership of returned events passes to the caller (the job
    /// repository), which is responsible for appending them to the outbox
    /// in the same transaction that persists this aggregate.
    pub fn take_pending_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.pending_events)
    }

    /// Returns the events pending dispatch without consuming them.
    #[must_use]
    pub fn pending_events(&self) -> &[DomainEvent] {
        &self.pending_events
    }

    #[must_use]
    pub fn id(&self) -> JobId {
        self.id
    }

    #[must_use]
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    #[must_use]
    pub fn seller_id(&self) -> &SellerId {
        &self.seller_id
    }

    #[must_use]
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    #[must_use]
    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    #[must_use]
    pub fn file_ref(&self) -> &FileRef {
        &self.file_ref
    }

    #[must_use]
    pub fn rules_profile_id(&self) -> &RulesProfileId {
        &self.rules_profile_id
    }

    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.status
    }

    #[must_use]
    pub fn counters(&self) -> Counters {
        self.counters
    }

    #[must_use]
    pub fn idempotency_key(&self) -> &ResolvedKey {
        &self.idempotency_key
    }

    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    #[must_use]
    pub fn retry_of(&self) -> Option<JobId> {
        self.retry_of
    }

    #[must_use]
    pub fn retry_depth(&self) -> u32 {
        self.retry_depth
    }

    #[must_use]
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    #[must_use]
    pub fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<Timestamp> {
        self.completed_at
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }
}

/// A filter set applied to `find_by_tenant`/`count_by_tenant` repository
/// queries. All fields are optional conjunctions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFilter {
    /// Restrict to a single status.
    pub status: Option<JobStatus>,
    /// Restrict to a single channel.
    pub channel: Option<Channel>,
    /// Restrict to a single job type.
    pub job_type: Option<JobType>,
}

/// Arbitrary JSON map kept around for callers that need an untyped view of
/// metadata (the audit log path, primarily).
pub type RawMetadata = BTreeMap<String, serde_json::Value>;

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test assertions on job construction and transitions; a panic here is a test failure."
    )]

    use super::*;
    use crate::time::FixedClock;

    fn clock() -> FixedClock {
        FixedClock::new(Timestamp::new(chrono::DateTime::from_timestamp(0, 0).expect("epoch")))
    }

    fn new_job(clock: &FixedClock) -> Job {
        Job::create(
            TenantId::parse("t_acme").expect("valid"),
            SellerId::parse("seller-1").expect("valid"),
            Channel::parse("mercado_livre").expect("valid"),
            JobType::Validation,
            FileRef::parse("https://files.example.com/a.csv").expect("valid"),
            RulesProfileId::parse("mercado_livre@1.0.0").expect("valid"),
            ResolvedKey::from_trusted("abcdef1234567890abcd".to_string()),
            Metadata::empty(),
            clock,
        )
    }

    #[test]
    fn create_emits_submitted_event_and_queued_status() {
        let clock = clock();
        let job = new_job(&clock);
        assert_eq!(job.status(), JobStatus::Queued);
        assert_eq!(job.pending_events().len(), 1);
        assert!(matches!(job.pending_events()[0].data(), EventData::Submitted));
    }

    #[test]
    fn legal_transition_chain_succeeds() {
        let clock = clock();
        let job = new_job(&clock);
        let running = job.start(&clock).expect("queued -> running");
        let counters = Counters { total: 10, processed: 10, errors: 0, warnings: 1 };
        let done = running.succeed(counters, &clock).expect("running -> succeeded");
        assert_eq!(done.status(), JobStatus::Succeeded);
        assert!(done.completed_at().is_some());
        assert_eq!(done.version(), 3);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let clock = clock();
        let job = new_job(&clock);
        let err = job.succeed(Counters::default(), &clock).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { from: JobStatus::Queued, to: JobStatus::Succeeded }));
    }

    #[test]
    fn retry_creates_new_job_with_backlink() {
        let clock = clock();
        let job = new_job(&clock);
        let running = job.start(&clock).expect("start");
        let failed = running.fail("boom".to_string(), &clock).expect("fail");
        let retried = failed.retry(DEFAULT_MAX_RETRY_DEPTH, &clock).expect("retry");
        assert_ne!(retried.id(), failed.id());
        assert_eq!(retried.status(), JobStatus::Queued);
        assert_eq!(retried.retry_of(), Some(failed.id()));
        assert_eq!(retried.retry_depth(), 1);
        assert_eq!(failed.status(), JobStatus::Failed, "retry must not mutate the original");
    }

    #[test]
    fn retry_past_max_depth_is_business_rule_violation() {
        let clock = clock();
        let mut current = new_job(&clock);
        for _ in 0..DEFAULT_MAX_RETRY_DEPTH {
            let running = current.start(&clock).expect("start");
            let failed = running.fail("boom".to_string(), &clock).expect("fail");
            current = failed.retry(DEFAULT_MAX_RETRY_DEPTH, &clock).expect("retry");
        }
        let running = current.start(&clock).expect("start");
        let failed = running.fail("boom".to_string(), &clock).expect("fail");
        let err = failed.retry(DEFAULT_MAX_RETRY_DEPTH, &clock).unwrap_err();
        assert!(matches!(err, DomainError::BusinessRuleViolation(_)));
    }

    #[test]
    fn file_ref_rejects_dangerous_extension() {
        let err = FileRef::parse("https://files.example.com/a.exe").unwrap_err();
        assert!(matches!(err, DomainError::SecurityViolation(_)));
    }

    #[test]
    fn file_ref_rejects_path_traversal() {
        let err = FileRef::parse("https://files.example.com/../secret.csv").unwrap_err();
        assert!(matches!(err, DomainError::SecurityViolation(_)));
    }

    #[test]
    fn file_ref_rejects_disallowed_scheme() {
        assert!(FileRef::parse("ftp://files.example.com/a.csv").is_err());
    }

    #[test]
    fn counters_invariants_are_enforced() {
        let bad = Counters { total: 5, processed: 10, errors: 0, warnings: 0 };
        assert!(bad.validate().is_err());
        let ok = Counters { total: 10, processed: 5, errors: 2, warnings: 3 };
        assert!(ok.validate().is_ok());
    }
}
