// crates/intake-api/src/dto.rs
// ============================================================================
// Module: HTTP Data Transfer Objects
// Description: Request bodies, response projections, and list/pagination
// envelopes for the `/v1/jobs*` surface.
// Purpose: Keep the wire shape separate from the `Job` aggregate so the
// domain layer never has to know about JSON field naming or HTTP semantics.
// Dependencies: serde, intake-core
// ============================================================================

use intake_core::Counters;
use intake_core::Job;
use intake_core::JobId;
use intake_core::JobStatus;
use intake_core::JobType;
use serde::Deserialize;
use serde::Serialize;

/// `POST /v1/jobs` request body.
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub channel: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub file_ref: String,
    pub rules_profile_id: String,
    pub seller_id: String,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Metadata describing how a response should be interpreted by the caller,
/// distinct from the job projection itself.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ResponseMeta {
    /// True when this response replays a previously stored result rather
    /// than reflecting a freshly created job.
    pub is_replay: bool,
    /// Tokens remaining in the caller's rate-limit bucket after this call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_remaining: Option<u32>,
    /// Unix timestamp when the bucket is next expected to have a token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_reset: Option<i64>,
}

/// `GET`/`POST` job projection shared by submit, get, and retry responses.
#[derive(Debug, Clone, Serialize)]
pub struct JobResponse {
    pub job_id: JobId,
    pub tenant_id: String,
    pub status: JobStatus,
    pub channel: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub file_ref: String,
    pub rules_profile_id: String,
    pub seller_id: String,
    pub counters: Counters,
    pub retry_of: Option<JobId>,
    pub retry_depth: u32,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
    pub version: u64,
    pub meta: ResponseMeta,
}

impl JobResponse {
    /// Projects a `Job` aggregate into its wire representation.
    #[must_use]
    pub fn from_job(job: &Job, meta: ResponseMeta) -> Self {
        Self {
            job_id: job.id(),
            tenant_id: job.tenant_id().to_string(),
            status: job.status(),
            channel: job.channel().to_string(),
            job_type: job.job_type(),
            file_ref: job.file_ref().to_string(),
            rules_profile_id: job.rules_profile_id().to_string(),
            seller_id: job.seller_id().to_string(),
            counters: job.counters(),
            retry_of: job.retry_of(),
            retry_depth: job.retry_depth(),
            created_at: job.created_at().to_string(),
            updated_at: job.updated_at().to_string(),
            completed_at: job.completed_at().map(|t| t.to_string()),
            version: job.version(),
            meta,
        }
    }
}

/// `GET /v1/jobs` query parameters.
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<JobStatus>,
    pub channel: Option<String>,
    #[serde(rename = "type")]
    pub job_type: Option<JobType>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

const fn default_limit() -> u32 {
    20
}

impl ListJobsQuery {
    /// Clamps `limit` to the `[1, 100]` range the external interface
    /// promises, regardless of what the caller requested.
    #[must_use]
    pub fn clamped_limit(&self) -> u32 {
        self.limit.clamp(1, 100)
    }
}

/// Pagination metadata attached to `GET /v1/jobs`.
#[derive(Debug, Clone, Serialize)]
pub struct ListMeta {
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

/// `GET /v1/jobs` response envelope.
#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub data: Vec<JobResponse>,
    pub meta: ListMeta,
}

/// `POST /v1/jobs/{job_id}/retry` response body.
#[derive(Debug, Serialize)]
pub struct RetryJobResponse {
    pub job_id: JobId,
    pub retry_of: JobId,
    pub status: JobStatus,
}

/// `GET /health` response body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// One dependency's status within `/ready`'s breakdown.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DependencyStatus {
    Ok,
    Degraded,
    Down,
}

/// `GET /ready` response body.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub status: &'static str,
    pub database: DependencyStatus,
    pub rate_limiter: DependencyStatus,
}
