// crates/intake-api/src/routes/jobs.rs
// ============================================================================
// Module: Job Routes
// Description: Submit, get, retry, list, and live-stream handlers.
// Purpose: Orchestrate intake-core's ports into the HTTP use cases described
// by the external interface.
// Dependencies: axum, intake-core, tokio-stream
// ============================================================================

use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::response::sse::Event;
use axum::response::sse::Sse;
use intake_core::Channel;
use intake_core::DomainError;
use intake_core::FileRef;
use intake_core::JobFilter;
use intake_core::JobId;
use intake_core::Metadata;
use intake_core::RulesProfileId;
use intake_core::SellerId;
use intake_core::SystemClock;
use intake_core::resolve_idempotency_key;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::IntervalStream;

use crate::context::RequestContext;
use crate::context::extract_idempotency_key;
use crate::dto::JobResponse;
use crate::dto::ListJobsQuery;
use crate::dto::ListJobsResponse;
use crate::dto::ListMeta;
use crate::dto::ResponseMeta;
use crate::dto::RetryJobResponse;
use crate::dto::SubmitJobRequest;
use crate::error::ApiError;
use crate::state::AppState;

const SUBMIT_ROUTE_TEMPLATE: &str = "/v1/jobs";
const SUBMISSION_RESOURCE: &str = "job_submission";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// `POST /v1/jobs`.
///
/// # Errors
///
/// Returns the taxonomy-mapped [`ApiError`] for every failure mode in the
/// submit use case: validation, rate limiting, idempotency conflicts, and
/// storage unavailability.
pub async fn submit_job(
    State(state): State<AppState>,
    ctx: RequestContext,
    headers: HeaderMap,
    Json(body): Json<SubmitJobRequest>,
) -> Result<Response, ApiError> {
    let domain_err = |e: DomainError| ApiError::from_domain(e, &ctx.request_id);

    let channel = Channel::parse(&body.channel)
        .map_err(|_| domain_err(DomainError::Validation("invalid channel".to_string())))?;
    let file_ref = FileRef::parse(&body.file_ref).map_err(domain_err)?;
    let rules_profile_id = RulesProfileId::parse(&body.rules_profile_id)
        .map_err(|_| domain_err(DomainError::Validation("invalid rules_profile_id".to_string())))?;
    let seller_id = SellerId::parse(&body.seller_id)
        .map_err(|_| domain_err(DomainError::Validation("invalid seller_id".to_string())))?;
    let metadata = match body.metadata.clone() {
        Some(map) => Metadata::new(map).map_err(domain_err)?,
        None => Metadata::empty(),
    };

    let raw_key = extract_idempotency_key(&headers);
    let resolved_key = resolve_idempotency_key(
        raw_key.as_deref(),
        &ctx.tenant_id,
        "POST",
        SUBMIT_ROUTE_TEMPLATE,
        state.policy.compat_mode,
    )
    .map_err(domain_err)?;

    if let Some(record) = state.idempotency.get(&ctx.tenant_id, &resolved_key).map_err(domain_err)? {
        let mut replay: JobResponse =
            serde_json::from_value(record.response_payload).map_err(|_| ApiError::internal(&ctx.request_id))?;
        replay.meta.is_replay = true;
        return Ok((StatusCode::CREATED, Json(replay)).into_response());
    }

    let allowed = state
        .rate_limiter
        .check_and_consume(&ctx.tenant_id, SUBMISSION_RESOURCE, 1)
        .map_err(domain_err)?;
    if !allowed {
        let info = state.rate_limiter.info(&ctx.tenant_id, SUBMISSION_RESOURCE).map_err(domain_err)?;
        return Err(domain_err(DomainError::RateLimitExceeded {
            resource: SUBMISSION_RESOURCE.to_string(),
            reset_time: info.reset_time,
        }));
    }

    // File-reference liveness checking (size/accessibility against the
    // object store) is an external collaborator out of this workspace's
    // scope; only syntactic validation (FileRef::parse, above) applies here.

    let clock = SystemClock;
    let job = intake_core::Job::create(
        ctx.tenant_id.clone(),
        seller_id,
        channel,
        body.job_type,
        file_ref,
        rules_profile_id,
        resolved_key.clone(),
        metadata,
        &clock,
    );

    let correlation_id = ctx.trace_id.clone();
    let saved = state.jobs.save(job, correlation_id.as_deref()).map_err(domain_err)?;

    let info = state.rate_limiter.info(&ctx.tenant_id, SUBMISSION_RESOURCE).map_err(domain_err)?;
    let meta = ResponseMeta {
        is_replay: false,
        rate_limit_remaining: Some(info.remaining),
        rate_limit_reset: Some(info.reset_time),
    };
    let response_body = JobResponse::from_job(&saved, meta);
    let payload = serde_json::to_value(&response_body).map_err(|_| ApiError::internal(&ctx.request_id))?;

    match state.idempotency.put(&ctx.tenant_id, &resolved_key, &payload, state.policy.idempotency_ttl_seconds) {
        Ok(_) => Ok((StatusCode::CREATED, Json(response_body)).into_response()),
        Err(DomainError::IdempotencyConflict { .. }) => {
            // Another submitter won the race after our job row had already
            // been committed by a separate store/connection; the winning
            // idempotency record is authoritative and this job row is left
            // behind for a retention-based reaper to clean up.
            let winner = state
                .idempotency
                .get(&ctx.tenant_id, &resolved_key)
                .map_err(domain_err)?
                .ok_or_else(|| ApiError::internal(&ctx.request_id))?;
            let mut winning: JobResponse =
                serde_json::from_value(winner.response_payload).map_err(|_| ApiError::internal(&ctx.request_id))?;
            winning.meta.is_replay = true;
            Ok((StatusCode::CREATED, Json(winning)).into_response())
        }
        Err(e) => Err(domain_err(e)),
    }
}

/// `GET /v1/jobs/{job_id}`.
///
/// # Errors
///
/// Returns [`ApiError`] with a 404 mapping if no job exists for the tenant.
pub async fn get_job(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(job_id): Path<JobId>,
) -> Result<Json<JobResponse>, ApiError> {
    let domain_err = |e: DomainError| ApiError::from_domain(e, &ctx.request_id);
    let job = state
        .jobs
        .find_by_id(&ctx.tenant_id, job_id)
        .map_err(domain_err)?
        .ok_or_else(|| domain_err(DomainError::AggregateNotFound { job_id }))?;
    Ok(Json(JobResponse::from_job(&job, ResponseMeta::default())))
}

/// `POST /v1/jobs/{job_id}/retry`.
///
/// # Errors
///
/// Returns [`ApiError`] mapped from `Job::retry`'s failure modes: 404 if
/// absent, 409 if the job is not `FAILED`, 422 past the retry-depth limit.
pub async fn retry_job(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(job_id): Path<JobId>,
) -> Result<Response, ApiError> {
    let domain_err = |e: DomainError| ApiError::from_domain(e, &ctx.request_id);
    let existing = state
        .jobs
        .find_by_id(&ctx.tenant_id, job_id)
        .map_err(domain_err)?
        .ok_or_else(|| domain_err(DomainError::AggregateNotFound { job_id }))?;

    let clock = SystemClock;
    let retried = existing.retry(state.policy.max_retry_depth, &clock).map_err(domain_err)?;
    let correlation_id = ctx.trace_id.clone();
    let saved = state.jobs.save(retried, correlation_id.as_deref()).map_err(domain_err)?;

    let body =
        RetryJobResponse { job_id: saved.id(), retry_of: saved.retry_of().unwrap_or(job_id), status: saved.status() };
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

/// `GET /v1/jobs`.
///
/// # Errors
///
/// Returns [`ApiError`] if the `channel` filter fails to parse, or if the
/// backing store is unreachable.
pub async fn list_jobs(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<ListJobsResponse>, ApiError> {
    let domain_err = |e: DomainError| ApiError::from_domain(e, &ctx.request_id);
    let channel = match &query.channel {
        Some(raw) => Some(
            Channel::parse(raw).map_err(|_| domain_err(DomainError::Validation("invalid channel filter".to_string())))?,
        ),
        None => None,
    };
    let filter = JobFilter { status: query.status, channel, job_type: query.job_type };
    let limit = query.clamped_limit();

    let total = state.jobs.count_by_tenant(&ctx.tenant_id, &filter).map_err(domain_err)?;
    let jobs = state
        .jobs
        .find_by_tenant(&ctx.tenant_id, &filter, limit, query.offset)
        .map_err(domain_err)?;
    let data = jobs.iter().map(|job| JobResponse::from_job(job, ResponseMeta::default())).collect();

    Ok(Json(ListJobsResponse { data, meta: ListMeta { total, limit, offset: query.offset } }))
}

/// `GET /v1/jobs/stream`. Server-sent events: one `event: <type>` per
/// delivered domain event belonging to the caller's tenant, plus an
/// `event: heartbeat` every 20 seconds. Closes when the client disconnects.
pub async fn stream_jobs(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let tenant = ctx.tenant_id.clone();
    let deliveries = BroadcastStream::new(state.events.subscribe()).filter_map(move |item| {
        let event = item.ok()?;
        if event.tenant_id != tenant {
            return None;
        }
        let payload = serde_json::to_string(&event).ok()?;
        Some(Ok(Event::default().event(event.event_type().to_string()).data(payload)))
    });

    let heartbeats =
        IntervalStream::new(tokio::time::interval(HEARTBEAT_INTERVAL)).map(|_| Ok(Event::default().event("heartbeat").data("")));

    Sse::new(deliveries.merge(heartbeats))
}
