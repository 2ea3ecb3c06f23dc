use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use common::storage::types::progress_log::ProgressLog;
use ingestion_pipeline::{IngestJob, IngestJobConfig, JobControlAction, JobStatus};

use crate::{api_state::ApiState, error::ApiError, tenant::TenantContext};

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub can_pause: bool,
    pub can_resume: bool,
    pub can_cancel: bool,
}

impl From<&IngestJob> for JobResponse {
    fn from(job: &IngestJob) -> Self {
        Self {
            job_id: job.job_id.clone(),
            status: job.status,
            can_pause: job.status == JobStatus::Running,
            can_resume: job.status == JobStatus::Paused,
            can_cancel: !job.status.is_terminal(),
        }
    }
}

/// `POST /ingest/jobs` — create a job and start it immediately.
pub async fn create_job(
    State(state): State<ApiState>,
    ctx: TenantContext,
    Json(mut config): Json<IngestJobConfig>,
) -> Result<Json<JobResponse>, ApiError> {
    // Credential precedence: explicit body, then headers, then stored
    // tenant settings.
    if config.domain.is_none() && !ctx.domain.is_empty() {
        config.domain = Some(ctx.domain.clone());
    }
    if config.api_key.is_none() && !ctx.api_key.is_empty() {
        config.api_key = Some(ctx.api_key.clone());
    }
    if config.domain.is_none() {
        config.domain = state
            .tenant_setting(&ctx.tenant_id, "freshdesk_domain")
            .await?;
    }
    if config.api_key.is_none() {
        config.api_key = state
            .tenant_setting(&ctx.tenant_id, "freshdesk_api_key")
            .await?;
    }

    let job = state
        .jobs
        .create_job(&ctx.tenant_id, &ctx.platform, config)?;
    let started = state.jobs.start_job(&job.job_id)?;
    Ok(Json(JobResponse::from(&started)))
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

/// `GET /ingest/jobs` — the tenant's jobs, newest first.
pub async fn list_jobs(
    State(state): State<ApiState>,
    ctx: TenantContext,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    let (jobs, total) =
        state
            .jobs
            .list_jobs(&ctx.tenant_id, params.status, params.limit, params.offset);
    Ok(Json(json!({ "jobs": jobs, "total": total })))
}

fn authorize<'a>(job: &'a IngestJob, ctx: &TenantContext) -> Result<&'a IngestJob, ApiError> {
    if job.tenant_id != ctx.tenant_id {
        return Err(ApiError::Forbidden(
            "job belongs to another tenant".to_string(),
        ));
    }
    Ok(job)
}

/// `GET /ingest/jobs/{job_id}` — full job status.
pub async fn get_job(
    State(state): State<ApiState>,
    ctx: TenantContext,
    Path(job_id): Path<String>,
) -> Result<Json<IngestJob>, ApiError> {
    let job = state
        .jobs
        .get_job(&job_id)
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id} not found")))?;
    authorize(&job, &ctx)?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub action: String,
    #[serde(default)]
    pub reason: Option<String>,
}

fn parse_action(raw: &str) -> Result<JobControlAction, ApiError> {
    match raw {
        "pause" => Ok(JobControlAction::Pause),
        "resume" => Ok(JobControlAction::Resume),
        "cancel" => Ok(JobControlAction::Cancel),
        other => Err(ApiError::ValidationError(format!(
            "invalid action: {other}"
        ))),
    }
}

/// `POST /ingest/jobs/{job_id}/control` — pause / resume / cancel.
pub async fn control_job(
    State(state): State<ApiState>,
    ctx: TenantContext,
    Path(job_id): Path<String>,
    Json(request): Json<ControlRequest>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state
        .jobs
        .get_job(&job_id)
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id} not found")))?;
    authorize(&job, &ctx)?;

    let action = parse_action(&request.action)?;
    if let Some(reason) = &request.reason {
        tracing::info!(job_id, ?action, reason, "job control requested");
    }

    let updated = match action {
        JobControlAction::Pause => state.jobs.pause_job(&job_id)?,
        JobControlAction::Resume => state.jobs.resume_job(&job_id)?,
        JobControlAction::Cancel => state.jobs.cancel_job(&job_id)?,
    };
    Ok(Json(JobResponse::from(&updated)))
}

/// `GET /ingest/progress/{job_id}` — latest persisted progress row.
pub async fn job_progress(
    State(state): State<ApiState>,
    ctx: TenantContext,
    Path(job_id): Path<String>,
) -> Result<Json<ProgressLog>, ApiError> {
    let store = state.stores.for_tenant(&ctx.tenant_id).await?;
    let latest = ProgressLog::latest(&store, &job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no progress for job {job_id}")))?;

    if latest.tenant_id != ctx.tenant_id {
        return Err(ApiError::Forbidden(
            "job belongs to another tenant".to_string(),
        ));
    }
    Ok(Json(latest))
}
