//! Ingestion HTTP routes.
//!
//! Provides endpoints for:
//! - Reserving an upload slot and receiving its bytes
//! - Completing an upload, which enqueues the processing run
//! - Polling and listing jobs

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::error::ApiError;
use super::state::{GuardedOrchestrator, ServerState};
use crate::ingestion::{JobQueue, JobSnapshot, JobStatus, UploadMetadata};

/// Largest accepted upload body.
const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequestBody {
    pub filename: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequestResponse {
    pub job_id: String,
    pub upload_url: String,
    pub locator: String,
    pub expires_in: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDataResponse {
    pub job_id: String,
    pub bytes: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadBody {
    #[serde(default)]
    pub locator: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadResponse {
    pub job_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobSnapshot>,
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /v1/upload - Reserve an upload target for a new job
async fn request_upload(
    State(orchestrator): State<GuardedOrchestrator>,
    Json(body): Json<UploadRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    let metadata = UploadMetadata {
        title: body.title,
        artist: body.artist,
        album: body.album,
        genre: body.genre,
        original_filename: None,
    };
    let (job, target) = orchestrator.request_upload(&body.filename, metadata)?;

    Ok((
        StatusCode::CREATED,
        Json(UploadRequestResponse {
            job_id: job.id,
            upload_url: target.url,
            locator: target.locator,
            expires_in: target.expires_in,
        }),
    ))
}

/// PUT /v1/upload/{job_id}/data - Raw bytes for the reserved target
async fn upload_data(
    State(orchestrator): State<GuardedOrchestrator>,
    Path(job_id): Path<String>,
    body: Bytes,
) -> Result<Json<UploadDataResponse>, ApiError> {
    let bytes = orchestrator.receive_upload(&job_id, &body).await?;
    info!("Received {} bytes for job {}", bytes, job_id);
    Ok(Json(UploadDataResponse { job_id, bytes }))
}

/// POST /v1/upload/{job_id}/complete - Mark uploaded and enqueue processing
async fn complete_upload(
    State(orchestrator): State<GuardedOrchestrator>,
    State(queue): State<JobQueue>,
    Path(job_id): Path<String>,
    body: Option<Json<CompleteUploadBody>>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body.unwrap_or_default();
    let job = orchestrator
        .complete_upload(&job_id, body.locator.as_deref())
        .await?;

    // On a full queue the job stays `uploaded`: completing it again is
    // allowed, and the requeue job submits it once there is room.
    if let Err(e) = queue.enqueue(&job.id) {
        warn!("Could not enqueue job {}: {}", job.id, e);
        return Err(e.into());
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(CompleteUploadResponse {
            job_id: job.id,
            status: job.status,
        }),
    ))
}

/// GET /v1/jobs/{job_id}
async fn get_job(
    State(orchestrator): State<GuardedOrchestrator>,
    Path(job_id): Path<String>,
) -> Result<Json<JobSnapshot>, ApiError> {
    Ok(Json(orchestrator.status(&job_id)?))
}

/// GET /v1/jobs?status=&limit=
async fn list_jobs(
    State(orchestrator): State<GuardedOrchestrator>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<ListJobsResponse>, ApiError> {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(value) => Some(
            JobStatus::parse(value)
                .ok_or_else(|| ApiError::validation(format!("Unknown job status: {}", value)))?,
        ),
    };
    let jobs = orchestrator.list(status, query.limit.clamp(1, 500))?;
    Ok(Json(ListJobsResponse { jobs }))
}

// =============================================================================
// Router
// =============================================================================

pub fn make_upload_routes(state: ServerState) -> Router {
    Router::new()
        .route("/", post(request_upload))
        .route(
            "/{job_id}/data",
            put(upload_data).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/{job_id}/complete", post(complete_upload))
        .with_state(state)
}

pub fn make_job_routes(state: ServerState) -> Router {
    Router::new()
        .route("/", get(list_jobs))
        .route("/{job_id}", get(get_job))
        .with_state(state)
}
