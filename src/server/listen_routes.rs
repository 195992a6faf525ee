//! Listening session lifecycle and quota status.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::access::RequestContext;
use super::error::ApiError;
use super::state::{GuardedCatalogStore, GuardedQuotaGovernor, ServerState};
use crate::catalog::TrackStatus;
use crate::quota::QuotaStatus;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartBody {
    pub track_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatBody {
    pub session_id: String,
    pub current_time: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteBody {
    pub session_id: String,
    pub total_duration: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub session_id: String,
    pub quota: QuotaStatus,
}

#[derive(Debug, Serialize)]
pub struct QuotaResponse {
    pub quota: QuotaStatus,
}

/// POST /v1/listen/start
async fn start(
    State(catalog): State<GuardedCatalogStore>,
    State(governor): State<GuardedQuotaGovernor>,
    context: RequestContext,
    Json(body): Json<StartBody>,
) -> Result<Json<StartResponse>, ApiError> {
    match catalog.get_track(body.track_id)? {
        Some(track) if track.status == TrackStatus::Completed => {}
        _ => {
            return Err(ApiError::not_found(format!(
                "Track not found: {}",
                body.track_id
            )))
        }
    }

    let (session, quota) = governor.start_session(&context.caller(), body.track_id)?;
    Ok(Json(StartResponse {
        session_id: session.id,
        quota,
    }))
}

/// POST /v1/listen/heartbeat
async fn heartbeat(
    State(governor): State<GuardedQuotaGovernor>,
    context: RequestContext,
    Json(body): Json<HeartbeatBody>,
) -> Result<Json<QuotaResponse>, ApiError> {
    let quota = governor.heartbeat(&context.caller(), &body.session_id, body.current_time)?;
    Ok(Json(QuotaResponse { quota }))
}

/// POST /v1/listen/complete
async fn complete(
    State(governor): State<GuardedQuotaGovernor>,
    context: RequestContext,
    Json(body): Json<CompleteBody>,
) -> Result<Json<QuotaResponse>, ApiError> {
    let quota = governor.complete(&context.caller(), &body.session_id, body.total_duration)?;
    Ok(Json(QuotaResponse { quota }))
}

/// GET /v1/listen/quota
async fn quota(
    State(governor): State<GuardedQuotaGovernor>,
    context: RequestContext,
) -> Result<Json<QuotaResponse>, ApiError> {
    let quota = governor.check(&context.caller())?;
    Ok(Json(QuotaResponse { quota }))
}

pub fn make_listen_routes(state: ServerState) -> Router {
    Router::new()
        .route("/start", post(start))
        .route("/heartbeat", post(heartbeat))
        .route("/complete", post(complete))
        .route("/quota", get(quota))
        .with_state(state)
}
