//! Administrative routes: IP blocklist and key rotation.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use tracing::info;

use super::error::ApiError;
use super::state::{GuardedAccessGateway, GuardedKeyCustodian, ServerState};
use crate::gateway::BlockedIp;
use crate::keys::{EncryptionKey, KeyRecord};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockIpBody {
    pub ip: String,
    #[serde(default)]
    pub reason: Option<String>,
    /// Block lifetime; absent means permanent unless `permanent` says otherwise.
    #[serde(default)]
    pub duration_secs: Option<u64>,
    #[serde(default)]
    pub permanent: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct BlockedIpsResponse {
    pub blocked: Vec<BlockedIp>,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub purged: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct RotateKeyBody {
    /// Base64 of exactly 16 bytes. A random key is generated when absent.
    #[serde(default)]
    pub key: Option<String>,
}

fn parse_ip(value: &str) -> Result<IpAddr, ApiError> {
    value
        .parse()
        .map_err(|_| ApiError::validation(format!("Invalid IP address: {}", value)))
}

/// GET /v1/admin/blocked-ips
async fn list_blocked_ips(
    State(gateway): State<GuardedAccessGateway>,
) -> Result<Json<BlockedIpsResponse>, ApiError> {
    Ok(Json(BlockedIpsResponse {
        blocked: gateway.list_blocked()?,
    }))
}

/// POST /v1/admin/blocked-ips
async fn block_ip(
    State(gateway): State<GuardedAccessGateway>,
    Json(body): Json<BlockIpBody>,
) -> Result<impl IntoResponse, ApiError> {
    let ip = parse_ip(&body.ip)?;
    if body.duration_secs == Some(0) {
        return Err(ApiError::validation("durationSecs must be positive"));
    }
    let is_permanent = body.permanent.unwrap_or(body.duration_secs.is_none());
    let block = gateway.block_ip(
        ip,
        body.reason,
        body.duration_secs.map(Duration::from_secs),
        is_permanent,
    )?;
    Ok((StatusCode::CREATED, Json(block)))
}

/// DELETE /v1/admin/blocked-ips/{ip}
async fn unblock_ip(
    State(gateway): State<GuardedAccessGateway>,
    Path(ip): Path<String>,
) -> Result<StatusCode, ApiError> {
    let ip = parse_ip(&ip)?;
    if gateway.unblock_ip(ip)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("IP {} is not blocked", ip)))
    }
}

/// POST /v1/admin/blocked-ips/cleanup
async fn cleanup_blocked_ips(
    State(gateway): State<GuardedAccessGateway>,
) -> Result<Json<CleanupResponse>, ApiError> {
    let purged = gateway.purge_expired_blocks()?;
    Ok(Json(CleanupResponse { purged }))
}

/// POST /v1/admin/keys/{track_id}/rotate
async fn rotate_key(
    State(keys): State<GuardedKeyCustodian>,
    Path(track_id): Path<i64>,
    body: Option<Json<RotateKeyBody>>,
) -> Result<Json<KeyRecord>, ApiError> {
    let Json(body) = body.unwrap_or_default();
    let new_key = match body.key {
        Some(encoded) => STANDARD
            .decode(encoded.trim())
            .map_err(|_| ApiError::validation("key is not valid base64"))?,
        None => EncryptionKey::generate().as_bytes().to_vec(),
    };

    keys.rotate(track_id, &new_key)?;
    let record = keys
        .get_record(track_id)?
        .ok_or_else(|| ApiError::not_found(format!("No encryption key for track {}", track_id)))?;
    info!("Rotated key of track {} (key id {})", track_id, record.key_id);
    Ok(Json(record))
}

pub fn make_admin_routes(state: ServerState) -> Router {
    Router::new()
        .route("/blocked-ips", get(list_blocked_ips).post(block_ip))
        .route("/blocked-ips/cleanup", post(cleanup_blocked_ips))
        .route("/blocked-ips/{ip}", delete(unblock_ip))
        .route("/keys/{track_id}/rotate", post(rotate_key))
        .with_state(state)
}
