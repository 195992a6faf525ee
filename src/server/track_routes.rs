//! Track metadata, stream info and similarity routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::error::ApiError;
use super::state::{
    GuardedCatalogStore, GuardedKeyCustodian, GuardedObjectStore, GuardedSimilarityIndex,
    ServerState,
};
use super::ServerConfig;
use crate::catalog::{Track, TrackPatch, TrackStatus};
use crate::error::ErrorKind;
use crate::similarity::SimilarTrack;

const DEFAULT_SIMILAR_LIMIT: usize = 10;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub track_id: i64,
    pub stream_url: String,
    pub key_endpoint: String,
    pub duration: Option<f64>,
    pub encrypted: bool,
}

#[derive(Debug, Deserialize)]
pub struct SimilarQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarResponse {
    pub track_id: i64,
    pub similar: Vec<SimilarTrack>,
}

fn load_track(catalog: &GuardedCatalogStore, id: i64) -> Result<Track, ApiError> {
    catalog
        .get_track(id)?
        .ok_or_else(|| ApiError::not_found(format!("Track not found: {}", id)))
}

pub fn key_endpoint(api_base_url: &str, track_id: i64) -> String {
    format!("{}/v1/keys/{}", api_base_url.trim_end_matches('/'), track_id)
}

/// GET /v1/tracks/{id}
async fn get_track(
    State(catalog): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
) -> Result<Json<Track>, ApiError> {
    Ok(Json(load_track(&catalog, id)?))
}

/// PATCH /v1/tracks/{id}
async fn patch_track(
    State(catalog): State<GuardedCatalogStore>,
    Path(id): Path<i64>,
    Json(patch): Json<TrackPatch>,
) -> Result<Json<Track>, ApiError> {
    if patch.is_empty() {
        return Err(ApiError::validation("Patch has no fields"));
    }
    let track = catalog
        .apply_patch(id, patch)?
        .ok_or_else(|| ApiError::not_found(format!("Track not found: {}", id)))?;
    info!("Updated metadata of track {}", id);
    Ok(Json(track))
}

/// DELETE /v1/tracks/{id}
///
/// Features and embeddings go with the track row; key and published media
/// are removed explicitly.
async fn delete_track(
    State(catalog): State<GuardedCatalogStore>,
    State(keys): State<GuardedKeyCustodian>,
    State(objects): State<GuardedObjectStore>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let track = load_track(&catalog, id)?;
    if track.status == TrackStatus::Processing {
        return Err(ApiError::new(
            ErrorKind::Conflict,
            format!("Track {} is still processing", id),
        ));
    }

    keys.delete(id)?;
    if let Err(e) = objects.remove_prefix(&format!("hls/{}", id)).await {
        warn!("Could not remove media of track {}: {}", id, e);
    }
    catalog.delete_track(id)?;

    info!("Deleted track {}", id);
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/tracks/{id}/stream
async fn get_stream_info(
    State(catalog): State<GuardedCatalogStore>,
    State(objects): State<GuardedObjectStore>,
    State(config): State<ServerConfig>,
    Path(id): Path<i64>,
) -> Result<Json<StreamInfo>, ApiError> {
    let track = load_track(&catalog, id)?;
    let manifest = match (&track.status, &track.manifest_locator) {
        (TrackStatus::Completed, Some(manifest)) => manifest,
        _ => {
            return Err(ApiError::new(
                ErrorKind::Conflict,
                format!("Track {} is not available for streaming", id),
            ))
        }
    };

    Ok(Json(StreamInfo {
        track_id: track.id,
        stream_url: objects.public_url(manifest),
        key_endpoint: key_endpoint(&config.api_base_url, track.id),
        duration: track.duration_sec,
        encrypted: true,
    }))
}

/// GET /v1/tracks/{id}/similar?limit=
async fn get_similar(
    State(catalog): State<GuardedCatalogStore>,
    State(similarity): State<GuardedSimilarityIndex>,
    Path(id): Path<i64>,
    Query(query): Query<SimilarQuery>,
) -> Result<Json<SimilarResponse>, ApiError> {
    load_track(&catalog, id)?;
    let limit = query.limit.unwrap_or(DEFAULT_SIMILAR_LIMIT);
    let similar = similarity.find_similar(id, limit)?;
    Ok(Json(SimilarResponse {
        track_id: id,
        similar,
    }))
}

pub fn make_track_routes(state: ServerState) -> Router {
    Router::new()
        .route(
            "/{id}",
            get(get_track).patch(patch_track).delete(delete_track),
        )
        .route("/{id}/stream", get(get_stream_info))
        .route("/{id}/similar", get(get_similar))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_endpoint() {
        assert_eq!(key_endpoint("", 7), "/v1/keys/7");
        assert_eq!(
            key_endpoint("https://api.example.com/", 7),
            "https://api.example.com/v1/keys/7"
        );
    }
}
