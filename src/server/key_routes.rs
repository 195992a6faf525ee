//! Key delivery endpoint consumed by HLS players.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, Response, StatusCode},
    routing::get,
    Router,
};
use tracing::debug;

use super::config::KeyCachePolicy;
use super::error::ApiError;
use super::state::{GuardedCatalogStore, GuardedKeyCustodian, ServerState};
use super::ServerConfig;
use crate::catalog::TrackStatus;
use crate::error::ErrorKind;
use crate::keys::{KeyError, KEY_LENGTH};
use crate::server::metrics;

fn cache_control(config: &ServerConfig) -> String {
    match config.key_cache_policy {
        KeyCachePolicy::Public => format!("public, max-age={}", config.key_max_age_secs),
        KeyCachePolicy::NoStore => "no-store".to_string(),
    }
}

fn etag_matches(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .any(|candidate| candidate == etag || candidate == "*")
        })
        .unwrap_or(false)
}

fn header_value(value: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(value).map_err(|e| ApiError::internal(e.to_string()))
}

/// Keys are only handed out for tracks that can be streamed.
fn ensure_streamable(catalog: &GuardedCatalogStore, track_id: i64) -> Result<(), ApiError> {
    match catalog.get_track(track_id)? {
        Some(track) if track.status == TrackStatus::Completed => Ok(()),
        Some(_) => {
            metrics::record_key_delivery("unavailable");
            Err(ApiError::new(
                ErrorKind::Conflict,
                format!("Track {} is not available for streaming", track_id),
            ))
        }
        None => {
            metrics::record_key_delivery("not_found");
            Err(KeyError::NotFound(track_id).into())
        }
    }
}

/// GET /v1/keys/{track_id}
async fn deliver_key(
    State(catalog): State<GuardedCatalogStore>,
    State(keys): State<GuardedKeyCustodian>,
    State(config): State<ServerConfig>,
    Path(track_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Response<Body>, ApiError> {
    ensure_streamable(&catalog, track_id)?;
    let record = match keys.get_record(track_id)? {
        Some(record) => record,
        None => {
            metrics::record_key_delivery("not_found");
            return Err(KeyError::NotFound(track_id).into());
        }
    };
    let etag = format!("\"{}\"", record.key_id);
    let cache_control = header_value(&cache_control(&config))?;

    if etag_matches(&headers, &etag) {
        metrics::record_key_delivery("not_modified");
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NOT_MODIFIED;
        response.headers_mut().insert(header::ETAG, header_value(&etag)?);
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, cache_control);
        return Ok(response);
    }

    let key = keys.get_raw(track_id)?;
    debug!("Delivering key for track {}", track_id);
    metrics::record_key_delivery("served");

    let mut response = Response::new(Body::from(key.as_bytes().to_vec()));
    let response_headers = response.headers_mut();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(KEY_LENGTH));
    response_headers.insert(header::ETAG, header_value(&etag)?);
    response_headers.insert(header::CACHE_CONTROL, cache_control);
    Ok(response)
}

pub fn make_key_routes(state: ServerState) -> Router {
    Router::new()
        .route("/{track_id}", get(deliver_key))
        .with_state(state)
}
