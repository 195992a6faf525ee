//! Request logging middleware

use super::super::state::ServerState;
use crate::server::metrics::record_http_request;
use axum::extract::State;
use axum::{
    body::Body,
    http::{header, HeaderMap, Request, Response, StatusCode},
    middleware::Next,
};
use std::time::Instant;
use tracing::{error, info};

/// How much of each request is logged; every level includes the ones
/// before it.
#[derive(PartialEq, PartialOrd, Clone, Debug, Default, clap::ValueEnum)]
pub enum RequestsLoggingLevel {
    None,
    #[default]
    Path,
    Headers,
    Body,
}

impl std::fmt::Display for RequestsLoggingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

const MAX_LOGGABLE_BODY_LENGTH: usize = 1024;

fn content_length(headers: &HeaderMap) -> Result<usize, &'static str> {
    headers
        .get(header::CONTENT_LENGTH)
        .ok_or("Content-length not set.")?
        .to_str()
        .map_err(|_| "Could not get Content-length string value.")?
        .parse::<usize>()
        .map_err(|_| "Could not parse Content-length numeric value.")
}

/// Logs a small body and hands back an equivalent one. Bodies without a
/// length or above [`MAX_LOGGABLE_BODY_LENGTH`] pass through untouched.
async fn log_body(label: &str, headers: &HeaderMap, body: Body) -> Result<Body, axum::Error> {
    match content_length(headers) {
        Err(reason) => {
            info!("  {} Body: {}", label, reason);
            Ok(body)
        }
        Ok(size) if size >= MAX_LOGGABLE_BODY_LENGTH => {
            info!(
                "  {} Body: Too big to log ({:#})",
                label,
                byte_unit::Byte::from(size)
            );
            Ok(body)
        }
        Ok(size) => {
            let bytes = axum::body::to_bytes(body, size).await?;
            info!("  {} Body:\n{}", label, String::from_utf8_lossy(&bytes));
            Ok(Body::from(bytes))
        }
    }
}

fn log_headers(label: &str, headers: &HeaderMap) {
    info!("  {} Headers:", label);
    for (name, value) in headers {
        info!("    {:?}: {:?}", name, value);
    }
}

/// Key delivery bodies are raw key material.
fn is_sensitive_path(path: &str) -> bool {
    path.starts_with("/v1/keys/")
}

/// Collapses ids and addresses into `{id}` to keep metric labels bounded.
fn metric_path(path: &str) -> String {
    if path.starts_with("/media/") {
        return "/media/{path}".to_string();
    }
    path.split('/')
        .map(|segment| {
            let is_id = !segment.is_empty()
                && (segment.chars().all(|c| c.is_ascii_digit())
                    || segment.len() >= 32
                    || segment.parse::<std::net::IpAddr>().is_ok());
            if is_id {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub async fn log_requests(
    State(state): State<ServerState>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let level = state.config.requests_logging_level.clone();
    let start = Instant::now();

    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    if level > RequestsLoggingLevel::None {
        info!(">>> {} {}", method, request.uri());
    }
    if level >= RequestsLoggingLevel::Headers {
        log_headers("Req", request.headers());
    }

    let request = if level >= RequestsLoggingLevel::Body {
        let (parts, body) = request.into_parts();
        match log_body("Req", &parts.headers, body).await {
            Ok(body) => Request::from_parts(parts, body),
            Err(err) => {
                error!("Failed to read request body: {:?}", err);
                return internal_error();
            }
        }
    } else {
        request
    };

    let mut response = next.run(request).await;

    if level >= RequestsLoggingLevel::Headers {
        log_headers("Resp", response.headers());
    }
    if level >= RequestsLoggingLevel::Body {
        if is_sensitive_path(&path) {
            info!("  Resp Body: <key material>");
        } else {
            let (parts, body) = response.into_parts();
            response = match log_body("Resp", &parts.headers, body).await {
                Ok(body) => Response::from_parts(parts, body),
                Err(err) => {
                    error!("Failed to read response body: {:?}", err);
                    return internal_error();
                }
            };
        }
    }

    let status = response.status().as_u16();
    let duration = start.elapsed();

    if level > RequestsLoggingLevel::None {
        info!("<<< {} {} {} ({}ms)", method, path, status, duration.as_millis());
    }

    record_http_request(&method, &metric_path(&path), status, duration);

    response
}

fn internal_error() -> Response<Body> {
    let mut response = Response::new(Body::from("Internal Server Error"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}
