use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;

use axum::{extract::State, middleware, routing::get, Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::info;

use super::access::authorize_requests;
use super::admin_routes::make_admin_routes;
use super::ingestion_routes::{make_job_routes, make_upload_routes};
use super::key_routes::make_key_routes;
use super::listen_routes::make_listen_routes;
use super::log_requests;
use super::metrics::metrics_handler;
use super::state::ServerState;
use super::track_routes::make_track_routes;

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub hash: String,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> Json<ServerStats> {
    Json(ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
    })
}

pub fn make_app(state: ServerState) -> Router {
    let media_service = ServeDir::new(&state.config.media_path);

    Router::new()
        .route("/", get(home))
        .with_state(state.clone())
        .nest("/v1/upload", make_upload_routes(state.clone()))
        .nest("/v1/jobs", make_job_routes(state.clone()))
        .nest("/v1/tracks", make_track_routes(state.clone()))
        .nest("/v1/keys", make_key_routes(state.clone()))
        .nest("/v1/listen", make_listen_routes(state.clone()))
        .nest("/v1/admin", make_admin_routes(state.clone()))
        .nest_service("/media", media_service)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            authorize_requests,
        ))
        .layer(middleware::from_fn_with_state(state, log_requests))
}

/// Serves the app on an already bound listener until `shutdown` fires.
pub async fn serve(listener: TcpListener, state: ServerState, shutdown: CancellationToken) -> Result<()> {
    let app = make_app(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await?;
    Ok(())
}

pub async fn run_server(state: ServerState, shutdown: CancellationToken) -> Result<()> {
    let port = state.config.port;
    let listener = TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    info!("Serving on port {}", port);
    serve(listener, state, shutdown).await
}

/// Prometheus endpoint, kept off the public port.
pub async fn run_metrics_server(port: u16, shutdown: CancellationToken) -> Result<()> {
    let app = Router::new().route("/metrics", get(metrics_handler));
    let listener = TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", port))?;
    info!("Serving metrics on port {}", port);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
