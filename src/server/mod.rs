mod access;
mod admin_routes;
pub mod config;
mod error;
mod http_layers;
mod ingestion_routes;
mod key_routes;
mod listen_routes;
pub mod metrics;
pub mod server;
pub mod state;
mod track_routes;

pub use access::RequestContext;
pub use config::{KeyCachePolicy, ServerConfig};
pub use error::{ApiError, ErrorResponse};
pub use http_layers::*;
pub use server::{make_app, run_metrics_server, run_server, serve};
