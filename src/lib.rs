//! Mist Server Library
//!
//! Audio ingestion into encrypted HLS, key custody, content similarity and
//! listening quotas. Modules are exposed for the binary and for the
//! end-to-end tests.

pub mod analysis;
pub mod background_jobs;
pub mod catalog;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ingestion;
pub mod keys;
pub mod quota;
pub mod server;
pub mod similarity;
pub mod sqlite_persistence;
pub mod storage;
pub mod transcoder;

// Re-export commonly used types for convenience
pub use error::ErrorKind;
pub use server::{run_server, RequestsLoggingLevel};
