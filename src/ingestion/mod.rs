//! Ingestion of uploaded audio into protected HLS tracks.
//!
//! 1. A job is created and the client uploads the source
//! 2. The job is marked uploaded and queued
//! 3. A worker fingerprints, analyzes and embeds the audio
//! 4. The track gets a key, is transcoded to encrypted HLS and published

mod error;
mod models;
mod orchestrator;
mod retry_policy;
mod schema;
mod store;
mod worker;
mod workspace;

pub use error::IngestionError;
pub use models::{JobStatus, ProcessingJob, TransitionOutcome, UploadMetadata};
pub use orchestrator::{JobOrchestrator, JobSnapshot, OrchestratorConfig};
pub use retry_policy::RetryPolicy;
pub use schema::{JOBS_SCHEMA_SQL, JOBS_SCHEMA_VERSION};
pub use store::{ProcessingJobStore, SqliteProcessingJobStore};
pub use worker::{JobQueue, QueueError, WorkerPool};
pub use workspace::{is_supported_audio, sanitize_filename, JobWorkspace};
