use super::models::JobStatus;
use crate::analysis::ExtractionError;
use crate::error::ErrorKind;
use crate::keys::KeyError;
use crate::storage::StorageError;
use crate::transcoder::TranscodeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job {job_id} is {status}, cannot {action}")]
    InvalidState {
        job_id: String,
        status: JobStatus,
        action: &'static str,
    },

    #[error("Job {0} is already running")]
    AlreadyRunning(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Feature extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("{0}")]
    Transcode(#[from] TranscodeError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Key(#[from] KeyError),

    #[error("Job cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl IngestionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestionError::JobNotFound(_) => ErrorKind::NotFound,
            IngestionError::InvalidState { .. } | IngestionError::AlreadyRunning(_) => {
                ErrorKind::Conflict
            }
            IngestionError::Validation(_) => ErrorKind::Validation,
            IngestionError::Extraction(e) => e.kind(),
            IngestionError::Transcode(e) => e.kind(),
            IngestionError::Storage(e) => e.kind(),
            IngestionError::Key(e) => e.kind(),
            IngestionError::Cancelled => ErrorKind::Internal,
            IngestionError::Io(_) => ErrorKind::Storage,
            IngestionError::Store(_) => ErrorKind::Internal,
        }
    }
}
