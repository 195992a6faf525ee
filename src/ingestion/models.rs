//! Processing job model and its state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle of an ingestion job.
///
/// `pending_upload -> uploaded -> processing -> completed`, with
/// `uploaded -> failed` and `processing -> failed` as the only failure
/// edges. `completed` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    PendingUpload,
    Uploaded,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::PendingUpload,
        JobStatus::Uploaded,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::PendingUpload => "pending_upload",
            JobStatus::Uploaded => "uploaded",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_upload" => Some(JobStatus::PendingUpload),
            "uploaded" => Some(JobStatus::Uploaded),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::PendingUpload, JobStatus::Uploaded)
                | (JobStatus::Uploaded, JobStatus::Processing)
                | (JobStatus::Uploaded, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    /// States from which `next` is reachable in one step.
    pub fn predecessors(next: JobStatus) -> Vec<JobStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata supplied with the upload request, used for the created track.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub original_filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingJob {
    pub id: String,
    pub status: JobStatus,
    /// Object-store locator of the uploaded source.
    pub source_locator: Option<String>,
    pub metadata: UploadMetadata,
    /// Set at most once, when the pipeline creates the track.
    pub track_id: Option<i64>,
    /// Hex SHA-256 of the source bytes.
    pub source_sha256: Option<String>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub updated_at: i64,
}

impl ProcessingJob {
    pub fn new(id: String, source_locator: Option<String>, metadata: UploadMetadata, now: i64) -> Self {
        Self {
            id,
            status: JobStatus::PendingUpload,
            source_locator,
            metadata,
            track_id: None,
            source_sha256: None,
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }
}

/// Result of a conditional status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// The job exists but is in a state the transition doesn't start from.
    Rejected { current: JobStatus },
    Missing,
}
