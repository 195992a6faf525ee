//! Drives processing jobs through the ingestion pipeline.
//!
//! fetch -> fingerprint -> extract -> embed -> track + features + embedding
//! -> key -> transcode -> publish -> complete.

use super::error::IngestionError;
use super::models::{JobStatus, ProcessingJob, TransitionOutcome, UploadMetadata};
use super::retry_policy::RetryPolicy;
use super::store::ProcessingJobStore;
use super::workspace::{is_supported_audio, sanitize_filename, JobWorkspace};
use crate::analysis::{build_embedding, sniff_audio, FeatureExtractor};
use crate::catalog::{CatalogStore, NewTrack, Track, TrackStatus};
use crate::config::IngestionSettings;
use crate::error::ErrorKind;
use crate::keys::KeyCustodian;
use crate::server::metrics;
use crate::storage::{ObjectStore, UploadTarget};
use crate::transcoder::{TranscodeRequest, Transcoder, MASTER_PLAYLIST};
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DEFAULT_TITLE: &str = "Unknown";
const DEFAULT_ARTIST: &str = "Unknown Artist";
const SNIFF_HEADER_LEN: usize = 512;

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Parent of the per-job workspaces.
    pub temp_dir: PathBuf,
    pub retry: RetryPolicy,
    /// Jobs whose extractor had to substitute more than this fraction of
    /// descriptors are rejected.
    pub max_substituted_fraction: f64,
    /// Prefix of key URIs written into playlists, empty for server-relative.
    pub api_base_url: String,
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &IngestionSettings, api_base_url: &str) -> Self {
        Self {
            temp_dir: settings.temp_dir.clone(),
            retry: RetryPolicy::new(settings),
            max_substituted_fraction: settings.max_substituted_fraction,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
        }
    }
}

/// Read-only view of a job, as reported to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<Track>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub fingerprint: Option<String>,
}

/// Removes the job from the in-flight set when the run ends, however it ends.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    job_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().unwrap().remove(&self.job_id);
    }
}

pub struct JobOrchestrator {
    jobs: Arc<dyn ProcessingJobStore>,
    catalog: Arc<dyn CatalogStore>,
    keys: Arc<dyn KeyCustodian>,
    objects: Arc<dyn ObjectStore>,
    extractor: Arc<dyn FeatureExtractor>,
    transcoder: Arc<dyn Transcoder>,
    config: OrchestratorConfig,
    in_flight: Mutex<HashSet<String>>,
}

impl JobOrchestrator {
    pub fn new(
        jobs: Arc<dyn ProcessingJobStore>,
        catalog: Arc<dyn CatalogStore>,
        keys: Arc<dyn KeyCustodian>,
        objects: Arc<dyn ObjectStore>,
        extractor: Arc<dyn FeatureExtractor>,
        transcoder: Arc<dyn Transcoder>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            jobs,
            catalog,
            keys,
            objects,
            extractor,
            transcoder,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    // ==================== Job lifecycle ====================

    /// Creates a job in `pending_upload`.
    pub fn create(
        &self,
        metadata: UploadMetadata,
        locator: Option<String>,
    ) -> Result<ProcessingJob, IngestionError> {
        if locator.as_deref().is_some_and(|l| l.trim().is_empty()) {
            return Err(IngestionError::Validation(
                "source locator must not be empty".to_string(),
            ));
        }
        let job = ProcessingJob::new(uuid::Uuid::new_v4().to_string(), locator, metadata, now_millis());
        self.jobs.create_job(&job)?;
        debug!("Created job {}", job.id);
        Ok(job)
    }

    /// Creates a job and reserves an upload target for `filename`.
    pub fn request_upload(
        &self,
        filename: &str,
        metadata: UploadMetadata,
    ) -> Result<(ProcessingJob, UploadTarget), IngestionError> {
        let safe_name = sanitize_filename(filename)
            .ok_or_else(|| IngestionError::Validation(format!("Invalid filename: {}", filename)))?;
        if !is_supported_audio(&safe_name) {
            return Err(IngestionError::Validation(format!(
                "Unsupported file type: {}",
                safe_name
            )));
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        let target = self.objects.upload_target(&job_id, &safe_name)?;
        let metadata = UploadMetadata {
            original_filename: Some(safe_name),
            ..metadata
        };
        let job = ProcessingJob::new(job_id, Some(target.locator.clone()), metadata, now_millis());
        self.jobs.create_job(&job)?;

        info!("Reserved upload {} for job {}", target.locator, job.id);
        Ok((job, target))
    }

    /// Stores the bytes of an upload at the job's reserved locator.
    pub async fn receive_upload(&self, job_id: &str, data: &[u8]) -> Result<u64, IngestionError> {
        let job = self.load(job_id)?;
        if !matches!(job.status, JobStatus::PendingUpload | JobStatus::Uploaded) {
            return Err(IngestionError::InvalidState {
                job_id: job.id,
                status: job.status,
                action: "accept upload data",
            });
        }
        let locator = job.source_locator.ok_or_else(|| {
            IngestionError::Validation(format!("Job {} has no upload target", job_id))
        })?;
        if data.is_empty() {
            return Err(IngestionError::Validation("upload is empty".to_string()));
        }
        Ok(self.objects.put(&locator, data).await?)
    }

    /// Records where the uploaded source lives and moves the job to
    /// `uploaded`.
    pub async fn mark_uploaded(
        &self,
        job_id: &str,
        source_locator: &str,
    ) -> Result<ProcessingJob, IngestionError> {
        if source_locator.trim().is_empty() {
            return Err(IngestionError::Validation(
                "source locator must not be empty".to_string(),
            ));
        }
        if self.jobs.get_job(job_id)?.is_none() {
            return Err(IngestionError::JobNotFound(job_id.to_string()));
        }
        if !self.objects.exists(source_locator).await? {
            return Err(IngestionError::Validation(format!(
                "Nothing uploaded at {}",
                source_locator
            )));
        }

        match self.jobs.mark_uploaded(job_id, source_locator, now_millis())? {
            TransitionOutcome::Applied => self.load(job_id),
            TransitionOutcome::Rejected { current } => Err(IngestionError::InvalidState {
                job_id: job_id.to_string(),
                status: current,
                action: "mark uploaded",
            }),
            TransitionOutcome::Missing => Err(IngestionError::JobNotFound(job_id.to_string())),
        }
    }

    /// Upload completion as reported by a client. Without an explicit
    /// locator the one reserved by [`Self::request_upload`] is used.
    pub async fn complete_upload(
        &self,
        job_id: &str,
        locator: Option<&str>,
    ) -> Result<ProcessingJob, IngestionError> {
        let locator = match locator {
            Some(locator) => locator.to_string(),
            None => self.load(job_id)?.source_locator.unwrap_or_default(),
        };
        self.mark_uploaded(job_id, &locator).await
    }

    /// Runs the whole pipeline for an `uploaded` job.
    ///
    /// Pipeline failures are not errors of `run`: they are recorded on the
    /// job, which is returned in `failed` state. Errors are returned only
    /// when the job can't be started.
    pub async fn run(
        &self,
        job_id: &str,
        cancel: CancellationToken,
    ) -> Result<JobSnapshot, IngestionError> {
        let _guard = self.claim(job_id)?;

        match self
            .jobs
            .transition(job_id, JobStatus::Processing, None, now_millis())?
        {
            TransitionOutcome::Applied => {}
            TransitionOutcome::Rejected {
                current: JobStatus::Processing,
            } => return Err(IngestionError::AlreadyRunning(job_id.to_string())),
            TransitionOutcome::Rejected { current } => {
                return Err(IngestionError::InvalidState {
                    job_id: job_id.to_string(),
                    status: current,
                    action: "run",
                })
            }
            TransitionOutcome::Missing => {
                return Err(IngestionError::JobNotFound(job_id.to_string()))
            }
        }

        let job = self.load(job_id)?;
        info!("Processing job {}", job_id);

        match self.execute(&job, &cancel).await {
            Ok(track) => {
                match self
                    .jobs
                    .transition(job_id, JobStatus::Completed, None, now_millis())?
                {
                    TransitionOutcome::Applied => {}
                    other => warn!("Job {} finished but could not complete: {:?}", job_id, other),
                }
                metrics::record_job_outcome(JobStatus::Completed.as_str());
                self.refresh_catalog_metrics();
                info!("Job {} completed as track {}", job_id, track.id);
            }
            Err(e) => {
                error!("Job {} failed: {}", job_id, e);
                self.fail_job(job_id, &public_message(&e))?;
                metrics::record_job_outcome(JobStatus::Failed.as_str());
            }
        }

        self.status(job_id)
    }

    pub fn status(&self, job_id: &str) -> Result<JobSnapshot, IngestionError> {
        let job = self.load(job_id)?;
        self.snapshot(job)
    }

    pub fn list(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<JobSnapshot>, IngestionError> {
        self.jobs
            .list_jobs(status, limit)?
            .into_iter()
            .map(|job| self.snapshot(job))
            .collect()
    }

    /// Ids of `uploaded` jobs waiting for a run, oldest first. Jobs whose run
    /// is already claimed are left out.
    pub fn awaiting_run(&self, limit: usize) -> Result<Vec<String>, IngestionError> {
        let jobs = self.jobs.list_jobs(Some(JobStatus::Uploaded), limit)?;
        let in_flight = self.in_flight.lock().unwrap();
        Ok(jobs
            .into_iter()
            .rev()
            .map(|job| job.id)
            .filter(|id| !in_flight.contains(id))
            .collect())
    }

    /// Fails jobs left in `processing` for longer than `threshold` by a run
    /// that no longer exists (crash, restart). Returns how many were failed.
    pub fn fail_stale_jobs(&self, threshold: Duration) -> Result<usize, IngestionError> {
        let cutoff = now_millis() - threshold.as_millis() as i64;
        let mut failed = 0;
        for job in self.jobs.list_stale_processing(cutoff)? {
            if self.in_flight.lock().unwrap().contains(&job.id) {
                continue;
            }
            warn!("Failing stale job {} (started at {:?})", job.id, job.started_at);
            self.fail_job(&job.id, "Processing was interrupted")?;
            failed += 1;
        }
        Ok(failed)
    }

    // ==================== Internals ====================

    fn claim(&self, job_id: &str) -> Result<InFlightGuard<'_>, IngestionError> {
        let mut in_flight = self.in_flight.lock().unwrap();
        if !in_flight.insert(job_id.to_string()) {
            return Err(IngestionError::AlreadyRunning(job_id.to_string()));
        }
        Ok(InFlightGuard {
            in_flight: &self.in_flight,
            job_id: job_id.to_string(),
        })
    }

    fn load(&self, job_id: &str) -> Result<ProcessingJob, IngestionError> {
        self.jobs
            .get_job(job_id)?
            .ok_or_else(|| IngestionError::JobNotFound(job_id.to_string()))
    }

    fn snapshot(&self, job: ProcessingJob) -> Result<JobSnapshot, IngestionError> {
        let track = match (job.status, job.track_id) {
            (JobStatus::Completed, Some(track_id)) => self.catalog.get_track(track_id)?,
            _ => None,
        };
        Ok(JobSnapshot {
            job_id: job.id,
            status: job.status,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            track,
            error: job.error_message,
            fingerprint: job.source_sha256,
        })
    }

    /// Moves the job to `failed` and marks its partial track, if any, failed
    /// as well. The track is kept for the audit trail.
    fn fail_job(&self, job_id: &str, message: &str) -> Result<(), IngestionError> {
        if let TransitionOutcome::Rejected { current } =
            self.jobs
                .transition(job_id, JobStatus::Failed, Some(message), now_millis())?
        {
            warn!("Job {} could not be failed from {}", job_id, current);
        }

        let track_id = self.jobs.get_job(job_id)?.and_then(|job| job.track_id);
        if let Some(track_id) = track_id {
            if let Some(track) = self.catalog.get_track(track_id)? {
                if track.status == TrackStatus::Processing {
                    self.catalog.set_track_status(track_id, TrackStatus::Failed)?;
                }
            }
        }
        Ok(())
    }

    async fn execute(
        &self,
        job: &ProcessingJob,
        cancel: &CancellationToken,
    ) -> Result<Track, IngestionError> {
        let retry = &self.config.retry;
        let locator = job
            .source_locator
            .clone()
            .ok_or_else(|| IngestionError::Validation("job has no source locator".to_string()))?;

        let workspace = JobWorkspace::create(&self.config.temp_dir, &job.id)?;
        let source = workspace.source_path(job.metadata.original_filename.as_deref());

        retry
            .run("fetch", cancel, || self.objects.fetch(&locator, &source))
            .await?;

        let (sha256, header) = fingerprint_source(&source).await?;
        self.jobs.record_fingerprint(&job.id, &sha256)?;
        sniff_audio(&header)?;

        let extracted = retry
            .run("extract", cancel, || self.extractor.extract(&source))
            .await?;
        let substituted = extracted.substituted_fraction();
        if substituted > self.config.max_substituted_fraction {
            return Err(IngestionError::Validation(format!(
                "Extractor could not compute {} of {} descriptors",
                extracted.substituted.len(),
                crate::analysis::FEATURE_COUNT
            )));
        }
        if !extracted.substituted.is_empty() {
            debug!(
                "Job {}: substituted 0.0 for {:?}",
                job.id, extracted.substituted
            );
        }
        let embedding = build_embedding(&extracted.features);

        let metadata = &job.metadata;
        let track = self.catalog.create_track(&NewTrack {
            title: metadata
                .title
                .clone()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            artist: metadata
                .artist
                .clone()
                .filter(|a| !a.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ARTIST.to_string()),
            album: metadata.album.clone(),
            genre: metadata.genre.clone(),
        })?;
        if !self.jobs.link_track(&job.id, track.id)? {
            return Err(IngestionError::Store(anyhow::anyhow!(
                "Job {} already has a linked track",
                job.id
            )));
        }
        self.catalog.save_features(track.id, &extracted.features)?;
        self.catalog.save_embedding(track.id, &embedding)?;

        let key_id = self.keys.issue(track.id)?;
        let key = self.keys.get_raw(track.id)?;
        let key_uri = format!("{}/v1/keys/{}", self.config.api_base_url, track.id);
        debug!("Track {} keyed with {}", track.id, key_id);

        let output = retry
            .run("transcode", cancel, || {
                self.transcoder.transcode(TranscodeRequest {
                    source: &source,
                    work_dir: workspace.path(),
                    track_id: track.id,
                    key: &key,
                    key_uri: &key_uri,
                })
            })
            .await?;

        let prefix = format!("hls/{}", track.id);
        retry
            .run("publish", cancel, || {
                self.objects.publish_dir(&output.root_dir, &prefix)
            })
            .await?;

        let manifest_locator = format!("{}/{}", prefix, MASTER_PLAYLIST);
        let track = self
            .catalog
            .complete_track(track.id, &manifest_locator, output.duration_sec)?;

        workspace.close();
        Ok(track)
    }

    fn refresh_catalog_metrics(&self) {
        for status in [TrackStatus::Completed, TrackStatus::Processing, TrackStatus::Failed] {
            if let Ok(count) = self.catalog.count_tracks(status) {
                metrics::set_catalog_tracks(status.as_str(), count);
            }
        }
    }
}

/// Error text stored on the job. Internal failures are not spelled out.
fn public_message(error: &IngestionError) -> String {
    match error {
        IngestionError::Cancelled => error.to_string(),
        _ if error.kind() == ErrorKind::Internal => "Internal error during processing".to_string(),
        _ => error.to_string(),
    }
}

/// Hex SHA-256 of the file plus its leading bytes for format sniffing.
async fn fingerprint_source(path: &Path) -> std::io::Result<(String, Vec<u8>)> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut header = Vec::with_capacity(SNIFF_HEADER_LEN);
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        if header.len() < SNIFF_HEADER_LEN {
            let take = (SNIFF_HEADER_LEN - header.len()).min(n);
            header.extend_from_slice(&buf[..take]);
        }
        hasher.update(&buf[..n]);
    }

    Ok((format!("{:x}", hasher.finalize()), header))
}
