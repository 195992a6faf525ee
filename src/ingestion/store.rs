//! SQLite store for processing jobs.
//!
//! Status changes are conditional updates (`WHERE status IN (...)`), so two
//! callers racing on the same job can never both apply a transition.

use super::models::{JobStatus, ProcessingJob, TransitionOutcome, UploadMetadata};
use super::schema::{JOBS_SCHEMA_SQL, JOBS_SCHEMA_VERSION};
use crate::sqlite_persistence::{
    open_in_memory_store_connection, open_store_connection, StoreSchema,
};
use anyhow::{Context, Result};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub trait ProcessingJobStore: Send + Sync {
    fn create_job(&self, job: &ProcessingJob) -> Result<()>;

    fn get_job(&self, id: &str) -> Result<Option<ProcessingJob>>;

    /// Records the source locator and moves `pending_upload` to `uploaded`.
    /// Repeating it on an `uploaded` job only refreshes the locator.
    fn mark_uploaded(&self, id: &str, locator: &str, now: i64) -> Result<TransitionOutcome>;

    /// Moves the job to `to` if the state machine allows it from the current
    /// status. Sets `started_at` when entering `processing` and
    /// `completed_at` when entering a terminal state.
    fn transition(
        &self,
        id: &str,
        to: JobStatus,
        error_message: Option<&str>,
        now: i64,
    ) -> Result<TransitionOutcome>;

    /// Links the created track. Returns false if a track was already linked.
    fn link_track(&self, id: &str, track_id: i64) -> Result<bool>;

    fn record_fingerprint(&self, id: &str, sha256: &str) -> Result<()>;

    /// Newest first.
    fn list_jobs(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<ProcessingJob>>;

    /// Jobs in `processing` that started before `started_before`.
    fn list_stale_processing(&self, started_before: i64) -> Result<Vec<ProcessingJob>>;
}

fn jobs_schema() -> StoreSchema {
    StoreSchema {
        name: "jobs",
        version: JOBS_SCHEMA_VERSION,
        batches: vec![JOBS_SCHEMA_SQL.to_string()],
    }
}

pub struct SqliteProcessingJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteProcessingJobStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = open_store_connection(path, &jobs_schema())?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = open_in_memory_store_connection(&jobs_schema())?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<ProcessingJob> {
        let status: String = row.get("status")?;
        let metadata: String = row.get("metadata")?;
        Ok(ProcessingJob {
            id: row.get("id")?,
            status: JobStatus::parse(&status).unwrap_or(JobStatus::Failed),
            source_locator: row.get("source_locator")?,
            metadata: serde_json::from_str(&metadata).unwrap_or_default(),
            track_id: row.get("track_id")?,
            source_sha256: row.get("source_sha256")?,
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn current_status(conn: &Connection, id: &str) -> Result<Option<JobStatus>> {
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM processing_jobs WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status.and_then(|s| JobStatus::parse(&s)))
    }

    fn outcome_for_noop(conn: &Connection, id: &str) -> Result<TransitionOutcome> {
        Ok(match Self::current_status(conn, id)? {
            Some(current) => TransitionOutcome::Rejected { current },
            None => TransitionOutcome::Missing,
        })
    }
}

fn metadata_json(metadata: &UploadMetadata) -> Result<String> {
    serde_json::to_string(metadata).context("Failed to serialize upload metadata")
}

impl ProcessingJobStore for SqliteProcessingJobStore {
    fn create_job(&self, job: &ProcessingJob) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO processing_jobs (
                id, status, source_locator, metadata, track_id, source_sha256,
                error_message, created_at, started_at, completed_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                job.id,
                job.status.as_str(),
                job.source_locator,
                metadata_json(&job.metadata)?,
                job.track_id,
                job.source_sha256,
                job.error_message,
                job.created_at,
                job.started_at,
                job.completed_at,
                job.updated_at,
            ],
        )
        .with_context(|| format!("Failed to create job {}", job.id))?;
        Ok(())
    }

    fn get_job(&self, id: &str) -> Result<Option<ProcessingJob>> {
        let conn = self.conn.lock().unwrap();
        let job = conn
            .query_row(
                "SELECT * FROM processing_jobs WHERE id = ?1",
                params![id],
                Self::row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    fn mark_uploaded(&self, id: &str, locator: &str, now: i64) -> Result<TransitionOutcome> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            r#"
            UPDATE processing_jobs
            SET status = ?2, source_locator = ?3, updated_at = ?4
            WHERE id = ?1 AND status IN (?5, ?2)
            "#,
            params![
                id,
                JobStatus::Uploaded.as_str(),
                locator,
                now,
                JobStatus::PendingUpload.as_str(),
            ],
        )?;
        if updated > 0 {
            return Ok(TransitionOutcome::Applied);
        }
        Self::outcome_for_noop(&conn, id)
    }

    fn transition(
        &self,
        id: &str,
        to: JobStatus,
        error_message: Option<&str>,
        now: i64,
    ) -> Result<TransitionOutcome> {
        let from = JobStatus::predecessors(to);
        let conn = self.conn.lock().unwrap();
        if from.is_empty() {
            return Self::outcome_for_noop(&conn, id);
        }

        let started_at = (to == JobStatus::Processing).then_some(now);
        let completed_at = to.is_terminal().then_some(now);
        let placeholders: Vec<String> = (0..from.len()).map(|i| format!("?{}", i + 7)).collect();
        let sql = format!(
            r#"
            UPDATE processing_jobs
            SET status = ?2,
                error_message = COALESCE(?3, error_message),
                started_at = COALESCE(?4, started_at),
                completed_at = COALESCE(?5, completed_at),
                updated_at = ?6
            WHERE id = ?1 AND status IN ({})
            "#,
            placeholders.join(", ")
        );

        let mut values: Vec<rusqlite::types::Value> = vec![
            id.to_string().into(),
            to.as_str().to_string().into(),
            error_message.map(str::to_string).into(),
            started_at.into(),
            completed_at.into(),
            now.into(),
        ];
        values.extend(from.iter().map(|s| s.as_str().to_string().into()));

        let updated = conn.execute(&sql, params_from_iter(values))?;
        if updated > 0 {
            return Ok(TransitionOutcome::Applied);
        }
        Self::outcome_for_noop(&conn, id)
    }

    fn link_track(&self, id: &str, track_id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE processing_jobs SET track_id = ?2 WHERE id = ?1 AND track_id IS NULL",
            params![id, track_id],
        )?;
        Ok(updated > 0)
    }

    fn record_fingerprint(&self, id: &str, sha256: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE processing_jobs SET source_sha256 = ?2 WHERE id = ?1",
            params![id, sha256],
        )?;
        Ok(())
    }

    fn list_jobs(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<ProcessingJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM processing_jobs
            WHERE ?1 IS NULL OR status = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2
            "#,
        )?;
        let jobs = stmt
            .query_map(
                params![status.map(|s| s.as_str()), limit as i64],
                Self::row_to_job,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    fn list_stale_processing(&self, started_before: i64) -> Result<Vec<ProcessingJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM processing_jobs
            WHERE status = ?1 AND started_at < ?2
            ORDER BY started_at
            "#,
        )?;
        let jobs = stmt
            .query_map(
                params![JobStatus::Processing.as_str(), started_before],
                Self::row_to_job,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }
}
