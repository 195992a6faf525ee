//! Database schema for processing jobs.

pub const JOBS_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS processing_jobs (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    source_locator TEXT,
    -- UploadMetadata as JSON
    metadata TEXT NOT NULL DEFAULT '{}',
    track_id INTEGER,
    source_sha256 TEXT,
    error_message TEXT,

    -- Timestamps (Unix milliseconds)
    created_at INTEGER NOT NULL,
    started_at INTEGER,
    completed_at INTEGER,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_processing_jobs_status ON processing_jobs(status);
CREATE INDEX IF NOT EXISTS idx_processing_jobs_created ON processing_jobs(created_at DESC);
"#;

pub const JOBS_SCHEMA_VERSION: i32 = 1;
