//! Database schema for listening sessions and daily quota counters.

pub const LISTENING_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS listening_sessions (
    id TEXT PRIMARY KEY,
    -- 'user:{id}' or 'ip:{addr}'
    subject TEXT NOT NULL,
    user_id INTEGER,
    track_id INTEGER NOT NULL,
    started_at INTEGER NOT NULL,
    position_sec REAL NOT NULL DEFAULT 0 CHECK (position_sec >= 0),
    completed INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_listening_sessions_subject ON listening_sessions(subject);

CREATE TABLE IF NOT EXISTS daily_quota_counters (
    subject TEXT NOT NULL,
    -- UTC day, YYYY-MM-DD
    day TEXT NOT NULL,
    minutes_listened REAL NOT NULL DEFAULT 0 CHECK (minutes_listened >= 0),
    tracks_started INTEGER NOT NULL DEFAULT 0,
    tracks_completed INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (subject, day)
);
"#;

pub const LISTENING_SCHEMA_VERSION: i32 = 1;
