//! Database schema for tracks, feature sets and embeddings.

use crate::analysis::FEATURE_NAMES;

/// Tracks and embeddings. The feature table is generated from the
/// descriptor list, see [`audio_features_table_sql`].
pub const CATALOG_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tracks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    artist TEXT NOT NULL,
    album TEXT,
    genre TEXT,
    duration_sec REAL,
    manifest_locator TEXT,
    status TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- One active vector per (track, type); f64 little-endian BLOB
CREATE TABLE IF NOT EXISTS track_embeddings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    track_id INTEGER NOT NULL,
    embedding_type TEXT NOT NULL,
    vector BLOB NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (track_id, embedding_type),
    FOREIGN KEY (track_id) REFERENCES tracks(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_tracks_status ON tracks(status);
CREATE INDEX IF NOT EXISTS idx_track_embeddings_type ON track_embeddings(embedding_type);
"#;

/// Current schema version.
pub const CATALOG_SCHEMA_VERSION: i32 = 1;

/// One REAL column per descriptor, one row per track.
pub fn audio_features_table_sql() -> String {
    let columns: Vec<String> = FEATURE_NAMES
        .iter()
        .map(|name| format!("    {} REAL NOT NULL", name))
        .collect();

    format!(
        "CREATE TABLE IF NOT EXISTS audio_features (\n    \
         track_id INTEGER PRIMARY KEY,\n{},\n    \
         created_at INTEGER NOT NULL,\n    \
         FOREIGN KEY (track_id) REFERENCES tracks(id) ON DELETE CASCADE\n);",
        columns.join(",\n")
    )
}
