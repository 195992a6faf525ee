//! SQLite store for tracks, their feature sets and embeddings.

use super::models::{NewTrack, Track, TrackPatch, TrackStatus};
use super::schema::{audio_features_table_sql, CATALOG_SCHEMA_SQL, CATALOG_SCHEMA_VERSION};
use crate::analysis::{AudioFeatureSet, EmbeddingKind, EmbeddingVector, FEATURE_NAMES};
use crate::sqlite_persistence::{
    open_in_memory_store_connection, open_store_connection, StoreSchema,
};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub trait CatalogStore: Send + Sync {
    // ==================== Tracks ====================

    /// Creates a track in `processing` state.
    fn create_track(&self, track: &NewTrack) -> Result<Track>;

    fn get_track(&self, id: i64) -> Result<Option<Track>>;

    fn set_track_status(&self, id: i64, status: TrackStatus) -> Result<()>;

    /// Moves a `processing` track to `completed`, recording where its
    /// manifest lives and its duration.
    ///
    /// Fails if the track has no feature set or no content embedding yet.
    fn complete_track(&self, id: i64, manifest_locator: &str, duration_sec: f64) -> Result<Track>;

    /// Applies an administrative metadata edit. Returns the updated track,
    /// or `None` if it doesn't exist.
    fn apply_patch(&self, id: i64, patch: TrackPatch) -> Result<Option<Track>>;

    /// Removes a track together with its feature set and embeddings.
    fn delete_track(&self, id: i64) -> Result<bool>;

    fn count_tracks(&self, status: TrackStatus) -> Result<usize>;

    // ==================== Features ====================

    /// Stores the feature set of a track. A track has at most one.
    fn save_features(&self, track_id: i64, features: &AudioFeatureSet) -> Result<()>;

    fn get_features(&self, track_id: i64) -> Result<Option<AudioFeatureSet>>;

    // ==================== Embeddings ====================

    /// Stores a new embedding. Fails if one of the same kind already exists.
    fn save_embedding(&self, track_id: i64, embedding: &EmbeddingVector) -> Result<()>;

    fn get_embedding(&self, track_id: i64, kind: EmbeddingKind) -> Result<Option<EmbeddingVector>>;

    /// Embeddings of every completed track except `exclude_track_id`.
    fn list_embeddings(
        &self,
        kind: EmbeddingKind,
        exclude_track_id: i64,
    ) -> Result<Vec<(i64, EmbeddingVector)>>;
}

pub struct SqliteCatalogStore {
    conn: Arc<Mutex<Connection>>,
}

fn catalog_schema() -> StoreSchema {
    StoreSchema {
        name: "catalog",
        version: CATALOG_SCHEMA_VERSION,
        batches: vec![CATALOG_SCHEMA_SQL.to_string(), audio_features_table_sql()],
    }
}

impl SqliteCatalogStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = open_store_connection(path, &catalog_schema())?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = open_in_memory_store_connection(&catalog_schema())?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_track(row: &rusqlite::Row) -> rusqlite::Result<Track> {
        let status: String = row.get("status")?;
        Ok(Track {
            id: row.get("id")?,
            title: row.get("title")?,
            artist: row.get("artist")?,
            album: row.get("album")?,
            genre: row.get("genre")?,
            duration_sec: row.get("duration_sec")?,
            manifest_locator: row.get("manifest_locator")?,
            status: TrackStatus::parse(&status).unwrap_or(TrackStatus::Failed),
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn query_track(conn: &Connection, id: i64) -> Result<Option<Track>> {
        Ok(conn
            .query_row(
                "SELECT * FROM tracks WHERE id = ?1",
                params![id],
                Self::row_to_track,
            )
            .optional()?)
    }
}

impl CatalogStore for SqliteCatalogStore {
    fn create_track(&self, track: &NewTrack) -> Result<Track> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().timestamp_millis();
        conn.execute(
            r#"
            INSERT INTO tracks (title, artist, album, genre, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            "#,
            params![
                track.title,
                track.artist,
                track.album,
                track.genre,
                TrackStatus::Processing.as_str(),
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        Self::query_track(&conn, id)?.context("Track vanished right after insert")
    }

    fn get_track(&self, id: i64) -> Result<Option<Track>> {
        let conn = self.conn.lock().unwrap();
        Self::query_track(&conn, id)
    }

    fn set_track_status(&self, id: i64, status: TrackStatus) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE tracks SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), Utc::now().timestamp_millis()],
        )?;
        if updated == 0 {
            bail!("Track {} not found", id);
        }
        Ok(())
    }

    fn complete_track(&self, id: i64, manifest_locator: &str, duration_sec: f64) -> Result<Track> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let (has_features, has_embedding): (bool, bool) = tx.query_row(
            r#"
            SELECT
                EXISTS(SELECT 1 FROM audio_features WHERE track_id = ?1),
                EXISTS(SELECT 1 FROM track_embeddings WHERE track_id = ?1 AND embedding_type = ?2)
            "#,
            params![id, EmbeddingKind::AudioContent.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if !has_features || !has_embedding {
            bail!(
                "Track {} cannot complete: features present={}, embedding present={}",
                id,
                has_features,
                has_embedding
            );
        }

        let updated = tx.execute(
            r#"
            UPDATE tracks
            SET manifest_locator = ?2, duration_sec = ?3, status = ?4, updated_at = ?5
            WHERE id = ?1 AND status = ?6
            "#,
            params![
                id,
                manifest_locator,
                duration_sec,
                TrackStatus::Completed.as_str(),
                Utc::now().timestamp_millis(),
                TrackStatus::Processing.as_str(),
            ],
        )?;
        if updated == 0 {
            bail!("Track {} is not in processing state", id);
        }

        let track = Self::query_track(&tx, id)?.context("Track vanished during completion")?;
        tx.commit()?;
        Ok(track)
    }

    fn apply_patch(&self, id: i64, patch: TrackPatch) -> Result<Option<Track>> {
        let conn = self.conn.lock().unwrap();
        let mut track = match Self::query_track(&conn, id)? {
            Some(track) => track,
            None => return Ok(None),
        };
        patch.apply(&mut track);
        track.updated_at = Utc::now().timestamp_millis();

        conn.execute(
            r#"
            UPDATE tracks SET title = ?2, artist = ?3, album = ?4, genre = ?5, updated_at = ?6
            WHERE id = ?1
            "#,
            params![
                track.id,
                track.title,
                track.artist,
                track.album,
                track.genre,
                track.updated_at,
            ],
        )?;
        Ok(Some(track))
    }

    fn delete_track(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM tracks WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn count_tracks(&self, status: TrackStatus) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tracks WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn save_features(&self, track_id: i64, features: &AudioFeatureSet) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let placeholders: Vec<String> = (0..FEATURE_NAMES.len())
            .map(|i| format!("?{}", i + 3))
            .collect();
        let sql = format!(
            "INSERT INTO audio_features (track_id, created_at, {}) VALUES (?1, ?2, {})",
            FEATURE_NAMES.join(", "),
            placeholders.join(", ")
        );

        let mut values: Vec<rusqlite::types::Value> = vec![
            track_id.into(),
            Utc::now().timestamp_millis().into(),
        ];
        values.extend(features.values().into_iter().map(rusqlite::types::Value::from));

        conn.execute(&sql, rusqlite::params_from_iter(values))
            .with_context(|| format!("Failed to store features for track {}", track_id))?;
        Ok(())
    }

    fn get_features(&self, track_id: i64) -> Result<Option<AudioFeatureSet>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM audio_features WHERE track_id = ?1",
            FEATURE_NAMES.join(", ")
        );
        let result = conn
            .query_row(&sql, params![track_id], |row| {
                let mut features = AudioFeatureSet::default();
                for (i, name) in FEATURE_NAMES.iter().enumerate() {
                    features.set(name, row.get(i)?);
                }
                Ok(features)
            })
            .optional()?;
        Ok(result)
    }

    fn save_embedding(&self, track_id: i64, embedding: &EmbeddingVector) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().timestamp_millis();
        conn.execute(
            r#"
            INSERT INTO track_embeddings (track_id, embedding_type, vector, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            "#,
            params![track_id, embedding.kind.as_str(), embedding.to_bytes(), now],
        )
        .with_context(|| {
            format!(
                "Failed to store {} embedding for track {}",
                embedding.kind.as_str(),
                track_id
            )
        })?;
        Ok(())
    }

    fn get_embedding(&self, track_id: i64, kind: EmbeddingKind) -> Result<Option<EmbeddingVector>> {
        let conn = self.conn.lock().unwrap();
        let bytes: Option<Vec<u8>> = conn
            .query_row(
                "SELECT vector FROM track_embeddings WHERE track_id = ?1 AND embedding_type = ?2",
                params![track_id, kind.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match bytes {
            None => Ok(None),
            Some(bytes) => EmbeddingVector::from_bytes(kind, &bytes)
                .map(Some)
                .with_context(|| format!("Corrupted embedding for track {}", track_id)),
        }
    }

    fn list_embeddings(
        &self,
        kind: EmbeddingKind,
        exclude_track_id: i64,
    ) -> Result<Vec<(i64, EmbeddingVector)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT e.track_id, e.vector
            FROM track_embeddings e
            JOIN tracks t ON t.id = e.track_id
            WHERE e.embedding_type = ?1 AND e.track_id != ?2 AND t.status = ?3
            "#,
        )?;
        let rows = stmt.query_map(
            params![kind.as_str(), exclude_track_id, TrackStatus::Completed.as_str()],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)),
        )?;

        let mut embeddings = Vec::new();
        for row in rows {
            let (track_id, bytes) = row?;
            match EmbeddingVector::from_bytes(kind, &bytes) {
                Some(embedding) => embeddings.push((track_id, embedding)),
                None => tracing::warn!("Skipping corrupted embedding of track {}", track_id),
            }
        }
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{build_embedding, FEATURE_NAMES};

    fn new_track(title: &str) -> NewTrack {
        NewTrack {
            title: title.to_string(),
            artist: "Unknown Artist".to_string(),
            album: None,
            genre: Some("Ambient".to_string()),
        }
    }

    fn sample_features(seed: f64) -> AudioFeatureSet {
        let mut features = AudioFeatureSet::default();
        for (i, name) in FEATURE_NAMES.iter().enumerate() {
            features.set(name, seed + i as f64);
        }
        features
    }

    fn completed_track(store: &SqliteCatalogStore, title: &str, seed: f64) -> Track {
        let track = store.create_track(&new_track(title)).unwrap();
        let features = sample_features(seed);
        store.save_features(track.id, &features).unwrap();
        store
            .save_embedding(track.id, &build_embedding(&features))
            .unwrap();
        store
            .complete_track(track.id, &format!("hls/{}/master.m3u8", track.id), 30.0)
            .unwrap()
    }

    #[test]
    fn test_create_and_get_track() {
        let store = SqliteCatalogStore::in_memory().unwrap();
        let track = store.create_track(&new_track("First")).unwrap();

        assert_eq!(track.status, TrackStatus::Processing);
        assert_eq!(track.duration_sec, None);

        let retrieved = store.get_track(track.id).unwrap().unwrap();
        assert_eq!(retrieved, track);
        assert!(store.get_track(track.id + 100).unwrap().is_none());
    }

    #[test]
    fn test_track_ids_are_sequential_integers() {
        let store = SqliteCatalogStore::in_memory().unwrap();
        let a = store.create_track(&new_track("a")).unwrap();
        let b = store.create_track(&new_track("b")).unwrap();
        assert_eq!(b.id, a.id + 1);
    }

    #[test]
    fn test_complete_requires_features_and_embedding() {
        let store = SqliteCatalogStore::in_memory().unwrap();
        let track = store.create_track(&new_track("t")).unwrap();

        assert!(store.complete_track(track.id, "hls/1/master.m3u8", 30.0).is_err());

        let features = sample_features(1.0);
        store.save_features(track.id, &features).unwrap();
        assert!(store.complete_track(track.id, "hls/1/master.m3u8", 30.0).is_err());

        store
            .save_embedding(track.id, &build_embedding(&features))
            .unwrap();
        let completed = store
            .complete_track(track.id, "hls/1/master.m3u8", 30.0)
            .unwrap();
        assert_eq!(completed.status, TrackStatus::Completed);
        assert_eq!(completed.duration_sec, Some(30.0));
        assert_eq!(
            completed.manifest_locator,
            Some("hls/1/master.m3u8".to_string())
        );
    }

    #[test]
    fn test_complete_rejects_failed_track() {
        let store = SqliteCatalogStore::in_memory().unwrap();
        let track = store.create_track(&new_track("t")).unwrap();
        let features = sample_features(1.0);
        store.save_features(track.id, &features).unwrap();
        store
            .save_embedding(track.id, &build_embedding(&features))
            .unwrap();
        store.set_track_status(track.id, TrackStatus::Failed).unwrap();

        assert!(store.complete_track(track.id, "x", 1.0).is_err());
    }

    #[test]
    fn test_features_roundtrip_and_single_set() {
        let store = SqliteCatalogStore::in_memory().unwrap();
        let track = store.create_track(&new_track("t")).unwrap();
        let features = sample_features(0.5);

        store.save_features(track.id, &features).unwrap();
        assert_eq!(store.get_features(track.id).unwrap(), Some(features.clone()));

        // Feature sets are immutable
        assert!(store.save_features(track.id, &sample_features(9.0)).is_err());
        assert_eq!(store.get_features(track.id).unwrap(), Some(features));
    }

    #[test]
    fn test_embedding_save_is_not_append() {
        let store = SqliteCatalogStore::in_memory().unwrap();
        let track = store.create_track(&new_track("t")).unwrap();
        let first = build_embedding(&sample_features(1.0));
        let second = build_embedding(&sample_features(50.0));

        store.save_embedding(track.id, &first).unwrap();
        assert!(store.save_embedding(track.id, &second).is_err());
        assert_eq!(
            store
                .get_embedding(track.id, EmbeddingKind::AudioContent)
                .unwrap(),
            Some(first)
        );
    }

    #[test]
    fn test_list_embeddings_only_completed_and_excluding_query() {
        let store = SqliteCatalogStore::in_memory().unwrap();
        let a = completed_track(&store, "a", 1.0);
        let b = completed_track(&store, "b", 2.0);

        // In-flight track with an embedding is not listed
        let c = store.create_track(&new_track("c")).unwrap();
        store
            .save_embedding(c.id, &build_embedding(&sample_features(3.0)))
            .unwrap();

        let listed = store
            .list_embeddings(EmbeddingKind::AudioContent, a.id)
            .unwrap();
        let ids: Vec<i64> = listed.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![b.id]);
    }

    #[test]
    fn test_patch_and_delete() {
        let store = SqliteCatalogStore::in_memory().unwrap();
        let track = completed_track(&store, "a", 1.0);

        let patched = store
            .apply_patch(
                track.id,
                TrackPatch {
                    artist: Some("Ada".to_string()),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(patched.artist, "Ada");
        assert_eq!(patched.title, "a");
        assert_eq!(patched.status, TrackStatus::Completed);

        assert!(store
            .apply_patch(track.id + 10, TrackPatch::default())
            .unwrap()
            .is_none());

        assert!(store.delete_track(track.id).unwrap());
        assert!(store.get_track(track.id).unwrap().is_none());
        assert!(store.get_features(track.id).unwrap().is_none());
        assert!(store
            .get_embedding(track.id, EmbeddingKind::AudioContent)
            .unwrap()
            .is_none());
        assert!(!store.delete_track(track.id).unwrap());
    }

    #[test]
    fn test_count_tracks() {
        let store = SqliteCatalogStore::in_memory().unwrap();
        completed_track(&store, "a", 1.0);
        store.create_track(&new_track("b")).unwrap();

        assert_eq!(store.count_tracks(TrackStatus::Completed).unwrap(), 1);
        assert_eq!(store.count_tracks(TrackStatus::Processing).unwrap(), 1);
        assert_eq!(store.count_tracks(TrackStatus::Failed).unwrap(), 0);
    }
}
