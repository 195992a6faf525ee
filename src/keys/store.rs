use super::{EncryptionKey, KeyCustodian, KeyError, KeyRecord};
use crate::sqlite_persistence::{
    open_in_memory_store_connection, open_store_connection, StoreSchema,
};
use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

const KEYS_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS track_encryption_keys (
    track_id INTEGER PRIMARY KEY,
    key_id TEXT NOT NULL,
    key_bytes BLOB NOT NULL CHECK (length(key_bytes) = 16),
    created_at INTEGER NOT NULL,
    rotated_at INTEGER
);
"#;

const KEYS_SCHEMA_VERSION: i32 = 1;

fn keys_schema() -> StoreSchema {
    StoreSchema {
        name: "keys",
        version: KEYS_SCHEMA_VERSION,
        batches: vec![KEYS_SCHEMA_SQL.to_string()],
    }
}

fn new_key_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Keys live in their own database file so that catalog dumps never
/// carry key material.
pub struct SqliteKeyCustodian {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKeyCustodian {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = open_store_connection(path, &keys_schema())?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = open_in_memory_store_connection(&keys_schema())?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<KeyRecord> {
        Ok(KeyRecord {
            track_id: row.get("track_id")?,
            key_id: row.get("key_id")?,
            created_at: row.get("created_at")?,
            rotated_at: row.get("rotated_at")?,
        })
    }
}

impl KeyCustodian for SqliteKeyCustodian {
    fn issue(&self, track_id: i64) -> Result<String, KeyError> {
        let key = EncryptionKey::generate();
        let key_id = new_key_id();

        let conn = self.conn.lock().unwrap();
        let inserted = conn
            .execute(
                r#"
                INSERT INTO track_encryption_keys (track_id, key_id, key_bytes, created_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(track_id) DO NOTHING
                "#,
                params![
                    track_id,
                    key_id,
                    key.as_bytes().as_slice(),
                    Utc::now().timestamp_millis()
                ],
            )
            .map_err(anyhow::Error::from)?;

        if inserted == 0 {
            return Err(KeyError::AlreadyExists(track_id));
        }
        info!("Issued encryption key {} for track {}", key_id, track_id);
        Ok(key_id)
    }

    fn get_raw(&self, track_id: i64) -> Result<EncryptionKey, KeyError> {
        let conn = self.conn.lock().unwrap();
        let bytes: Option<Vec<u8>> = conn
            .query_row(
                "SELECT key_bytes FROM track_encryption_keys WHERE track_id = ?1",
                params![track_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(anyhow::Error::from)?;

        match bytes {
            Some(bytes) => EncryptionKey::try_from(bytes.as_slice()),
            None => Err(KeyError::NotFound(track_id)),
        }
    }

    fn get_record(&self, track_id: i64) -> Result<Option<KeyRecord>, KeyError> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT track_id, key_id, created_at, rotated_at FROM track_encryption_keys WHERE track_id = ?1",
                params![track_id],
                Self::row_to_record,
            )
            .optional()
            .map_err(anyhow::Error::from)?;
        Ok(record)
    }

    fn rotate(&self, track_id: i64, new_key: &[u8]) -> Result<String, KeyError> {
        let key = EncryptionKey::try_from(new_key)?;
        let key_id = new_key_id();

        let conn = self.conn.lock().unwrap();
        let updated = conn
            .execute(
                r#"
                UPDATE track_encryption_keys
                SET key_bytes = ?2, key_id = ?3, rotated_at = ?4
                WHERE track_id = ?1
                "#,
                params![
                    track_id,
                    key.as_bytes().as_slice(),
                    key_id,
                    Utc::now().timestamp_millis()
                ],
            )
            .map_err(anyhow::Error::from)?;

        if updated == 0 {
            return Err(KeyError::NotFound(track_id));
        }
        info!("Rotated encryption key of track {} to {}", track_id, key_id);
        Ok(key_id)
    }

    fn delete(&self, track_id: i64) -> Result<bool, KeyError> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn
            .execute(
                "DELETE FROM track_encryption_keys WHERE track_id = ?1",
                params![track_id],
            )
            .map_err(anyhow::Error::from)?;
        Ok(deleted > 0)
    }
}
