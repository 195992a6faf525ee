//! Shared SQLite setup for the service's stores.
//!
//! Each store owns its own database file and declares a [`StoreSchema`].
//! The schema version is recorded in `PRAGMA user_version`, offset by
//! [`BASE_DB_VERSION`] so that foreign databases are told apart from ours.

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use std::path::Path;

pub const BASE_DB_VERSION: i32 = 99999;

pub struct StoreSchema {
    /// Human readable name, used in error messages.
    pub name: &'static str,
    pub version: i32,
    /// SQL batches executed in order. Must be idempotent (`IF NOT EXISTS`).
    pub batches: Vec<String>,
}

impl StoreSchema {
    fn apply(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let current: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if current != 0 && current < BASE_DB_VERSION {
            bail!(
                "{} database has unexpected user_version {}, not created by this server",
                self.name,
                current
            );
        }
        if current > BASE_DB_VERSION + self.version {
            bail!(
                "{} database version {} is newer than supported version {}",
                self.name,
                current - BASE_DB_VERSION,
                self.version
            );
        }

        for batch in &self.batches {
            conn.execute_batch(batch)
                .with_context(|| format!("Failed to apply {} schema", self.name))?;
        }
        conn.execute_batch(&format!(
            "PRAGMA user_version = {}",
            BASE_DB_VERSION + self.version
        ))?;
        Ok(())
    }
}

/// Opens (or creates) the database at `path` and applies `schema`.
pub fn open_store_connection(path: &Path, schema: &StoreSchema) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open {} database: {:?}", schema.name, path))?;
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    schema.apply(&conn)?;
    Ok(conn)
}

/// In-memory database with `schema` applied.
pub fn open_in_memory_store_connection(schema: &StoreSchema) -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    schema.apply(&conn)?;
    Ok(conn)
}
