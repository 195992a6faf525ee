//! SQLite persistence of listening sessions and daily counters.
//!
//! Every operation runs as one transaction on the single store connection,
//! so concurrent progress reports for the same session are applied one
//! after the other, each against the position the previous one recorded.

use super::models::{DailyUsage, ListeningSession, ProgressUpdate, QuotaSubject};
use super::schema::{LISTENING_SCHEMA_SQL, LISTENING_SCHEMA_VERSION};
use crate::sqlite_persistence::{
    open_in_memory_store_connection, open_store_connection, StoreSchema,
};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub trait ListeningStore: Send + Sync {
    fn get_usage(&self, subject: &QuotaSubject, day: NaiveDate) -> Result<DailyUsage>;

    /// Inserts the session and counts a started track for `day`.
    fn create_session(&self, session: &ListeningSession, day: NaiveDate) -> Result<DailyUsage>;

    fn get_session(&self, id: &str) -> Result<Option<ListeningSession>>;

    /// Accounts a reported playback position against the session.
    ///
    /// Only the part beyond the recorded position counts; smaller or equal
    /// positions add nothing. With `complete`, the session is marked
    /// completed and `tracks_completed` is bumped the first time. Returns
    /// `None` if the session doesn't exist.
    fn record_progress(
        &self,
        session_id: &str,
        position_sec: f64,
        complete: bool,
        day: NaiveDate,
        now: i64,
    ) -> Result<Option<ProgressUpdate>>;
}

pub struct SqliteListeningStore {
    conn: Arc<Mutex<Connection>>,
}

fn listening_schema() -> StoreSchema {
    StoreSchema {
        name: "listening",
        version: LISTENING_SCHEMA_VERSION,
        batches: vec![LISTENING_SCHEMA_SQL.to_string()],
    }
}

fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

impl SqliteListeningStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = open_store_connection(path, &listening_schema())?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = open_in_memory_store_connection(&listening_schema())?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<ListeningSession> {
        Ok(ListeningSession {
            id: row.get("id")?,
            subject: QuotaSubject::from_stored(row.get("subject")?),
            user_id: row.get("user_id")?,
            track_id: row.get("track_id")?,
            started_at: row.get("started_at")?,
            position_sec: row.get("position_sec")?,
            completed: row.get("completed")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn read_usage(conn: &Connection, subject: &QuotaSubject, day: NaiveDate) -> Result<DailyUsage> {
        let usage = conn
            .query_row(
                r#"
                SELECT minutes_listened, tracks_started, tracks_completed
                FROM daily_quota_counters WHERE subject = ?1 AND day = ?2
                "#,
                params![subject.as_str(), day_key(day)],
                |row| {
                    Ok(DailyUsage {
                        minutes_listened: row.get(0)?,
                        tracks_started: row.get(1)?,
                        tracks_completed: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(usage.unwrap_or_default())
    }

    fn read_session(conn: &Connection, id: &str) -> Result<Option<ListeningSession>> {
        Ok(conn
            .query_row(
                "SELECT * FROM listening_sessions WHERE id = ?1",
                params![id],
                Self::row_to_session,
            )
            .optional()?)
    }
}

impl ListeningStore for SqliteListeningStore {
    fn get_usage(&self, subject: &QuotaSubject, day: NaiveDate) -> Result<DailyUsage> {
        let conn = self.conn.lock().unwrap();
        Self::read_usage(&conn, subject, day)
    }

    fn create_session(&self, session: &ListeningSession, day: NaiveDate) -> Result<DailyUsage> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO listening_sessions (
                id, subject, user_id, track_id, started_at, position_sec, completed, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                session.id,
                session.subject.as_str(),
                session.user_id,
                session.track_id,
                session.started_at,
                session.position_sec,
                session.completed,
                session.updated_at,
            ],
        )
        .context("Failed to insert listening session")?;

        tx.execute(
            r#"
            INSERT INTO daily_quota_counters (subject, day, tracks_started)
            VALUES (?1, ?2, 1)
            ON CONFLICT(subject, day) DO UPDATE SET tracks_started = tracks_started + 1
            "#,
            params![session.subject.as_str(), day_key(day)],
        )?;

        let usage = Self::read_usage(&tx, &session.subject, day)?;
        tx.commit()?;
        Ok(usage)
    }

    fn get_session(&self, id: &str) -> Result<Option<ListeningSession>> {
        let conn = self.conn.lock().unwrap();
        Self::read_session(&conn, id)
    }

    fn record_progress(
        &self,
        session_id: &str,
        position_sec: f64,
        complete: bool,
        day: NaiveDate,
        now: i64,
    ) -> Result<Option<ProgressUpdate>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let Some(mut session) = Self::read_session(&tx, session_id)? else {
            return Ok(None);
        };

        let delta = position_sec - session.position_sec;
        let minutes_added = if delta > 0.0 {
            session.position_sec = position_sec;
            delta / 60.0
        } else {
            0.0
        };
        let newly_completed = complete && !session.completed;
        session.completed |= complete;
        session.updated_at = now;

        tx.execute(
            r#"
            UPDATE listening_sessions
            SET position_sec = ?2, completed = ?3, updated_at = ?4
            WHERE id = ?1
            "#,
            params![
                session.id,
                session.position_sec,
                session.completed,
                session.updated_at
            ],
        )?;

        // Minutes go to the day of the report, not the day the session began
        tx.execute(
            r#"
            INSERT INTO daily_quota_counters (subject, day, minutes_listened, tracks_completed)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(subject, day) DO UPDATE SET
                minutes_listened = minutes_listened + excluded.minutes_listened,
                tracks_completed = tracks_completed + excluded.tracks_completed
            "#,
            params![
                session.subject.as_str(),
                day_key(day),
                minutes_added,
                newly_completed as u32
            ],
        )?;

        let usage = Self::read_usage(&tx, &session.subject, day)?;
        tx.commit()?;

        Ok(Some(ProgressUpdate {
            session,
            minutes_added,
            newly_completed,
            usage,
        }))
    }
}
