//! SQLite persistence of API tokens and blocked IPs.

use super::models::{BlockedIp, Identity, Role};
use super::schema::{GATEWAY_SCHEMA_SQL, GATEWAY_SCHEMA_VERSION};
use crate::sqlite_persistence::{
    open_in_memory_store_connection, open_store_connection, StoreSchema,
};
use anyhow::{Context, Result};
use rand::Rng;
use rand_distr::Alphanumeric;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

const TOKEN_LENGTH: usize = 64;

pub fn generate_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

pub trait GatewayStore: Send + Sync {
    // ==================== Tokens ====================

    /// Mints a new bearer token for `user_id`.
    fn create_token(&self, user_id: i64, role: Role, now: i64) -> Result<String>;

    /// Resolves a token and stamps its last use.
    fn resolve_token(&self, token: &str, now: i64) -> Result<Option<Identity>>;

    fn revoke_token(&self, token: &str) -> Result<bool>;

    // ==================== Blocked IPs ====================

    /// Blocks `ip`, replacing any previous block of the same address.
    fn block_ip(&self, block: &BlockedIp) -> Result<()>;

    fn unblock_ip(&self, ip: &str) -> Result<bool>;

    /// Blocks in effect at `now`.
    fn list_active_blocks(&self, now: i64) -> Result<Vec<BlockedIp>>;

    /// Deletes non-permanent blocks that expired before `now`.
    fn purge_expired_blocks(&self, now: i64) -> Result<usize>;
}

pub struct SqliteGatewayStore {
    conn: Arc<Mutex<Connection>>,
}

fn gateway_schema() -> StoreSchema {
    StoreSchema {
        name: "gateway",
        version: GATEWAY_SCHEMA_VERSION,
        batches: vec![GATEWAY_SCHEMA_SQL.to_string()],
    }
}

impl SqliteGatewayStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = open_store_connection(path, &gateway_schema())?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = open_in_memory_store_connection(&gateway_schema())?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_block(row: &rusqlite::Row) -> rusqlite::Result<BlockedIp> {
        Ok(BlockedIp {
            ip_address: row.get("ip_address")?,
            reason: row.get("reason")?,
            blocked_at: row.get("blocked_at")?,
            expires_at: row.get("expires_at")?,
            is_permanent: row.get("is_permanent")?,
        })
    }
}

impl GatewayStore for SqliteGatewayStore {
    fn create_token(&self, user_id: i64, role: Role, now: i64) -> Result<String> {
        let token = generate_token();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO api_tokens (token, user_id, role, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![token, user_id, role.as_str(), now],
        )
        .context("Failed to insert API token")?;
        debug!("Issued {} token for user {}", role.as_str(), user_id);
        Ok(token)
    }

    fn resolve_token(&self, token: &str, now: i64) -> Result<Option<Identity>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT user_id, role FROM api_tokens WHERE token = ?1",
                params![token],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((user_id, role)) = row else {
            return Ok(None);
        };
        let Some(role) = Role::parse(&role) else {
            debug!("Token of user {} has unknown role {}", user_id, role);
            return Ok(None);
        };

        conn.execute(
            "UPDATE api_tokens SET last_used = ?2 WHERE token = ?1",
            params![token, now],
        )?;
        Ok(Some(Identity { user_id, role }))
    }

    fn revoke_token(&self, token: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM api_tokens WHERE token = ?1", params![token])?;
        Ok(deleted > 0)
    }

    fn block_ip(&self, block: &BlockedIp) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO blocked_ips (ip_address, reason, blocked_at, expires_at, is_permanent)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(ip_address) DO UPDATE SET
                reason = excluded.reason,
                blocked_at = excluded.blocked_at,
                expires_at = excluded.expires_at,
                is_permanent = excluded.is_permanent
            "#,
            params![
                block.ip_address,
                block.reason,
                block.blocked_at,
                block.expires_at,
                block.is_permanent
            ],
        )
        .context("Failed to insert blocked IP")?;
        Ok(())
    }

    fn unblock_ip(&self, ip: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM blocked_ips WHERE ip_address = ?1", params![ip])?;
        Ok(deleted > 0)
    }

    fn list_active_blocks(&self, now: i64) -> Result<Vec<BlockedIp>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM blocked_ips
            WHERE is_permanent = 1 OR expires_at IS NULL OR expires_at > ?1
            ORDER BY blocked_at DESC
            "#,
        )?;
        let blocks = stmt
            .query_map(params![now], Self::row_to_block)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(blocks)
    }

    fn purge_expired_blocks(&self, now: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM blocked_ips WHERE is_permanent = 0 AND expires_at IS NOT NULL AND expires_at <= ?1",
            params![now],
        )?;
        Ok(deleted)
    }
}
