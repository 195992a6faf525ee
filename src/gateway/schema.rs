//! Database schema for API tokens and the IP blocklist.

pub const GATEWAY_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS api_tokens (
    token TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL,
    role TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    last_used INTEGER
);

CREATE INDEX IF NOT EXISTS idx_api_tokens_user ON api_tokens(user_id);

CREATE TABLE IF NOT EXISTS blocked_ips (
    ip_address TEXT PRIMARY KEY,
    reason TEXT,
    blocked_at INTEGER NOT NULL,
    expires_at INTEGER,
    is_permanent INTEGER NOT NULL DEFAULT 0
);
"#;

pub const GATEWAY_SCHEMA_VERSION: i32 = 1;
