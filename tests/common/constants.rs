//! Shared constants for end-to-end tests

// ============================================================================
// Identities
// ============================================================================

pub const ADMIN_USER_ID: i64 = 1;

pub const LISTENER_USER_ID: i64 = 2;

pub const OTHER_LISTENER_USER_ID: i64 = 3;

/// Address every client claims through `X-Forwarded-For`.
pub const CLIENT_IP: &str = "203.0.113.10";

// ============================================================================
// Audio fixtures
// ============================================================================

pub const SAMPLE_RATE: u32 = 8000;

pub const FIXTURE_DURATION_SECS: u32 = 30;

// ============================================================================
// Timeouts
// ============================================================================

pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 20;

pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// How long to wait for an ingestion job to reach a terminal state.
pub const JOB_TIMEOUT_MS: u64 = 10_000;

pub const JOB_POLL_INTERVAL_MS: u64 = 50;
