use super::models::{Caller, DailyUsage, ListeningSession, QuotaPolicy, QuotaStatus};
use super::store::ListeningStore;
use crate::error::ErrorKind;
use crate::server::metrics;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("Daily listening quota exceeded")]
    Exceeded(QuotaStatus),

    #[error("Listening session not found: {0}")]
    SessionNotFound(String),

    #[error("Listening session {0} belongs to another caller")]
    NotOwner(String),

    #[error("Invalid playback position: {0}")]
    InvalidPosition(f64),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl QuotaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QuotaError::Exceeded(_) => ErrorKind::QuotaExceeded,
            QuotaError::SessionNotFound(_) => ErrorKind::NotFound,
            QuotaError::NotOwner(_) => ErrorKind::Forbidden,
            QuotaError::InvalidPosition(_) => ErrorKind::Validation,
            QuotaError::Store(_) => ErrorKind::Internal,
        }
    }
}

/// Source of the current time, replaceable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Daily listening allowance and session accounting.
///
/// Counters are keyed by UTC day, so quota resets at midnight without any
/// reset job. A report is always accounted to the day it arrives on.
pub struct QuotaGovernor {
    store: Arc<dyn ListeningStore>,
    policy: QuotaPolicy,
    clock: Arc<dyn Clock>,
}

impl QuotaGovernor {
    pub fn new(store: Arc<dyn ListeningStore>, policy: QuotaPolicy) -> Self {
        Self::with_clock(store, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn ListeningStore>,
        policy: QuotaPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }

    fn status_for(&self, caller: &Caller, usage: &DailyUsage) -> QuotaStatus {
        QuotaStatus::compute(caller.tier, self.policy.limit_for(caller.tier), usage)
    }

    /// Quota of `caller` for today.
    pub fn check(&self, caller: &Caller) -> Result<QuotaStatus, QuotaError> {
        self.check_on(caller, self.today())
    }

    pub fn check_on(&self, caller: &Caller, day: NaiveDate) -> Result<QuotaStatus, QuotaError> {
        let usage = self.store.get_usage(&caller.subject, day)?;
        Ok(self.status_for(caller, &usage))
    }

    /// Opens a session on `track_id` if the caller has quota left today.
    pub fn start_session(
        &self,
        caller: &Caller,
        track_id: i64,
    ) -> Result<(ListeningSession, QuotaStatus), QuotaError> {
        let now = self.clock.now();
        let day = now.date_naive();

        let status = self.check_on(caller, day)?;
        if !status.has_quota {
            metrics::record_quota_rejection(caller.tier.as_str());
            info!("Quota exhausted for {}, rejecting session", caller.subject);
            return Err(QuotaError::Exceeded(status));
        }

        let session = ListeningSession {
            id: uuid::Uuid::new_v4().to_string(),
            subject: caller.subject.clone(),
            user_id: caller.user_id,
            track_id,
            started_at: now.timestamp_millis(),
            position_sec: 0.0,
            completed: false,
            updated_at: now.timestamp_millis(),
        };
        let usage = self.store.create_session(&session, day)?;
        debug!(
            "Started session {} for {} on track {}",
            session.id, caller.subject, track_id
        );
        Ok((session, self.status_for(caller, &usage)))
    }

    /// Accounts the playback position reported by the client.
    pub fn heartbeat(
        &self,
        caller: &Caller,
        session_id: &str,
        position_sec: f64,
    ) -> Result<QuotaStatus, QuotaError> {
        self.progress(caller, session_id, position_sec, false)
    }

    /// Accounts the final position and marks the session completed.
    pub fn complete(
        &self,
        caller: &Caller,
        session_id: &str,
        total_duration_sec: f64,
    ) -> Result<QuotaStatus, QuotaError> {
        self.progress(caller, session_id, total_duration_sec, true)
    }

    fn progress(
        &self,
        caller: &Caller,
        session_id: &str,
        position_sec: f64,
        complete: bool,
    ) -> Result<QuotaStatus, QuotaError> {
        if !position_sec.is_finite() || position_sec < 0.0 {
            return Err(QuotaError::InvalidPosition(position_sec));
        }

        let session = self
            .store
            .get_session(session_id)?
            .ok_or_else(|| QuotaError::SessionNotFound(session_id.to_string()))?;
        if session.subject != caller.subject {
            return Err(QuotaError::NotOwner(session_id.to_string()));
        }

        let now = self.clock.now();
        let update = self
            .store
            .record_progress(
                session_id,
                position_sec,
                complete,
                now.date_naive(),
                now.timestamp_millis(),
            )?
            .ok_or_else(|| QuotaError::SessionNotFound(session_id.to_string()))?;

        metrics::record_listening_minutes(caller.tier.as_str(), update.minutes_added);
        if update.newly_completed {
            debug!("Session {} completed", session_id);
        }
        Ok(self.status_for(caller, &update.usage))
    }
}
