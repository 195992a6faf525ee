//! Quota tiers, listening sessions and daily counters.

use serde::Serialize;
use std::fmt;
use std::net::IpAddr;

/// Quota class of a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Anonymous,
    Free,
    Premium,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Anonymous => "anonymous",
            Tier::Free => "free",
            Tier::Premium => "premium",
        }
    }
}

/// Daily allowance in minutes. `Unlimited` is a sentinel, never a big number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QuotaLimit {
    Limited(f64),
    Unlimited,
}

impl QuotaLimit {
    pub fn minutes(&self) -> Option<f64> {
        match self {
            QuotaLimit::Limited(minutes) => Some(*minutes),
            QuotaLimit::Unlimited => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuotaPolicy {
    pub anonymous: QuotaLimit,
    pub free: QuotaLimit,
    pub premium: QuotaLimit,
}

impl QuotaPolicy {
    pub fn limit_for(&self, tier: Tier) -> QuotaLimit {
        match tier {
            Tier::Anonymous => self.anonymous,
            Tier::Free => self.free,
            Tier::Premium => self.premium,
        }
    }
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            anonymous: QuotaLimit::Limited(10.0),
            free: QuotaLimit::Limited(30.0),
            premium: QuotaLimit::Unlimited,
        }
    }
}

/// Key of the daily counters: `user:{id}` or `ip:{addr}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuotaSubject(String);

impl QuotaSubject {
    pub fn user(user_id: i64) -> Self {
        Self(format!("user:{}", user_id))
    }

    pub fn ip(addr: IpAddr) -> Self {
        Self(format!("ip:{}", addr))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn from_stored(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for QuotaSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who is listening, as far as quota accounting is concerned.
#[derive(Debug, Clone, PartialEq)]
pub struct Caller {
    pub subject: QuotaSubject,
    pub tier: Tier,
    pub user_id: Option<i64>,
}

impl Caller {
    pub fn anonymous(addr: IpAddr) -> Self {
        Self {
            subject: QuotaSubject::ip(addr),
            tier: Tier::Anonymous,
            user_id: None,
        }
    }

    pub fn user(user_id: i64, tier: Tier) -> Self {
        Self {
            subject: QuotaSubject::user(user_id),
            tier,
            user_id: Some(user_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListeningSession {
    pub id: String,
    pub subject: QuotaSubject,
    pub user_id: Option<i64>,
    pub track_id: i64,
    pub started_at: i64,
    /// Furthest playback position accounted so far, in seconds.
    pub position_sec: f64,
    pub completed: bool,
    pub updated_at: i64,
}

/// Counters of one subject for one UTC day.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DailyUsage {
    pub minutes_listened: f64,
    pub tracks_started: u32,
    pub tracks_completed: u32,
}

/// Result of accounting one progress report.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub session: ListeningSession,
    pub minutes_added: f64,
    pub newly_completed: bool,
    pub usage: DailyUsage,
}

/// Quota as reported to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaStatus {
    pub has_quota: bool,
    pub tier: Tier,
    /// Minutes per day, `None` when unlimited.
    pub limit: Option<f64>,
    pub used: f64,
    pub remaining: Option<f64>,
    pub unlimited: bool,
    pub tracks_started: u32,
    pub tracks_completed: u32,
}

impl QuotaStatus {
    pub fn compute(tier: Tier, limit: QuotaLimit, usage: &DailyUsage) -> Self {
        let used = usage.minutes_listened.max(0.0);
        let (has_quota, remaining) = match limit {
            QuotaLimit::Unlimited => (true, None),
            QuotaLimit::Limited(limit) => {
                let remaining = (limit - used).max(0.0);
                (remaining > 0.0, Some(remaining))
            }
        };
        Self {
            has_quota,
            tier,
            limit: limit.minutes(),
            used,
            remaining,
            unlimited: limit == QuotaLimit::Unlimited,
            tracks_started: usage.tracks_started,
            tracks_completed: usage.tracks_completed,
        }
    }
}
