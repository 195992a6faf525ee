use crate::quota::Tier;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Listener,
    Premium,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Listener => "listener",
            Role::Premium => "premium",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "listener" => Some(Role::Listener),
            "premium" => Some(Role::Premium),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn tier(&self) -> Tier {
        match self {
            Role::Listener => Tier::Free,
            Role::Premium | Role::Admin => Tier::Premium,
        }
    }
}

/// A caller resolved from credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub role: Role,
}

/// Access level a route demands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    Public,
    /// Identity is resolved when credentials are present, never required.
    OptionalAuth,
    Authenticated,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockedIp {
    pub ip_address: String,
    pub reason: Option<String>,
    pub blocked_at: i64,
    pub expires_at: Option<i64>,
    pub is_permanent: bool,
}

impl BlockedIp {
    pub fn is_active(&self, now: i64) -> bool {
        if self.is_permanent {
            return true;
        }
        match self.expires_at {
            Some(expires_at) => expires_at > now,
            None => true,
        }
    }
}
