//! Access gateway: caller identity, IP blocklist and route authorization.

mod cache;
mod models;
mod predicates;
mod routes;
mod schema;
mod store;

pub use cache::BlocklistCache;
pub use models::{BlockedIp, Identity, Role, RouteClass};
pub use predicates::{AccessDecision, AccessPredicate, DenyReason, RequestFacts};
pub use routes::RouteRules;
pub use schema::{GATEWAY_SCHEMA_SQL, GATEWAY_SCHEMA_VERSION};
pub use store::{generate_token, GatewayStore, SqliteGatewayStore};

use anyhow::Result;
use axum::http::Method;
use chrono::Utc;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// What the request pipeline needs from the gateway.
pub trait AccessGateway: Send + Sync {
    fn resolve_identity(&self, token: &str) -> Result<Option<Identity>>;

    fn is_ip_blocked(&self, ip: IpAddr) -> Result<bool>;

    fn classify(&self, method: &Method, path: &str) -> RouteClass;
}

/// Outcome of running a request through the gateway.
#[derive(Debug, Clone)]
pub struct Authorization {
    pub decision: AccessDecision,
    pub class: RouteClass,
    pub identity: Option<Identity>,
}

/// Blocklist first, then identity, then the route's predicate.
///
/// A blocked caller is rejected before its credentials are looked at.
pub fn authorize(
    gateway: &dyn AccessGateway,
    method: &Method,
    path: &str,
    ip: IpAddr,
    token: Option<&str>,
) -> Result<Authorization> {
    let class = gateway.classify(method, path);

    if gateway.is_ip_blocked(ip)? {
        return Ok(Authorization {
            decision: AccessDecision::Deny(DenyReason::IpBlocked),
            class,
            identity: None,
        });
    }

    let identity = match (class, token) {
        (RouteClass::Public, _) | (_, None) => None,
        (_, Some(token)) => gateway.resolve_identity(token)?,
    };
    let facts = RequestFacts {
        ip_blocked: false,
        identity,
    };
    let decision = AccessPredicate::for_route(class).evaluate(&facts);

    Ok(Authorization {
        decision,
        class,
        identity: facts.identity,
    })
}

/// Gateway backed by SQLite API tokens and blocklist.
pub struct TokenAccessGateway {
    store: Arc<dyn GatewayStore>,
    blocklist: BlocklistCache,
    rules: RouteRules,
}

impl TokenAccessGateway {
    pub fn new(store: Arc<dyn GatewayStore>, refresh_interval: Duration, rules: RouteRules) -> Self {
        Self {
            blocklist: BlocklistCache::new(store.clone(), refresh_interval),
            store,
            rules,
        }
    }

    pub fn block_ip(
        &self,
        ip: IpAddr,
        reason: Option<String>,
        duration: Option<Duration>,
        is_permanent: bool,
    ) -> Result<BlockedIp> {
        let now = Utc::now().timestamp_millis();
        let block = BlockedIp {
            ip_address: ip.to_string(),
            reason,
            blocked_at: now,
            expires_at: match (is_permanent, duration) {
                (false, Some(duration)) => Some(now + duration.as_millis() as i64),
                _ => None,
            },
            is_permanent,
        };
        self.store.block_ip(&block)?;
        self.blocklist.invalidate();
        info!("Blocked IP {} (permanent: {})", block.ip_address, is_permanent);
        Ok(block)
    }

    pub fn unblock_ip(&self, ip: IpAddr) -> Result<bool> {
        let removed = self.store.unblock_ip(&ip.to_string())?;
        self.blocklist.invalidate();
        if removed {
            info!("Unblocked IP {}", ip);
        }
        Ok(removed)
    }

    pub fn list_blocked(&self) -> Result<Vec<BlockedIp>> {
        self.store.list_active_blocks(Utc::now().timestamp_millis())
    }

    /// Deletes expired blocks. Returns how many went away.
    pub fn purge_expired_blocks(&self) -> Result<usize> {
        let purged = self
            .store
            .purge_expired_blocks(Utc::now().timestamp_millis())?;
        if purged > 0 {
            self.blocklist.invalidate();
        }
        Ok(purged)
    }
}

impl AccessGateway for TokenAccessGateway {
    fn resolve_identity(&self, token: &str) -> Result<Option<Identity>> {
        self.store.resolve_token(token, Utc::now().timestamp_millis())
    }

    fn is_ip_blocked(&self, ip: IpAddr) -> Result<bool> {
        self.blocklist.is_blocked(&ip.to_string())
    }

    fn classify(&self, method: &Method, path: &str) -> RouteClass {
        self.rules.classify(method, path)
    }
}
