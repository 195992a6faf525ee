//! In-process view of the IP blocklist.

use super::store::GatewayStore;
use anyhow::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;

struct Snapshot {
    /// Blocked address -> expiry (Unix millis), `None` for no expiry.
    entries: HashMap<String, Option<i64>>,
    loaded_at: Instant,
}

/// Blocklist cache refreshed from the store at most every `refresh_interval`.
///
/// Expiries are checked on every lookup, so an expired block stops applying
/// without waiting for a refresh.
pub struct BlocklistCache {
    store: Arc<dyn GatewayStore>,
    refresh_interval: Duration,
    snapshot: RwLock<Option<Snapshot>>,
}

impl BlocklistCache {
    pub fn new(store: Arc<dyn GatewayStore>, refresh_interval: Duration) -> Self {
        Self {
            store,
            refresh_interval,
            snapshot: RwLock::new(None),
        }
    }

    pub fn is_blocked(&self, ip: &str) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        {
            let snapshot = self.snapshot.read().unwrap();
            if let Some(snapshot) = snapshot.as_ref() {
                if snapshot.loaded_at.elapsed() < self.refresh_interval {
                    return Ok(Self::lookup(snapshot, ip, now));
                }
            }
        }

        let fresh = self.load()?;
        let blocked = Self::lookup(&fresh, ip, now);
        *self.snapshot.write().unwrap() = Some(fresh);
        Ok(blocked)
    }

    /// Drops the snapshot so the next lookup reads the store.
    pub fn invalidate(&self) {
        *self.snapshot.write().unwrap() = None;
    }

    fn lookup(snapshot: &Snapshot, ip: &str, now: i64) -> bool {
        match snapshot.entries.get(ip) {
            Some(Some(expires_at)) => *expires_at > now,
            Some(None) => true,
            None => false,
        }
    }

    fn load(&self) -> Result<Snapshot> {
        let now = Utc::now().timestamp_millis();
        let entries = self
            .store
            .list_active_blocks(now)?
            .into_iter()
            .map(|block| {
                let expiry = if block.is_permanent {
                    None
                } else {
                    block.expires_at
                };
                (block.ip_address, expiry)
            })
            .collect::<HashMap<_, _>>();
        debug!("Loaded {} blocked IPs", entries.len());
        Ok(Snapshot {
            entries,
            loaded_at: Instant::now(),
        })
    }
}
