//! Deletes expired IP blocks so the blocklist table doesn't grow forever.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule},
};
use crate::gateway::TokenAccessGateway;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct BlockedIpCleanupJob {
    gateway: Arc<TokenAccessGateway>,
    interval: Duration,
}

impl BlockedIpCleanupJob {
    pub fn new(gateway: Arc<TokenAccessGateway>, interval: Duration) -> Self {
        Self { gateway, interval }
    }
}

impl BackgroundJob for BlockedIpCleanupJob {
    fn id(&self) -> &'static str {
        "blocked_ip_cleanup"
    }

    fn description(&self) -> &'static str {
        "Delete expired IP blocks"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Interval(self.interval)
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let purged = self
            .gateway
            .purge_expired_blocks()
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;

        if purged > 0 {
            info!("Purged {} expired IP blocks", purged);
        } else {
            debug!("No expired IP blocks to purge");
        }
        Ok(())
    }
}
