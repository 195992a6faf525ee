//! Fails processing jobs whose run died with a previous process.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobSchedule},
};
use crate::ingestion::JobOrchestrator;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct StaleJobReaperJob {
    orchestrator: Arc<JobOrchestrator>,
    threshold: Duration,
    interval: Duration,
}

impl StaleJobReaperJob {
    pub fn new(orchestrator: Arc<JobOrchestrator>, threshold: Duration, interval: Duration) -> Self {
        Self {
            orchestrator,
            threshold,
            interval,
        }
    }
}

impl BackgroundJob for StaleJobReaperJob {
    fn id(&self) -> &'static str {
        "stale_job_reaper"
    }

    fn description(&self) -> &'static str {
        "Fail ingestion jobs stuck in processing"
    }

    fn schedule(&self) -> JobSchedule {
        // Startup run catches jobs orphaned by a crash
        JobSchedule::Combined {
            interval: self.interval,
            hooks: vec![HookEvent::OnStartup],
        }
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let failed = self
            .orchestrator
            .fail_stale_jobs(self.threshold)
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;

        if failed > 0 {
            info!("Failed {} stale ingestion jobs", failed);
        } else {
            debug!("No stale ingestion jobs");
        }
        Ok(())
    }
}
