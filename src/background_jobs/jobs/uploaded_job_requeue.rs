//! Resubmits `uploaded` jobs that are missing from the in-memory run queue.
//!
//! The queue does not survive a restart, and a full queue turns uploads
//! away without running them. Either way the job stays `uploaded` in the
//! store and is picked up here.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobSchedule},
};
use crate::ingestion::{JobOrchestrator, JobQueue, QueueError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const MAX_JOBS_PER_PASS: usize = 1000;

pub struct UploadedJobRequeueJob {
    orchestrator: Arc<JobOrchestrator>,
    queue: JobQueue,
    interval: Duration,
}

impl UploadedJobRequeueJob {
    pub fn new(orchestrator: Arc<JobOrchestrator>, queue: JobQueue, interval: Duration) -> Self {
        Self {
            orchestrator,
            queue,
            interval,
        }
    }
}

impl BackgroundJob for UploadedJobRequeueJob {
    fn id(&self) -> &'static str {
        "uploaded_job_requeue"
    }

    fn description(&self) -> &'static str {
        "Resubmit uploaded jobs that are not in the run queue"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Combined {
            interval: self.interval,
            hooks: vec![HookEvent::OnStartup],
        }
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let waiting = self
            .orchestrator
            .awaiting_run(MAX_JOBS_PER_PASS)
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;

        let mut submitted = 0;
        for job_id in waiting.iter().filter(|id| !self.queue.is_queued(id)) {
            if ctx.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            match self.queue.enqueue(job_id) {
                Ok(()) => submitted += 1,
                Err(QueueError::Full) => {
                    debug!("Run queue is full, remaining uploaded jobs wait for the next pass");
                    break;
                }
                Err(e @ QueueError::Closed) => {
                    warn!("Could not resubmit job {}: {}", job_id, e);
                    return Err(JobError::ExecutionFailed(e.to_string()));
                }
            }
        }

        if submitted > 0 {
            info!("Resubmitted {} uploaded jobs", submitted);
        }
        Ok(())
    }
}
