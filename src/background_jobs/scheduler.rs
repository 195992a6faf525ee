use super::context::JobContext;
use super::job::{BackgroundJob, HookEvent, JobError, ShutdownBehavior};
use crate::server::metrics;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Upper bound for one scheduler sleep.
const MAX_SLEEP: Duration = Duration::from_secs(60);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

struct RunningJob {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
    behavior: ShutdownBehavior,
}

/// Manages background job scheduling and execution.
pub struct JobScheduler {
    jobs: HashMap<&'static str, Arc<dyn BackgroundJob>>,
    /// Next due time of interval jobs.
    next_runs: HashMap<&'static str, Instant>,
    running: HashMap<&'static str, RunningJob>,
    /// Token to signal scheduler shutdown.
    shutdown_token: CancellationToken,
}

impl JobScheduler {
    pub fn new(shutdown_token: CancellationToken) -> Self {
        Self {
            jobs: HashMap::new(),
            next_runs: HashMap::new(),
            running: HashMap::new(),
            shutdown_token,
        }
    }

    /// Register a job with the scheduler.
    pub fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        let job_id = job.id();
        info!("Registering job: {} - {}", job_id, job.description());
        if let Some(interval) = job.schedule().interval() {
            self.next_runs.insert(job_id, Instant::now() + interval);
        }
        self.jobs.insert(job_id, job);
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Main scheduler loop. Returns once the shutdown token is cancelled
    /// and running jobs have been dealt with.
    pub async fn run(&mut self) {
        info!("Starting job scheduler with {} registered jobs", self.job_count());

        self.trigger_jobs_for_hook(HookEvent::OnStartup);

        loop {
            self.cleanup_completed_jobs().await;

            let sleep_duration = self.time_until_next_scheduled_job();
            debug!(
                "Scheduler sleeping for {:?} until next scheduled job",
                sleep_duration
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.run_due_jobs();
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("Job scheduler stopped");
    }

    fn time_until_next_scheduled_job(&self) -> Duration {
        let now = Instant::now();
        self.next_runs
            .iter()
            .filter(|(job_id, _)| !self.running.contains_key(*job_id))
            .map(|(_, next_run)| next_run.saturating_duration_since(now))
            .min()
            .unwrap_or(MAX_SLEEP)
            .min(MAX_SLEEP)
    }

    fn run_due_jobs(&mut self) {
        let now = Instant::now();
        let due: Vec<&'static str> = self
            .next_runs
            .iter()
            .filter(|(job_id, next_run)| **next_run <= now && !self.running.contains_key(*job_id))
            .map(|(job_id, _)| *job_id)
            .collect();

        for job_id in due {
            self.spawn_job(job_id, "schedule");
        }
    }

    fn trigger_jobs_for_hook(&mut self, event: HookEvent) {
        let triggered: Vec<&'static str> = self
            .jobs
            .iter()
            .filter(|(_, job)| job.schedule().listens_to(event))
            .map(|(job_id, _)| *job_id)
            .collect();

        for job_id in triggered {
            if self.running.contains_key(job_id) {
                debug!("Skipping hook trigger for already running job: {}", job_id);
                continue;
            }
            self.spawn_job(job_id, &format!("hook:{}", event));
        }
    }

    fn spawn_job(&mut self, job_id: &'static str, triggered_by: &str) {
        let Some(job) = self.jobs.get(job_id).cloned() else {
            error!("Attempted to spawn unknown job: {}", job_id);
            return;
        };
        info!("Starting job: {} (triggered_by: {})", job_id, triggered_by);

        // Next run counts from the start so a slow run doesn't drift the schedule
        if let Some(interval) = job.schedule().interval() {
            self.next_runs.insert(job_id, Instant::now() + interval);
        }

        let cancel = self.shutdown_token.child_token();
        let ctx = JobContext::new(cancel.clone());
        let behavior = job.shutdown_behavior();

        let handle = tokio::spawn(async move {
            let start_time = Instant::now();
            let result = tokio::task::spawn_blocking(move || job.execute(&ctx)).await;
            let elapsed = start_time.elapsed();

            let status_label = match result {
                Ok(Ok(())) => {
                    info!("Job {} completed successfully in {:?}", job_id, elapsed);
                    "success"
                }
                Ok(Err(JobError::Cancelled)) => {
                    info!("Job {} was cancelled after {:?}", job_id, elapsed);
                    "cancelled"
                }
                Ok(Err(e)) => {
                    error!("Job {} failed after {:?}: {}", job_id, elapsed, e);
                    "failed"
                }
                Err(e) => {
                    error!("Job {} panicked after {:?}: {}", job_id, elapsed, e);
                    "panic"
                }
            };
            metrics::record_background_job_run(job_id, status_label);
        });

        self.running.insert(
            job_id,
            RunningJob {
                handle,
                cancel,
                behavior,
            },
        );
    }

    async fn cleanup_completed_jobs(&mut self) {
        let finished: Vec<&'static str> = self
            .running
            .iter()
            .filter(|(_, running)| running.handle.is_finished())
            .map(|(job_id, _)| *job_id)
            .collect();

        for job_id in finished {
            if let Some(running) = self.running.remove(job_id) {
                let _ = running.handle.await;
            }
        }
    }

    /// Gracefully shut down the scheduler.
    async fn shutdown(&mut self) {
        info!("Shutting down scheduler...");

        for (job_id, running) in self.running.drain() {
            if running.behavior == ShutdownBehavior::Cancellable {
                debug!("Cancelling job: {}", job_id);
                running.cancel.cancel();
            } else {
                info!("Waiting for job {} to complete...", job_id);
            }
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, running.handle).await;
        }

        info!("Scheduler shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::job::JobSchedule;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingJob {
        runs: Arc<AtomicUsize>,
        schedule: JobSchedule,
    }

    impl BackgroundJob for CountingJob {
        fn id(&self) -> &'static str {
            "counting"
        }

        fn description(&self) -> &'static str {
            "Counts its runs"
        }

        fn schedule(&self) -> JobSchedule {
            self.schedule.clone()
        }

        fn execute(&self, _ctx: &JobContext) -> Result<(), JobError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_startup_hook_runs_job() {
        let runs = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let mut scheduler = JobScheduler::new(token.clone());
        scheduler.register_job(Arc::new(CountingJob {
            runs: runs.clone(),
            schedule: JobSchedule::Combined {
                interval: Duration::from_secs(3600),
                hooks: vec![HookEvent::OnStartup],
            },
        }));
        assert_eq!(scheduler.job_count(), 1);

        let task = tokio::spawn(async move { scheduler.run().await });
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();
        task.await.unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_interval_job_runs_repeatedly() {
        let runs = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let mut scheduler = JobScheduler::new(token.clone());
        scheduler.register_job(Arc::new(CountingJob {
            runs: runs.clone(),
            schedule: JobSchedule::Interval(Duration::from_millis(50)),
        }));

        let task = tokio::spawn(async move { scheduler.run().await });
        tokio::time::sleep(Duration::from_millis(400)).await;
        token.cancel();
        task.await.unwrap();

        assert!(runs.load(Ordering::SeqCst) >= 2);
    }
}
