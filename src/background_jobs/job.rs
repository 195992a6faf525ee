use super::context::JobContext;
use std::time::Duration;

/// Schedule for when a job should run.
#[derive(Debug, Clone)]
pub enum JobSchedule {
    /// Run at fixed intervals, first run one interval after startup
    Interval(Duration),
    /// Run only in response to hooks
    Hook(HookEvent),
    /// Combination of interval and hook-triggered
    Combined {
        interval: Duration,
        hooks: Vec<HookEvent>,
    },
}

impl JobSchedule {
    pub fn interval(&self) -> Option<Duration> {
        match self {
            JobSchedule::Interval(interval) => Some(*interval),
            JobSchedule::Combined { interval, .. } => Some(*interval),
            JobSchedule::Hook(_) => None,
        }
    }

    pub fn listens_to(&self, event: HookEvent) -> bool {
        match self {
            JobSchedule::Hook(hook) => *hook == event,
            JobSchedule::Combined { hooks, .. } => hooks.contains(&event),
            JobSchedule::Interval(_) => false,
        }
    }
}

/// Events that can trigger hook-based jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    OnStartup,
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookEvent::OnStartup => write!(f, "OnStartup"),
        }
    }
}

/// How a job should be handled during server shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownBehavior {
    /// Job can be cancelled immediately
    #[default]
    Cancellable,
    /// Wait for job to complete before shutdown
    WaitForCompletion,
}

/// Errors that can occur during job execution.
#[derive(Debug)]
pub enum JobError {
    ExecutionFailed(String),
    Cancelled,
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobError::ExecutionFailed(msg) => write!(f, "Execution failed: {}", msg),
            JobError::Cancelled => write!(f, "Job was cancelled"),
        }
    }
}

impl std::error::Error for JobError {}

/// Trait for background jobs.
///
/// Jobs are executed synchronously in a blocking context.
pub trait BackgroundJob: Send + Sync {
    /// Unique identifier for this job.
    fn id(&self) -> &'static str;

    /// Description of what this job does.
    fn description(&self) -> &'static str;

    /// When this job should be scheduled to run.
    fn schedule(&self) -> JobSchedule;

    /// How this job should be handled during shutdown.
    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::Cancellable
    }

    /// Execute the job.
    ///
    /// Called from `spawn_blocking`. Implementations should check
    /// `ctx.is_cancelled()` and return `JobError::Cancelled` early.
    fn execute(&self, ctx: &JobContext) -> Result<(), JobError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_helpers() {
        let interval = JobSchedule::Interval(Duration::from_secs(5));
        assert_eq!(interval.interval(), Some(Duration::from_secs(5)));
        assert!(!interval.listens_to(HookEvent::OnStartup));

        let combined = JobSchedule::Combined {
            interval: Duration::from_secs(10),
            hooks: vec![HookEvent::OnStartup],
        };
        assert_eq!(combined.interval(), Some(Duration::from_secs(10)));
        assert!(combined.listens_to(HookEvent::OnStartup));

        let hook = JobSchedule::Hook(HookEvent::OnStartup);
        assert_eq!(hook.interval(), None);
        assert!(hook.listens_to(HookEvent::OnStartup));
    }
}
