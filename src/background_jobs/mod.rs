//! Background job scheduling and execution system.
//!
//! Runs periodic and startup-triggered maintenance such as purging expired
//! IP blocks and failing ingestion jobs orphaned by a crash.

mod context;
mod job;
pub mod jobs;
mod scheduler;

pub use context::JobContext;
pub use job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior};
pub use scheduler::JobScheduler;
