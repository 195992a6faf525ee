//! Concrete background job implementations.

mod blocked_ip_cleanup;
mod stale_job_reaper;
mod uploaded_job_requeue;

pub use blocked_ip_cleanup::BlockedIpCleanupJob;
pub use stale_job_reaper::StaleJobReaperJob;
pub use uploaded_job_requeue::UploadedJobRequeueJob;
