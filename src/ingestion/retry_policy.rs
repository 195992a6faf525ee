//! Retry policy for transient pipeline step failures.
//!
//! A failed step is retried on its own, the pipeline doesn't restart.

use super::error::IngestionError;
use crate::config::IngestionSettings;
use crate::server::metrics;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff_secs: u64,
    /// Cap for the backoff growth.
    pub max_backoff_secs: u64,
    /// 1.0 gives linear (constant) backoff.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(settings: &IngestionSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_backoff_secs: settings.initial_backoff_secs,
            max_backoff_secs: settings.max_backoff_secs,
            backoff_multiplier: settings.backoff_multiplier,
        }
    }

    /// `initial_backoff * multiplier^retry_count`, capped at `max_backoff_secs`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let backoff = self.initial_backoff_secs as f64
            * self.backoff_multiplier.powi(retry_count as i32);
        Duration::from_secs_f64(backoff.min(self.max_backoff_secs as f64).max(0.0))
    }

    pub fn should_retry(&self, error: &IngestionError, retry_count: u32) -> bool {
        error.kind().is_transient() && retry_count < self.max_retries
    }

    /// Runs `op` until it succeeds, fails with a non-transient error, or the
    /// retry budget is spent. Cancellation interrupts both the attempt and
    /// the backoff sleep.
    pub async fn run<T, E, F, Fut>(
        &self,
        step: &'static str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, IngestionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<IngestionError>,
    {
        let mut retry_count = 0;
        loop {
            let started = Instant::now();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(IngestionError::Cancelled),
                result = op() => result,
            };
            metrics::record_step_duration(step, started.elapsed());

            let error: IngestionError = match result {
                Ok(value) => return Ok(value),
                Err(e) => e.into(),
            };
            if !self.should_retry(&error, retry_count) {
                return Err(error);
            }

            let delay = self.backoff(retry_count);
            retry_count += 1;
            metrics::record_step_retry(step);
            warn!(
                "Step {} failed (retry {}/{} in {:?}): {}",
                step, retry_count, self.max_retries, delay, error
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(IngestionError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_secs: 60,
            max_backoff_secs: 60,
            backoff_multiplier: 1.0,
        }
    }
}
