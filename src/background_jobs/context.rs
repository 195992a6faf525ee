use tokio_util::sync::CancellationToken;

/// Context provided to jobs during execution.
///
/// Jobs own the services they work on; the context only carries the
/// cancellation token of the run.
#[derive(Clone)]
pub struct JobContext {
    /// Token to check for cancellation/shutdown requests.
    pub cancellation_token: CancellationToken,
}

impl JobContext {
    pub fn new(cancellation_token: CancellationToken) -> Self {
        Self { cancellation_token }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
