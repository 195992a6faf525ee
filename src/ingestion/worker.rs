//! Bounded job queue served by a fixed pool of workers.

use super::orchestrator::JobOrchestrator;
use crate::error::ErrorKind;
use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Job queue is full, retry later")]
    Full,
    #[error("Job queue is closed")]
    Closed,
}

impl QueueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueueError::Full => ErrorKind::Unavailable,
            QueueError::Closed => ErrorKind::Internal,
        }
    }
}

/// Handle used to submit job ids for processing.
///
/// Never waits for room: a full queue is reported to the caller and the job
/// stays `uploaded` until it is submitted again.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<String>,
    queued: Arc<StdMutex<HashSet<String>>>,
}

impl JobQueue {
    pub(crate) fn new(sender: mpsc::Sender<String>) -> Self {
        Self {
            sender,
            queued: Arc::new(StdMutex::new(HashSet::new())),
        }
    }

    /// Submits `job_id`. A job already waiting in the queue is not added twice.
    pub fn enqueue(&self, job_id: &str) -> Result<(), QueueError> {
        let mut queued = self.queued.lock().unwrap();
        if queued.contains(job_id) {
            debug!("Job {} is already queued", job_id);
            return Ok(());
        }
        match self.sender.try_send(job_id.to_string()) {
            Ok(()) => {
                queued.insert(job_id.to_string());
                debug!("Enqueued job {}", job_id);
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(QueueError::Full),
            Err(TrySendError::Closed(_)) => Err(QueueError::Closed),
        }
    }

    pub fn is_queued(&self, job_id: &str) -> bool {
        self.queued.lock().unwrap().contains(job_id)
    }
}

pub struct WorkerPool {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(
        orchestrator: Arc<JobOrchestrator>,
        worker_count: usize,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (JobQueue, WorkerPool) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let queue = JobQueue::new(sender);

        let handles = (0..worker_count.max(1))
            .map(|worker| {
                let orchestrator = orchestrator.clone();
                let receiver = receiver.clone();
                let queued = queue.queued.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    worker_loop(worker, orchestrator, queued, receiver, cancel).await;
                })
            })
            .collect::<Vec<_>>();

        info!("Started {} ingestion workers", handles.len());
        (queue, WorkerPool { cancel, handles })
    }

    /// Cancels in-flight jobs and waits for every worker to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!("Ingestion worker panicked: {}", e);
            }
        }
        info!("Ingestion workers stopped");
    }
}

async fn worker_loop(
    worker: usize,
    orchestrator: Arc<JobOrchestrator>,
    queued: Arc<StdMutex<HashSet<String>>>,
    receiver: Arc<Mutex<mpsc::Receiver<String>>>,
    cancel: CancellationToken,
) {
    loop {
        let next = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => None,
                job_id = receiver.recv() => job_id,
            }
        };
        let Some(job_id) = next else {
            break;
        };

        queued.lock().unwrap().remove(&job_id);
        debug!("Worker {} picked up job {}", worker, job_id);
        match orchestrator.run(&job_id, cancel.child_token()).await {
            Ok(snapshot) => debug!("Worker {} finished job {} as {}", worker, job_id, snapshot.status),
            Err(e) => warn!("Worker {} could not run job {}: {}", worker, job_id, e),
        }
    }
    debug!("Worker {} exiting", worker);
}
