//! In-process job substrate.
//!
//! Jobs run on the tokio runtime with bounded concurrency. Jobs are grouped
//! into [`Batch`]es; each batch delivers one [`Completion`] carrying its
//! typed metadata on the queue's completion channel once every member has
//! finished.

mod batch;
mod retry;

pub use batch::{Batch, Completion};
#[cfg(test)]
pub use batch::BatchStatus;
pub use retry::retry_with_backoff;

use crate::config::RetryConfig;
use crate::error::{QueueError, TaskError};
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::sleep;
use tracing::{debug, warn};
use uuid::Uuid;

/// Random 24 hex character identifier for jobs, batches and runs
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()[..24].to_string()
}

/// Ids end up in file names, so they must not name another directory
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && !id.contains("..")
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Skipped after observing a cancellation flag
    Cancelled,
}

#[async_trait]
pub trait Job: Send + Sync + 'static {
    fn id(&self) -> &str;

    async fn perform(&self) -> Result<JobOutcome, TaskError>;
}

pub struct JobQueue<M> {
    semaphore: Arc<Semaphore>,
    retry: RetryConfig,
    launch_delay: Duration,
    launched: AtomicUsize,
    closed: AtomicBool,
    completions: mpsc::UnboundedSender<Completion<M>>,
}

impl<M: Send + 'static> JobQueue<M> {
    pub fn new(
        concurrency: usize,
        retry: RetryConfig,
        launch_delay: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<Completion<M>>) {
        let (completions, rx) = mpsc::unbounded_channel();
        let queue = Self {
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            retry,
            launch_delay,
            launched: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            completions,
        };
        (queue, rx)
    }

    /// Open a new batch whose completion will carry `meta`
    pub fn batch(&self, description: impl Into<String>, meta: M) -> Batch<M> {
        Batch::new(
            new_id(),
            description.into(),
            meta,
            self.completions.clone(),
        )
    }

    /// Schedule `job` as a member of `batch`. Returns once the job is
    /// queued, not once it has run.
    pub async fn enqueue<J: Job>(&self, batch: &Batch<M>, job: J) -> Result<(), QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        batch.register()?;

        // Small delay between launches to avoid bursts against the store
        if self.launch_delay > Duration::ZERO && self.launched.fetch_add(1, Ordering::Relaxed) > 0
        {
            sleep(self.launch_delay).await;
        }

        let semaphore = self.semaphore.clone();
        let retry = self.retry.clone();
        let member = batch.clone();

        tokio::spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => perform_with_retry(&retry, &job).await,
                Err(e) => Err(format!("failed to acquire semaphore: {}", e)),
            };
            if let Err(ref message) = result {
                warn!("Job {} failed: {}", job.id(), message);
            }
            member.finish(job.id(), result);
        });

        debug!("Enqueued job into batch {}", batch.id());
        Ok(())
    }

    /// Refuse every further enqueue; jobs already queued still run
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

async fn perform_with_retry<J: Job>(retry: &RetryConfig, job: &J) -> Result<JobOutcome, String> {
    retry_with_backoff(retry, TaskError::is_retryable, || async move {
        AssertUnwindSafe(job.perform())
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(TaskError::Panicked(panic_message(panic))))
    })
    .await
    .map_err(|e| e.to_string())
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
