use crate::error::QueueError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::JobOutcome;

#[derive(Debug, Clone)]
pub struct JobFailure {
    pub job_id: String,
    pub message: String,
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.job_id, self.message)
    }
}

/// Outcome counts for every member of a batch
#[derive(Debug, Clone, Default)]
pub struct BatchStatus {
    pub total: usize,
    pub succeeded: usize,
    pub cancelled: usize,
    pub failures: Vec<JobFailure>,
}

impl BatchStatus {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Delivered once per batch, after every member has finished
#[derive(Debug)]
pub struct Completion<M> {
    pub batch_id: String,
    pub description: String,
    pub status: BatchStatus,
    pub meta: M,
}

/// A group of jobs with a single completion.
///
/// The pending counter starts at one for the open registration window;
/// every registered job adds one, and every finished job plus `seal` take
/// one away. Whoever drops it to zero takes `meta` and sends the
/// completion, so it fires exactly once and never before `seal`.
pub struct Batch<M> {
    inner: Arc<BatchInner<M>>,
}

impl<M> Clone for Batch<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct BatchInner<M> {
    id: String,
    description: String,
    pending: AtomicUsize,
    sealed: AtomicBool,
    status: Mutex<BatchStatus>,
    meta: Mutex<Option<M>>,
    completions: mpsc::UnboundedSender<Completion<M>>,
}

impl<M: Send + 'static> Batch<M> {
    pub(super) fn new(
        id: String,
        description: String,
        meta: M,
        completions: mpsc::UnboundedSender<Completion<M>>,
    ) -> Self {
        Self {
            inner: Arc::new(BatchInner {
                id,
                description,
                pending: AtomicUsize::new(1),
                sealed: AtomicBool::new(false),
                status: Mutex::new(BatchStatus::default()),
                meta: Mutex::new(Some(meta)),
                completions,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Snapshot of the counts so far
    pub fn status(&self) -> BatchStatus {
        self.lock_status().clone()
    }

    /// Close registration; the completion fires once all members finish
    pub fn seal(&self) {
        if self.inner.sealed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Sealed batch {}", self.inner.id);
        self.release();
    }

    pub(super) fn register(&self) -> Result<(), QueueError> {
        if self.inner.sealed.load(Ordering::Acquire) {
            return Err(QueueError::Sealed(self.inner.id.clone()));
        }
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        self.lock_status().total += 1;
        Ok(())
    }

    /// Count a job that never made it onto the queue
    pub fn record_enqueue_failure(&self, job_id: &str, message: String) {
        let mut status = self.lock_status();
        status.total += 1;
        status.failures.push(JobFailure {
            job_id: job_id.to_string(),
            message: format!("enqueue failed: {}", message),
        });
    }

    pub(super) fn finish(&self, job_id: &str, result: Result<JobOutcome, String>) {
        {
            let mut status = self.lock_status();
            match result {
                Ok(JobOutcome::Completed) => status.succeeded += 1,
                Ok(JobOutcome::Cancelled) => status.cancelled += 1,
                Err(message) => status.failures.push(JobFailure {
                    job_id: job_id.to_string(),
                    message,
                }),
            }
        }
        self.release();
    }

    fn release(&self) {
        if self.inner.pending.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        let meta = self
            .inner
            .meta
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(meta) = meta else {
            return;
        };

        let completion = Completion {
            batch_id: self.inner.id.clone(),
            description: self.inner.description.clone(),
            status: self.status(),
            meta,
        };
        if self.inner.completions.send(completion).is_err() {
            warn!(
                "Batch {} completed but nobody is listening for completions",
                self.inner.id
            );
        }
    }

    fn lock_status(&self) -> std::sync::MutexGuard<'_, BatchStatus> {
        self.inner
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
