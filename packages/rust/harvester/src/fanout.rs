//! Bounded fan-out executor.
//!
//! Runs a batch of independent jobs with at most `limit` in flight, collects
//! exactly one result per job, and fails fast: the first error cancels the
//! stage token so outstanding jobs can stop early, the executor keeps draining
//! until every job has reported, and only then returns that first error.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use trackdocs_shared::{Result, TrackDocsError};

/// Executes jobs concurrently under a fixed concurrency limit.
#[derive(Debug, Clone)]
pub struct FanOut {
    limit: usize,
    cancel: CancellationToken,
}

impl FanOut {
    /// `limit` below 1 is treated as 1. `cancel` is the stage token handed
    /// to every job; it is cancelled when any job fails.
    pub fn new(limit: usize, cancel: CancellationToken) -> Self {
        Self {
            limit: limit.max(1),
            cancel,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run every job and return all results, in completion order.
    pub async fn run<J, T, F, Fut>(&self, jobs: Vec<J>, job_fn: F) -> Result<Vec<T>>
    where
        J: Send + 'static,
        T: Send + 'static,
        F: Fn(J, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.run_observed(jobs, job_fn, |_| {}).await
    }

    /// Like [`run`](Self::run), calling `on_result` for each successful
    /// result as it is collected.
    pub async fn run_observed<J, T, F, Fut, O>(
        &self,
        jobs: Vec<J>,
        job_fn: F,
        mut on_result: O,
    ) -> Result<Vec<T>>
    where
        J: Send + 'static,
        T: Send + 'static,
        F: Fn(J, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        O: FnMut(&T),
    {
        let total = jobs.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let semaphore = Arc::new(Semaphore::new(self.limit));
        // Room for every result, so no job ever blocks on delivery.
        let (tx, mut rx) = mpsc::channel::<Result<T>>(total);
        let job_fn = Arc::new(job_fn);

        for job in jobs {
            let semaphore = Arc::clone(&semaphore);
            let job_fn = Arc::clone(&job_fn);
            let cancel = self.cancel.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) if cancel.is_cancelled() => Err(TrackDocsError::Cancelled),
                    Ok(_permit) => AssertUnwindSafe(async move { (*job_fn)(job, cancel).await })
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|payload| {
                            Err(TrackDocsError::Task(panic_message(payload)))
                        }),
                    Err(_) => Err(TrackDocsError::Task("job semaphore closed".into())),
                };
                // Capacity equals the job count, so this only fails if the
                // collector is gone.
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let mut results = Vec::with_capacity(total);
        let mut first_error: Option<TrackDocsError> = None;
        let mut received = 0usize;

        while let Some(result) = rx.recv().await {
            received += 1;
            match result {
                Ok(value) => {
                    if first_error.is_none() {
                        on_result(&value);
                    }
                    results.push(value);
                }
                Err(e) if first_error.is_none() => {
                    warn!(error = %e, received, total, "job failed, cancelling stage");
                    self.cancel.cancel();
                    first_error = Some(e);
                }
                Err(e) => debug!(error = %e, "further job error after stage abort"),
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        if received != total {
            return Err(TrackDocsError::Task(format!(
                "{} of {total} jobs never reported",
                total - received
            )));
        }
        Ok(results)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("job panicked: {detail}")
}
