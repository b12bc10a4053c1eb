//! Fixed-attempt retry for remote calls.
//!
//! The policy is deliberately blunt: a fixed number of attempts, no delay
//! between them, no jitter, and no inspection of status codes. A 404 is
//! re-issued exactly like a 503. Only decode failures stop early, since
//! re-sending the request cannot change how its payload decodes.

use std::future::Future;

use async_trait::async_trait;
use tracing::{debug, warn};

use trackdocs_shared::{Attachment, Comment, Issue, Result};

use crate::TrackerClient;

/// Run `operation` up to `attempts` times, returning the first success or the last error.
///
/// `attempts` below 1 is treated as 1.
pub async fn with_retry<T, F, Fut>(attempts: u32, what: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(what, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_retried() && attempt < attempts => {
                warn!(what, attempt, attempts, error = %e, "remote call failed, retrying");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Decorator applying [`with_retry`] to every operation of the wrapped client.
pub struct RetryingClient<C> {
    inner: C,
    attempts: u32,
}

impl<C: TrackerClient> RetryingClient<C> {
    pub fn new(inner: C, attempts: u32) -> Self {
        Self { inner, attempts }
    }
}

#[async_trait]
impl<C: TrackerClient> TrackerClient for RetryingClient<C> {
    async fn count_issues(&self) -> Result<u64> {
        with_retry(self.attempts, "count issues", || self.inner.count_issues()).await
    }

    async fn list_issues(&self, page: u32, per_page: u32) -> Result<Vec<Issue>> {
        with_retry(self.attempts, "list issues", || {
            self.inner.list_issues(page, per_page)
        })
        .await
    }

    async fn list_comments(
        &self,
        issue_key: &str,
        offset: i64,
        per_page: u32,
    ) -> Result<Vec<Comment>> {
        with_retry(self.attempts, "list comments", || {
            self.inner.list_comments(issue_key, offset, per_page)
        })
        .await
    }

    async fn get_attachment(&self, issue_key: &str, attachment_id: &str) -> Result<Attachment> {
        with_retry(self.attempts, "get attachment", || {
            self.inner.get_attachment(issue_key, attachment_id)
        })
        .await
    }

    async fn download_attachment(
        &self,
        issue_key: &str,
        attachment_id: &str,
        file_name: &str,
    ) -> Result<Vec<u8>> {
        with_retry(self.attempts, "download attachment", || {
            self.inner
                .download_attachment(issue_key, attachment_id, file_name)
        })
        .await
    }
}
