//! Tracker API client.
//!
//! This crate provides:
//! - [`TrackerClient`] — the remote operations the pipeline consumes
//! - [`HttpTrackerClient`] — the `reqwest` implementation against API v3
//! - [`RetryingClient`] / [`with_retry`] — the fixed-attempt retry wrapper
//! - `memory` (feature `test-support`) — an in-memory tracker for tests

mod http;
mod retry;

#[cfg(any(test, feature = "test-support"))]
pub mod memory;

use async_trait::async_trait;
use trackdocs_shared::{Attachment, Comment, Issue, Result};

pub use http::HttpTrackerClient;
pub use retry::{RetryingClient, with_retry};

/// Remote operations against the issue tracker.
///
/// Implementations are shared read-only between concurrent jobs, so every
/// method takes `&self`.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    /// Total number of issues visible to the caller.
    async fn count_issues(&self) -> Result<u64>;

    /// One page of issues (1-based `page`), with attachment references expanded.
    async fn list_issues(&self, page: u32, per_page: u32) -> Result<Vec<Issue>>;

    /// Comments of one issue, with attachment references expanded.
    ///
    /// `offset` is the id of the comment to continue after; `0` starts from
    /// the first comment.
    async fn list_comments(&self, issue_key: &str, offset: i64, per_page: u32)
    -> Result<Vec<Comment>>;

    /// Resolve an attachment reference into full metadata.
    async fn get_attachment(&self, issue_key: &str, attachment_id: &str) -> Result<Attachment>;

    /// Raw bytes of an attachment.
    async fn download_attachment(
        &self,
        issue_key: &str,
        attachment_id: &str,
        file_name: &str,
    ) -> Result<Vec<u8>>;
}

#[async_trait]
impl<T: TrackerClient + ?Sized> TrackerClient for std::sync::Arc<T> {
    async fn count_issues(&self) -> Result<u64> {
        (**self).count_issues().await
    }

    async fn list_issues(&self, page: u32, per_page: u32) -> Result<Vec<Issue>> {
        (**self).list_issues(page, per_page).await
    }

    async fn list_comments(
        &self,
        issue_key: &str,
        offset: i64,
        per_page: u32,
    ) -> Result<Vec<Comment>> {
        (**self).list_comments(issue_key, offset, per_page).await
    }

    async fn get_attachment(&self, issue_key: &str, attachment_id: &str) -> Result<Attachment> {
        (**self).get_attachment(issue_key, attachment_id).await
    }

    async fn download_attachment(
        &self,
        issue_key: &str,
        attachment_id: &str,
        file_name: &str,
    ) -> Result<Vec<u8>> {
        (**self)
            .download_attachment(issue_key, attachment_id, file_name)
            .await
    }
}
