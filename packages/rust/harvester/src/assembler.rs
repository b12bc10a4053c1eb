//! Detail assembly: turns one listed issue into a complete document tree.
//!
//! Work inside one issue is strictly sequential: comments first, then each
//! comment's attachments in reference order, then the issue's own
//! attachments. Parallelism only happens across issues, in the fan-out.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use trackdocs_client::TrackerClient;
use trackdocs_shared::{
    AttachmentDocument, AttachmentRef, CommentDocument, Issue, IssueDocument, Result,
    TrackDocsError,
};

use crate::filter::ContentFilter;

/// Builds [`IssueDocument`]s from listed issues.
///
/// Cheap to clone; every clone shares the same client and filter.
#[derive(Clone)]
pub struct IssueAssembler {
    client: Arc<dyn TrackerClient>,
    filter: Arc<ContentFilter>,
    comments_page_size: u32,
}

impl IssueAssembler {
    pub fn new(
        client: Arc<dyn TrackerClient>,
        filter: Arc<ContentFilter>,
        comments_page_size: u32,
    ) -> Self {
        Self {
            client,
            filter,
            comments_page_size,
        }
    }

    /// Fetch comments and attachments for `issue` and compose its document.
    ///
    /// Any remote error aborts the whole issue. Returns `Cancelled` as soon as
    /// `cancel` fires between two remote calls.
    #[instrument(skip_all, fields(issue = %issue.key))]
    pub async fn assemble(
        &self,
        issue: Issue,
        cancel: &CancellationToken,
    ) -> Result<IssueDocument> {
        checkpoint(cancel)?;
        let comments = self
            .client
            .list_comments(&issue.key, 0, self.comments_page_size)
            .await?;

        let mut comment_docs = Vec::with_capacity(comments.len());
        for comment in comments {
            let attachments = self
                .attachment_documents(&issue.key, &comment.attachments, cancel)
                .await?;
            comment_docs.push(CommentDocument {
                comment,
                attachments,
            });
        }

        let attachments = self
            .attachment_documents(&issue.key, &issue.attachments, cancel)
            .await?;

        debug!(
            comments = comment_docs.len(),
            attachments = attachments.len(),
            "issue assembled"
        );

        Ok(IssueDocument {
            issue,
            comments: comment_docs,
            attachments,
        })
    }

    async fn attachment_documents(
        &self,
        issue_key: &str,
        refs: &[AttachmentRef],
        cancel: &CancellationToken,
    ) -> Result<Vec<AttachmentDocument>> {
        let mut docs = Vec::new();
        for attachment_ref in refs {
            if let Some(doc) = self
                .fetch_attachment_document(issue_key, attachment_ref, cancel)
                .await?
            {
                docs.push(doc);
            }
        }
        Ok(docs)
    }

    /// Resolve one attachment reference.
    ///
    /// Metadata is always fetched; content only when the filter accepts the
    /// attachment's file name. `Ok(None)` means the attachment was filtered out.
    async fn fetch_attachment_document(
        &self,
        issue_key: &str,
        attachment_ref: &AttachmentRef,
        cancel: &CancellationToken,
    ) -> Result<Option<AttachmentDocument>> {
        checkpoint(cancel)?;
        let attachment = self
            .client
            .get_attachment(issue_key, &attachment_ref.id)
            .await?;

        if !self.filter.allows(&attachment.name) {
            debug!(
                attachment_id = %attachment.id,
                name = %attachment.name,
                "skipping non-text attachment"
            );
            return Ok(None);
        }

        checkpoint(cancel)?;
        let bytes = self
            .client
            .download_attachment(issue_key, &attachment.id, &attachment.name)
            .await?;
        let content = String::from_utf8_lossy(&bytes).into_owned();

        debug!(
            attachment_id = %attachment.id,
            name = %attachment.name,
            bytes = bytes.len(),
            "attachment fetched"
        );

        Ok(Some(AttachmentDocument {
            attachment,
            content,
        }))
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(TrackDocsError::Cancelled);
    }
    Ok(())
}
