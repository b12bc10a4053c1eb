//! In-memory [`TrackerClient`] for tests.
//!
//! Serves a fixed set of issues, comments and attachments, counts every call,
//! records the in-flight high-water mark, and can inject failures per
//! operation and target.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use trackdocs_shared::{Attachment, AttachmentRef, Comment, Issue, Result, TrackDocsError};

use crate::TrackerClient;

/// Remote operations, as seen by call counting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Count,
    ListIssues,
    ListComments,
    GetAttachment,
    DownloadAttachment,
}

/// Error produced by an injected fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Network,
    Status(u16),
    Decode,
}

#[derive(Debug)]
struct Fault {
    op: Operation,
    /// Page number, issue key or attachment id. `None` matches any target.
    target: Option<String>,
    kind: FaultKind,
    /// `None` fails forever.
    remaining: Option<u32>,
}

#[derive(Default)]
pub struct MemoryTracker {
    issues: Vec<Issue>,
    comments: HashMap<String, Vec<Comment>>,
    attachments: HashMap<String, (Attachment, Vec<u8>)>,
    reported_count: Option<u64>,
    latency: Option<Duration>,
    faults: Mutex<Vec<Fault>>,
    calls: Mutex<HashMap<(Operation, String), u32>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    /// Per operation: (in flight, peak).
    op_in_flight: Mutex<HashMap<Operation, (usize, usize)>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct InFlight<'a> {
    tracker: &'a MemoryTracker,
    op: Operation,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.tracker.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some((now, _)) = lock(&self.tracker.op_in_flight).get_mut(&self.op) {
            *now -= 1;
        }
    }
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    // -- fixtures -----------------------------------------------------------

    pub fn with_issue(mut self, issue: Issue) -> Self {
        self.issues.push(issue);
        self
    }

    /// Add `n` bare issues keyed `{prefix}-1` .. `{prefix}-n`.
    pub fn with_issues(mut self, prefix: &str, n: usize) -> Self {
        self.issues
            .extend((1..=n).map(|i| issue(&format!("{prefix}-{i}"))));
        self
    }

    pub fn with_comment(mut self, issue_key: &str, comment: Comment) -> Self {
        self.comments
            .entry(issue_key.to_string())
            .or_default()
            .push(comment);
        self
    }

    /// Register attachment metadata and content without referencing it anywhere.
    pub fn with_attachment(mut self, attachment: Attachment, content: impl Into<Vec<u8>>) -> Self {
        self.attachments
            .insert(attachment.id.clone(), (attachment, content.into()));
        self
    }

    /// Register an attachment and reference it from an already added issue.
    pub fn with_issue_attachment(
        mut self,
        issue_key: &str,
        id: &str,
        name: &str,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        if let Some(issue) = self.issues.iter_mut().find(|i| i.key == issue_key) {
            issue.attachments.push(attachment_ref(id, name));
        }
        self.with_attachment(attachment(id, name), content)
    }

    /// Register an attachment and reference it from an already added comment.
    pub fn with_comment_attachment(
        mut self,
        issue_key: &str,
        comment_id: i64,
        id: &str,
        name: &str,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        if let Some(comment) = self
            .comments
            .get_mut(issue_key)
            .and_then(|cs| cs.iter_mut().find(|c| c.id == comment_id))
        {
            comment.attachments.push(attachment_ref(id, name));
        }
        self.with_attachment(attachment(id, name), content)
    }

    /// Make the count operation report `count` regardless of the stored issues.
    pub fn with_reported_count(mut self, count: u64) -> Self {
        self.reported_count = Some(count);
        self
    }

    /// Delay every call, so that concurrent calls overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    // -- fault injection ----------------------------------------------------

    /// Fail the first `times` matching calls with a network error.
    pub fn fail_times(self, op: Operation, target: Option<&str>, times: u32) -> Self {
        self.fail_with(op, target, FaultKind::Network, Some(times))
    }

    /// Fail every matching call with a network error.
    pub fn fail_always(self, op: Operation, target: Option<&str>) -> Self {
        self.fail_with(op, target, FaultKind::Network, None)
    }

    pub fn fail_with(
        mut self,
        op: Operation,
        target: Option<&str>,
        kind: FaultKind,
        times: Option<u32>,
    ) -> Self {
        self.faults
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Fault {
                op,
                target: target.map(str::to_string),
                kind,
                remaining: times,
            });
        self
    }

    // -- observation --------------------------------------------------------

    /// Calls made to `op`, across all targets.
    pub fn calls(&self, op: Operation) -> u32 {
        lock(&self.calls)
            .iter()
            .filter(|((o, _), _)| *o == op)
            .map(|(_, n)| *n)
            .sum()
    }

    /// Calls made to `op` for one target.
    pub fn calls_for(&self, op: Operation, target: &str) -> u32 {
        lock(&self.calls)
            .get(&(op, target.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of calls that were in progress at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Highest number of calls of one operation in progress at the same time.
    pub fn peak_in_flight_for(&self, op: Operation) -> usize {
        lock(&self.op_in_flight).get(&op).map_or(0, |&(_, peak)| peak)
    }

    async fn enter(&self, op: Operation, target: &str) -> Result<InFlight<'_>> {
        *lock(&self.calls).entry((op, target.to_string())).or_default() += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        {
            let mut per_op = lock(&self.op_in_flight);
            let (now, peak) = per_op.entry(op).or_default();
            *now += 1;
            *peak = (*peak).max(*now);
        }
        let guard = InFlight { tracker: self, op };

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match self.take_fault(op, target) {
            Some(kind) => Err(fault_error(kind, op, target)),
            None => Ok(guard),
        }
    }

    fn take_fault(&self, op: Operation, target: &str) -> Option<FaultKind> {
        let mut faults = lock(&self.faults);
        let fault = faults.iter_mut().find(|f| {
            f.op == op
                && f.target.as_deref().is_none_or(|t| t == target)
                && f.remaining != Some(0)
        })?;
        if let Some(n) = fault.remaining.as_mut() {
            *n -= 1;
        }
        Some(fault.kind)
    }
}

fn fault_error(kind: FaultKind, op: Operation, target: &str) -> TrackDocsError {
    let message = format!("injected {op:?} failure for {target}");
    match kind {
        FaultKind::Network => TrackDocsError::Network(message),
        FaultKind::Status(status) => TrackDocsError::Api {
            status,
            body: message,
        },
        FaultKind::Decode => TrackDocsError::decode(message),
    }
}

fn not_found(what: &str) -> TrackDocsError {
    TrackDocsError::Api {
        status: 404,
        body: format!("{what} not found"),
    }
}

#[async_trait]
impl TrackerClient for MemoryTracker {
    async fn count_issues(&self) -> Result<u64> {
        let _guard = self.enter(Operation::Count, "").await?;
        Ok(self.reported_count.unwrap_or(self.issues.len() as u64))
    }

    async fn list_issues(&self, page: u32, per_page: u32) -> Result<Vec<Issue>> {
        let _guard = self.enter(Operation::ListIssues, &page.to_string()).await?;
        let start = (page.saturating_sub(1) as usize).saturating_mul(per_page as usize);
        Ok(self
            .issues
            .iter()
            .skip(start)
            .take(per_page as usize)
            .cloned()
            .collect())
    }

    async fn list_comments(
        &self,
        issue_key: &str,
        offset: i64,
        per_page: u32,
    ) -> Result<Vec<Comment>> {
        let _guard = self.enter(Operation::ListComments, issue_key).await?;
        Ok(self
            .comments
            .get(issue_key)
            .map(|cs| {
                cs.iter()
                    .filter(|c| offset == 0 || c.id > offset)
                    .take(per_page as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_attachment(&self, _issue_key: &str, attachment_id: &str) -> Result<Attachment> {
        let _guard = self.enter(Operation::GetAttachment, attachment_id).await?;
        self.attachments
            .get(attachment_id)
            .map(|(a, _)| a.clone())
            .ok_or_else(|| not_found(&format!("attachment {attachment_id}")))
    }

    async fn download_attachment(
        &self,
        _issue_key: &str,
        attachment_id: &str,
        _file_name: &str,
    ) -> Result<Vec<u8>> {
        let _guard = self
            .enter(Operation::DownloadAttachment, attachment_id)
            .await?;
        self.attachments
            .get(attachment_id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| not_found(&format!("attachment {attachment_id} content")))
    }
}

// ---------------------------------------------------------------------------
// Record fixtures
// ---------------------------------------------------------------------------

pub fn issue(key: &str) -> Issue {
    Issue {
        self_url: format!("memory://issues/{key}"),
        id: format!("id-{key}"),
        key: key.to_string(),
        version: 1,
        summary: format!("Summary of {key}"),
        description: None,
        status: None,
        issue_type: None,
        priority: None,
        queue: None,
        created_at: None,
        updated_at: None,
        created_by: None,
        assignee: None,
        tags: Vec::new(),
        attachments: Vec::new(),
        extra: serde_json::Map::new(),
    }
}

pub fn comment(id: i64, text: &str) -> Comment {
    Comment {
        self_url: format!("memory://comments/{id}"),
        id,
        long_id: None,
        text: text.to_string(),
        created_by: None,
        created_at: None,
        updated_at: None,
        attachments: Vec::new(),
    }
}

pub fn attachment_ref(id: &str, display: &str) -> AttachmentRef {
    AttachmentRef {
        self_url: format!("memory://attachments/{id}"),
        id: id.to_string(),
        display: display.to_string(),
    }
}

pub fn attachment(id: &str, name: &str) -> Attachment {
    Attachment {
        self_url: format!("memory://attachments/{id}"),
        id: id.to_string(),
        name: name.to_string(),
        content_url: format!("memory://attachments/{id}/{name}"),
        thumbnail: None,
        created_by: None,
        created_at: None,
        mimetype: String::new(),
        size: 0,
    }
}
