//! End-to-end harvest pipeline: count → list pages → assemble documents.
//!
//! Both stages run through a bounded [`FanOut`]; they run one after the
//! other, so the number of in-flight remote calls never exceeds the limit of
//! the stage currently running.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use trackdocs_client::{RetryingClient, TrackerClient};
use trackdocs_harvester::{ContentFilter, FanOut, IssueAssembler};
use trackdocs_shared::{HarvestConfig, Issue, IssueDocument, Result, TrackDocsError};

/// Result of a successful harvest.
#[derive(Debug)]
pub struct HarvestResult {
    /// One document per listed issue, in no particular order.
    pub documents: Vec<IssueDocument>,
    /// Issue count reported by the tracker before listing.
    pub issue_count: u64,
    /// Number of listing pages requested.
    pub page_count: u32,
    /// Total elapsed time.
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when a listing page has been collected.
    fn page_listed(&self, page: u32, issues: usize, current: usize, total: usize);
    /// Called when an issue document has been collected.
    fn issue_assembled(&self, key: &str, current: usize, total: usize);
    /// Called when a document has been handed to the index.
    fn issue_indexed(&self, key: &str, current: usize, total: usize);
    /// Called when the harvest completes.
    fn done(&self, result: &HarvestResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn page_listed(&self, _page: u32, _issues: usize, _current: usize, _total: usize) {}
    fn issue_assembled(&self, _key: &str, _current: usize, _total: usize) {}
    fn issue_indexed(&self, _key: &str, _current: usize, _total: usize) {}
    fn done(&self, _result: &HarvestResult) {}
}

/// Number of listing pages needed for `count` issues: `ceil(count / page_size)`.
pub fn page_count(count: u64, page_size: u32) -> Result<u32> {
    if page_size == 0 {
        return Err(TrackDocsError::validation("page size must be at least 1"));
    }
    let pages = count.div_ceil(u64::from(page_size));
    u32::try_from(pages).map_err(|_| {
        TrackDocsError::validation(format!(
            "{count} issues need {pages} pages of {page_size}, too many to list"
        ))
    })
}

/// Fetch every issue and assemble its document tree.
///
/// Every remote call goes through the retry wrapper. The first error that
/// survives retrying aborts the run; no partial collection is returned.
/// Cancelling `cancel` stops both stages and yields [`TrackDocsError::Cancelled`].
#[instrument(skip_all, fields(
    page_size = config.page_size,
    list_concurrency = config.list_concurrency,
    detail_concurrency = config.detail_concurrency,
))]
pub async fn harvest(
    client: Arc<dyn TrackerClient>,
    config: &HarvestConfig,
    filter: Arc<ContentFilter>,
    progress: &dyn ProgressReporter,
    cancel: &CancellationToken,
) -> Result<HarvestResult> {
    config.validate()?;
    let start = Instant::now();
    let client: Arc<dyn TrackerClient> =
        Arc::new(RetryingClient::new(client, config.retry_attempts));

    // --- Phase 1: Count ---
    progress.phase("Counting issues");
    if cancel.is_cancelled() {
        return Err(TrackDocsError::Cancelled);
    }
    let issue_count = client.count_issues().await?;
    let pages = page_count(issue_count, config.page_size)?;

    info!(issue_count, pages, "starting harvest");

    // --- Phase 2: List pages ---
    progress.phase("Listing issues");
    let issues = list_issues(&client, config, pages, progress, cancel).await?;

    if issues.len() as u64 != issue_count {
        warn!(
            expected = issue_count,
            listed = issues.len(),
            "listed issues disagree with reported count"
        );
    }

    // --- Phase 3: Assemble documents ---
    progress.phase("Assembling documents");
    let assembler = IssueAssembler::new(Arc::clone(&client), filter, config.comments_page_size);
    let documents =
        assemble_documents(assembler, config.detail_concurrency, issues, progress, cancel).await?;

    let result = HarvestResult {
        documents,
        issue_count,
        page_count: pages,
        elapsed: start.elapsed(),
    };

    progress.done(&result);

    info!(
        documents = result.documents.len(),
        pages = result.page_count,
        elapsed_ms = result.elapsed.as_millis(),
        "harvest complete"
    );

    Ok(result)
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Stage 1: one job per page, results concatenated in completion order.
async fn list_issues(
    client: &Arc<dyn TrackerClient>,
    config: &HarvestConfig,
    pages: u32,
    progress: &dyn ProgressReporter,
    cancel: &CancellationToken,
) -> Result<Vec<Issue>> {
    if pages == 0 {
        return Ok(Vec::new());
    }

    let stage = FanOut::new(config.list_concurrency, cancel.child_token());
    let page_size = config.page_size;
    let client = Arc::clone(client);
    let total = pages as usize;
    let mut collected = 0usize;

    let listed = stage
        .run_observed(
            (1..=pages).collect(),
            move |page: u32, cancel| {
                let client = Arc::clone(&client);
                async move {
                    if cancel.is_cancelled() {
                        return Err(TrackDocsError::Cancelled);
                    }
                    let issues = client.list_issues(page, page_size).await?;
                    debug!(page, issues = issues.len(), "page listed");
                    Ok((page, issues))
                }
            },
            |(page, issues): &(u32, Vec<Issue>)| {
                collected += 1;
                progress.page_listed(*page, issues.len(), collected, total);
            },
        )
        .await?;

    Ok(listed.into_iter().flat_map(|(_, issues)| issues).collect())
}

/// Stage 2: one sequential assembly job per issue.
async fn assemble_documents(
    assembler: IssueAssembler,
    concurrency: usize,
    issues: Vec<Issue>,
    progress: &dyn ProgressReporter,
    cancel: &CancellationToken,
) -> Result<Vec<IssueDocument>> {
    let stage = FanOut::new(concurrency, cancel.child_token());
    let total = issues.len();
    let mut collected = 0usize;

    stage
        .run_observed(
            issues,
            move |issue: Issue, cancel| {
                let assembler = assembler.clone();
                async move { assembler.assemble(issue, &cancel).await }
            },
            |document: &IssueDocument| {
                collected += 1;
                progress.issue_assembled(document.key(), collected, total);
            },
        )
        .await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    use trackdocs_client::memory::{FaultKind, MemoryTracker, Operation, comment};

    fn config(page_size: u32) -> HarvestConfig {
        HarvestConfig {
            page_size,
            ..HarvestConfig::default()
        }
    }

    /// `n` issues `Q-1..=Q-n`:
    /// - `Q-i` has `i % 3` comments with ids `100*i + c`;
    /// - every 4th issue has `notes.md` and `report.pdf` attached;
    /// - every 5th issue with comments has `trace.log` on its first comment.
    fn dataset(n: usize) -> MemoryTracker {
        let mut tracker = MemoryTracker::new().with_issues("Q", n);
        for i in 1..=n {
            let key = format!("Q-{i}");
            let base = 100 * i as i64;
            for c in 0..(i % 3) as i64 {
                tracker = tracker.with_comment(&key, comment(base + c, "text"));
            }
            if i % 4 == 0 {
                tracker = tracker
                    .with_issue_attachment(&key, &format!("{i}-md"), "notes.md", "# notes")
                    .with_issue_attachment(
                        &key,
                        &format!("{i}-pdf"),
                        "report.pdf",
                        b"%PDF".to_vec(),
                    );
            }
            if i % 5 == 0 && i % 3 != 0 {
                tracker = tracker.with_comment_attachment(
                    &key,
                    base,
                    &format!("{i}-log"),
                    "trace.log",
                    format!("log of {key}"),
                );
            }
        }
        tracker
    }

    async fn run(tracker: &Arc<MemoryTracker>, config: &HarvestConfig) -> Result<HarvestResult> {
        harvest(
            Arc::clone(tracker) as Arc<dyn TrackerClient>,
            config,
            Arc::new(ContentFilter::default()),
            &SilentProgress,
            &CancellationToken::new(),
        )
        .await
    }

    fn issue_number(key: &str) -> usize {
        key.trim_start_matches("Q-").parse().unwrap()
    }

    #[test]
    fn page_count_is_ceiling() {
        assert_eq!(page_count(0, 50).unwrap(), 0);
        assert_eq!(page_count(1, 50).unwrap(), 1);
        assert_eq!(page_count(100, 50).unwrap(), 2);
        assert_eq!(page_count(120, 50).unwrap(), 3);
        assert!(page_count(10, 0).is_err());
    }

    #[tokio::test]
    async fn lists_all_pages_and_assembles_every_issue() {
        let tracker = Arc::new(dataset(120));
        let result = run(&tracker, &config(50)).await.unwrap();

        assert_eq!(result.issue_count, 120);
        assert_eq!(result.page_count, 3);
        assert_eq!(result.documents.len(), 120);
        for page in ["1", "2", "3"] {
            assert_eq!(tracker.calls_for(Operation::ListIssues, page), 1);
        }
        assert_eq!(tracker.calls(Operation::ListIssues), 3);

        let keys: HashSet<_> = result.documents.iter().map(|d| d.key().to_string()).collect();
        let expected: HashSet<_> = (1..=120).map(|i| format!("Q-{i}")).collect();
        assert_eq!(keys, expected);
    }

    #[tokio::test]
    async fn every_comment_is_kept() {
        let tracker = Arc::new(dataset(30));
        let result = run(&tracker, &config(10)).await.unwrap();

        for doc in &result.documents {
            let i = issue_number(doc.key());
            assert_eq!(doc.comments.len(), i % 3, "{}", doc.key());
        }
    }

    #[tokio::test]
    async fn attachments_present_iff_text_like() {
        let tracker = Arc::new(dataset(30));
        let result = run(&tracker, &config(10)).await.unwrap();

        for doc in &result.documents {
            let i = issue_number(doc.key());
            if i % 4 == 0 {
                assert_eq!(doc.attachments.len(), 1, "{}", doc.key());
                assert_eq!(doc.attachments[0].attachment.name, "notes.md");
                assert_eq!(doc.attachments[0].content, "# notes");
            } else {
                assert!(doc.attachments.is_empty());
            }
            if i % 5 == 0 && i % 3 != 0 {
                assert_eq!(doc.comments[0].attachments[0].content, format!("log of Q-{i}"));
            }
        }
        // report.pdf metadata is resolved but its content is never fetched.
        assert_eq!(tracker.calls_for(Operation::DownloadAttachment, "4-pdf"), 0);
        assert_eq!(tracker.calls_for(Operation::GetAttachment, "4-pdf"), 1);
    }

    #[tokio::test]
    async fn repeated_runs_are_set_equal() {
        let tracker = Arc::new(dataset(45).with_latency(Duration::from_millis(1)));
        let mut first = run(&tracker, &config(10)).await.unwrap().documents;
        let mut second = run(&tracker, &config(10)).await.unwrap().documents;

        first.sort_by(|a, b| a.key().cmp(b.key()));
        second.sort_by(|a, b| a.key().cmp(b.key()));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn zero_issues_lists_nothing() {
        let tracker = Arc::new(MemoryTracker::new());
        let result = run(&tracker, &config(50)).await.unwrap();

        assert_eq!(result.page_count, 0);
        assert!(result.documents.is_empty());
        assert_eq!(tracker.calls(Operation::ListIssues), 0);
    }

    #[tokio::test]
    async fn one_failing_issue_fails_the_run() {
        let tracker = Arc::new(dataset(20).fail_with(
            Operation::GetAttachment,
            Some("8-md"),
            FaultKind::Status(404),
            None,
        ));
        let err = run(&tracker, &config(10)).await.unwrap_err();

        assert!(matches!(err, TrackDocsError::Api { status: 404, .. }));
        assert_eq!(tracker.calls_for(Operation::GetAttachment, "8-md"), 3);
    }

    #[tokio::test]
    async fn failing_page_is_attempted_exactly_retry_times() {
        let tracker = Arc::new(dataset(30).fail_always(Operation::ListIssues, Some("2")));
        let config = HarvestConfig {
            retry_attempts: 4,
            ..config(10)
        };
        let err = run(&tracker, &config).await.unwrap_err();

        assert!(matches!(err, TrackDocsError::Network(_)));
        assert_eq!(tracker.calls_for(Operation::ListIssues, "2"), 4);
        // Stage 2 never starts.
        assert_eq!(tracker.calls(Operation::ListComments), 0);
    }

    #[tokio::test]
    async fn transient_failures_are_absorbed() {
        let tracker = Arc::new(
            dataset(12)
                .fail_times(Operation::Count, None, 2)
                .fail_times(Operation::ListComments, Some("Q-5"), 2)
                .fail_times(Operation::DownloadAttachment, Some("4-md"), 1),
        );
        let result = run(&tracker, &config(5)).await.unwrap();

        assert_eq!(result.documents.len(), 12);
        assert_eq!(tracker.calls(Operation::Count), 3);
        assert_eq!(tracker.calls_for(Operation::ListComments, "Q-5"), 3);
    }

    #[tokio::test]
    async fn decode_failure_is_not_retried() {
        let tracker = Arc::new(
            dataset(5).fail_with(Operation::ListComments, Some("Q-3"), FaultKind::Decode, None),
        );
        let err = run(&tracker, &config(5)).await.unwrap_err();

        assert!(matches!(err, TrackDocsError::Decode { .. }));
        assert_eq!(tracker.calls_for(Operation::ListComments, "Q-3"), 1);
    }

    #[tokio::test]
    async fn in_flight_calls_stay_within_limits() {
        let tracker = Arc::new(dataset(40).with_latency(Duration::from_millis(3)));
        let limits = HarvestConfig {
            list_concurrency: 2,
            detail_concurrency: 4,
            ..config(5)
        };
        run(&tracker, &limits).await.unwrap();

        let peak = tracker.peak_in_flight();
        assert!(peak <= 4, "peak in flight {peak}");
        assert_eq!(tracker.peak_in_flight_for(Operation::ListIssues), 2);
        assert_eq!(tracker.peak_in_flight_for(Operation::ListComments), 4);

        // Swapped limits: each stage follows its own setting.
        let tracker = Arc::new(dataset(40).with_latency(Duration::from_millis(3)));
        let swapped = HarvestConfig {
            list_concurrency: 4,
            detail_concurrency: 1,
            ..config(5)
        };
        run(&tracker, &swapped).await.unwrap();

        assert_eq!(tracker.peak_in_flight_for(Operation::ListIssues), 4);
        assert_eq!(tracker.peak_in_flight_for(Operation::ListComments), 1);
        assert_eq!(tracker.peak_in_flight_for(Operation::DownloadAttachment), 1);
    }

    #[tokio::test]
    async fn count_mismatch_is_tolerated() {
        let tracker = Arc::new(dataset(5).with_reported_count(8));
        let result = run(&tracker, &config(5)).await.unwrap();

        assert_eq!(result.issue_count, 8);
        assert_eq!(result.page_count, 2);
        assert_eq!(result.documents.len(), 5);
    }

    #[tokio::test]
    async fn invalid_config_makes_no_calls() {
        let tracker = Arc::new(dataset(5));
        let err = run(&tracker, &config(0)).await.unwrap_err();

        assert!(matches!(err, TrackDocsError::Config { .. }));
        assert_eq!(tracker.calls(Operation::Count), 0);
    }

    #[tokio::test]
    async fn external_cancel_yields_cancelled() {
        let tracker = Arc::new(dataset(10));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = harvest(
            tracker.clone(),
            &config(5),
            Arc::new(ContentFilter::default()),
            &SilentProgress,
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, TrackDocsError::Cancelled));
        assert_eq!(tracker.calls(Operation::Count), 0);
    }

    #[tokio::test]
    async fn cancel_during_assembly_stops_the_run() {
        let tracker = Arc::new(dataset(40).with_latency(Duration::from_millis(20)));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(70)).await;
            trigger.cancel();
        });

        let err = harvest(
            tracker.clone(),
            &config(10),
            Arc::new(ContentFilter::default()),
            &SilentProgress,
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, TrackDocsError::Cancelled));
        assert!(tracker.calls(Operation::ListComments) < 40);
    }

    #[derive(Default)]
    struct RecordingProgress {
        events: Mutex<Vec<String>>,
    }

    impl RecordingProgress {
        fn count(&self, prefix: &str) -> usize {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.starts_with(prefix))
                .count()
        }
    }

    impl ProgressReporter for RecordingProgress {
        fn phase(&self, name: &str) {
            self.events.lock().unwrap().push(format!("phase {name}"));
        }
        fn page_listed(&self, page: u32, _issues: usize, _current: usize, _total: usize) {
            self.events.lock().unwrap().push(format!("page {page}"));
        }
        fn issue_assembled(&self, key: &str, _current: usize, _total: usize) {
            self.events.lock().unwrap().push(format!("issue {key}"));
        }
        fn issue_indexed(&self, key: &str, _current: usize, _total: usize) {
            self.events.lock().unwrap().push(format!("indexed {key}"));
        }
        fn done(&self, result: &HarvestResult) {
            self.events
                .lock()
                .unwrap()
                .push(format!("done {}", result.documents.len()));
        }
    }

    #[tokio::test]
    async fn progress_sees_every_page_and_issue() {
        let tracker = Arc::new(dataset(25));
        let progress = RecordingProgress::default();

        harvest(
            tracker.clone(),
            &config(10),
            Arc::new(ContentFilter::default()),
            &progress,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(progress.count("phase "), 3);
        assert_eq!(progress.count("page "), 3);
        assert_eq!(progress.count("issue "), 25);
        assert_eq!(progress.count("done 25"), 1);
    }
}
