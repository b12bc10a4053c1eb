//! Indexing collaborator contract and the bundled JSON directory index.
//!
//! The pipeline only hands documents over under their issue key; what an
//! index does with them is up to the implementation. [`JsonDirIndex`] writes
//! one file per document and a manifest:
//!
//! ```text
//! <root>/
//! ├── manifest.json
//! └── issues/
//!     ├── QUEUE-1.json
//!     └── QUEUE-2.json
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use trackdocs_shared::{
    CURRENT_SCHEMA_VERSION, IndexManifest, IndexedEntry, IssueDocument, Result, RunId,
    TrackDocsError,
};

use crate::pipeline::ProgressReporter;

const MANIFEST_FILE: &str = "manifest.json";
const ISSUES_DIR: &str = "issues";

/// Stores assembled documents under their issue key.
pub trait DocumentIndex: Send {
    /// Index one document. Indexing the same key again replaces it.
    fn index(&mut self, key: &str, document: &IssueDocument) -> Result<()>;
}

/// Hand every document to `index` under its issue key.
///
/// Stops at the first index error. Returns the number of documents indexed.
#[instrument(skip_all, fields(documents = documents.len()))]
pub fn index_documents(
    index: &mut dyn DocumentIndex,
    documents: &[IssueDocument],
    progress: &dyn ProgressReporter,
) -> Result<usize> {
    let total = documents.len();
    for (i, document) in documents.iter().enumerate() {
        index.index(document.key(), document)?;
        progress.issue_indexed(document.key(), i + 1, total);
    }
    info!(count = total, "documents indexed");
    Ok(total)
}

// ---------------------------------------------------------------------------
// JsonDirIndex
// ---------------------------------------------------------------------------

/// Writes each document to `<root>/issues/<KEY>.json` and a manifest on [`finish`](Self::finish).
#[derive(Debug)]
pub struct JsonDirIndex {
    root: PathBuf,
    run_id: RunId,
    tool_version: String,
    /// Keyed by file stem so that two keys mapping to the same file are caught.
    entries: BTreeMap<String, IndexedEntry>,
}

impl JsonDirIndex {
    /// Create (or reuse) the directory layout under `root`.
    pub fn create(root: impl Into<PathBuf>, tool_version: impl Into<String>) -> Result<Self> {
        let root = root.into();
        let issues = root.join(ISSUES_DIR);
        std::fs::create_dir_all(&issues).map_err(|e| TrackDocsError::io(&issues, e))?;
        debug!(path = %root.display(), "index directory ready");

        Ok(Self {
            root,
            run_id: RunId::new(),
            tool_version: tool_version.into(),
            entries: BTreeMap::new(),
        })
    }

    /// Write `manifest.json` and return it.
    #[instrument(skip_all, fields(path = %self.root.display(), run_id = %self.run_id))]
    pub fn finish(self) -> Result<IndexManifest> {
        let manifest = IndexManifest {
            schema_version: CURRENT_SCHEMA_VERSION,
            run_id: self.run_id,
            tool_version: self.tool_version,
            created_at: Utc::now(),
            document_count: self.entries.len(),
            documents: self.entries.into_values().collect(),
        };

        write_json_atomic(&self.root.join(MANIFEST_FILE), &manifest)?;
        info!(documents = manifest.document_count, "index manifest written");
        Ok(manifest)
    }
}

impl DocumentIndex for JsonDirIndex {
    fn index(&mut self, key: &str, document: &IssueDocument) -> Result<()> {
        let stem = sanitize_key(key);
        if let Some(existing) = self.entries.get(&stem) {
            if existing.key != key {
                return Err(TrackDocsError::Index(format!(
                    "keys {:?} and {key:?} map to the same file {stem}.json",
                    existing.key
                )));
            }
        }

        let relative = format!("{ISSUES_DIR}/{stem}.json");
        let sha256 = write_json_atomic(&self.root.join(&relative), document)?;
        debug!(key, path = %relative, "document indexed");

        self.entries.insert(
            stem,
            IndexedEntry {
                key: key.to_string(),
                path: relative,
                sha256,
            },
        );
        Ok(())
    }
}

/// Check that an index directory is complete and untampered.
pub fn validate_index(root: &Path) -> Result<IndexManifest> {
    let manifest_path = root.join(MANIFEST_FILE);
    if !manifest_path.exists() {
        return Err(TrackDocsError::validation("missing manifest.json"));
    }

    let content = std::fs::read_to_string(&manifest_path)
        .map_err(|e| TrackDocsError::io(&manifest_path, e))?;
    let manifest: IndexManifest = serde_json::from_str(&content)
        .map_err(|e| TrackDocsError::validation(format!("invalid manifest.json: {e}")))?;

    if manifest.schema_version != CURRENT_SCHEMA_VERSION {
        return Err(TrackDocsError::validation(format!(
            "unsupported schema_version: {} (expected {})",
            manifest.schema_version, CURRENT_SCHEMA_VERSION
        )));
    }
    if manifest.document_count != manifest.documents.len() {
        return Err(TrackDocsError::validation(format!(
            "manifest lists {} documents but claims {}",
            manifest.documents.len(),
            manifest.document_count
        )));
    }

    for entry in &manifest.documents {
        let path = root.join(&entry.path);
        let bytes = std::fs::read(&path).map_err(|e| TrackDocsError::io(&path, e))?;
        if sha256_hex(&bytes) != entry.sha256 {
            return Err(TrackDocsError::validation(format!(
                "checksum mismatch for {} ({})",
                entry.key, entry.path
            )));
        }
    }

    Ok(manifest)
}

/// Load one indexed document by issue key.
pub fn read_document(root: &Path, key: &str) -> Result<IssueDocument> {
    let path = root.join(ISSUES_DIR).join(format!("{}.json", sanitize_key(key)));
    let content = std::fs::read_to_string(&path).map_err(|e| TrackDocsError::io(&path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| TrackDocsError::Index(format!("{}: {e}", path.display())))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map an issue key to a safe file stem.
///
/// ASCII letters, digits, `-`, `_` and `.` are kept; everything else becomes
/// `_`. A leading `.` is prefixed so the result is never hidden or relative.
pub fn sanitize_key(key: &str) -> String {
    let mut stem: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() || stem.starts_with('.') {
        stem.insert(0, '_');
    }
    stem
}

/// Serialize `data` as pretty JSON, write it atomically, return its SHA-256.
fn write_json_atomic<T: serde::Serialize>(path: &Path, data: &T) -> Result<String> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| TrackDocsError::Index(format!("JSON serialization failed: {e}")))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{file_name}.tmp"));

    std::fs::write(&temp, &json).map_err(|e| TrackDocsError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| TrackDocsError::io(path, e))?;

    Ok(sha256_hex(json.as_bytes()))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SilentProgress;
    use trackdocs_client::memory::issue;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("trackdocs-index-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn doc(key: &str) -> IssueDocument {
        IssueDocument {
            issue: issue(key),
            comments: vec![],
            attachments: vec![],
        }
    }

    #[test]
    fn sanitize_keeps_plain_keys() {
        assert_eq!(sanitize_key("QUEUE-42"), "QUEUE-42");
        assert_eq!(sanitize_key("a_b.c"), "a_b.c");
    }

    #[test]
    fn sanitize_neutralises_paths() {
        assert_eq!(sanitize_key("../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_key("A/B"), "A_B");
        assert_eq!(sanitize_key(""), "_");
        assert_eq!(sanitize_key("ЗАДАЧА-1"), "______-1");
    }

    #[test]
    fn writes_documents_and_manifest() {
        let tmp = temp_dir();
        let mut index = JsonDirIndex::create(&tmp, "0.1.0-test").unwrap();

        let docs = vec![doc("TEST-2"), doc("TEST-1")];
        let n = index_documents(&mut index, &docs, &SilentProgress).unwrap();
        assert_eq!(n, 2);

        let manifest = index.finish().unwrap();
        assert_eq!(manifest.document_count, 2);
        assert_eq!(manifest.documents[0].key, "TEST-1");
        assert_eq!(manifest.documents[0].path, "issues/TEST-1.json");
        assert_eq!(manifest.documents[0].sha256.len(), 64);

        let back = read_document(&tmp, "TEST-2").unwrap();
        assert_eq!(back, docs[0]);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn reindexing_a_key_replaces_it() {
        let tmp = temp_dir();
        let mut index = JsonDirIndex::create(&tmp, "0.1.0-test").unwrap();

        let mut updated = doc("TEST-1");
        updated.issue.summary = "updated".into();
        index.index("TEST-1", &doc("TEST-1")).unwrap();
        index.index("TEST-1", &updated).unwrap();
        assert_eq!(index.entries.len(), 1);

        assert_eq!(index.finish().unwrap().document_count, 1);
        assert_eq!(read_document(&tmp, "TEST-1").unwrap().issue.summary, "updated");

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn colliding_keys_are_rejected() {
        let tmp = temp_dir();
        let mut index = JsonDirIndex::create(&tmp, "0.1.0-test").unwrap();

        index.index("A/B", &doc("A/B")).unwrap();
        let err = index.index("A_B", &doc("A_B")).unwrap_err();
        assert!(matches!(err, TrackDocsError::Index(_)));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn no_temp_files_left_behind() {
        let tmp = temp_dir();
        let mut index = JsonDirIndex::create(&tmp, "0.1.0-test").unwrap();
        index.index("TEST-1", &doc("TEST-1")).unwrap();
        index.finish().unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(tmp.join(ISSUES_DIR))
            .unwrap()
            .chain(std::fs::read_dir(&tmp).unwrap())
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn validate_accepts_fresh_index() {
        let tmp = temp_dir();
        let mut index = JsonDirIndex::create(&tmp, "0.1.0-test").unwrap();
        index.index("TEST-1", &doc("TEST-1")).unwrap();
        let written = index.finish().unwrap();

        let manifest = validate_index(&tmp).unwrap();
        assert_eq!(manifest.run_id, written.run_id);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn validate_detects_tampering() {
        let tmp = temp_dir();
        let mut index = JsonDirIndex::create(&tmp, "0.1.0-test").unwrap();
        index.index("TEST-1", &doc("TEST-1")).unwrap();
        index.finish().unwrap();

        std::fs::write(tmp.join("issues/TEST-1.json"), "{}").unwrap();
        let err = validate_index(&tmp).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn validate_missing_manifest() {
        let tmp = temp_dir();
        let err = validate_index(&tmp).unwrap_err();
        assert!(err.to_string().contains("missing manifest.json"));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    struct FailingIndex;

    impl DocumentIndex for FailingIndex {
        fn index(&mut self, key: &str, _document: &IssueDocument) -> Result<()> {
            Err(TrackDocsError::Index(format!("cannot index {key}")))
        }
    }

    #[test]
    fn index_documents_stops_on_first_error() {
        let docs = [doc("TEST-1"), doc("TEST-2")];
        let err = index_documents(&mut FailingIndex, &docs, &SilentProgress).unwrap_err();
        assert_eq!(err.to_string(), "index error: cannot index TEST-1");
    }
}
