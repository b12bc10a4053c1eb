//! Core domain types: tracker records as fetched, and the document trees
//! assembled from them.
//!
//! Fetched records are never modified after decoding. Documents own the
//! records they were built from and only add structure around them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Current schema version for the index manifest format.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Decode an explicit `null` as the field's default value.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Reference types
// ---------------------------------------------------------------------------

/// A tracker user as embedded in records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "self", default, deserialize_with = "null_as_default")]
    pub self_url: String,
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub display: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passport_uid: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_uid: Option<String>,
}

/// Link to another tracker entity (status, type, priority, queue, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "self", default, deserialize_with = "null_as_default")]
    pub self_url: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub display: String,
}

/// Lightweight pointer to an attachment blob owned by the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRef {
    #[serde(rename = "self", default, deserialize_with = "null_as_default")]
    pub self_url: String,
    pub id: String,
    /// Display name, usually the file name.
    #[serde(default, deserialize_with = "null_as_default")]
    pub display: String,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// An issue as returned by the list operation.
///
/// Only the fields the pipeline reads are typed; everything else the tracker
/// returns is kept verbatim in `extra` and passed through to the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    #[serde(rename = "self", default, deserialize_with = "null_as_default")]
    pub self_url: String,
    /// Opaque tracker identifier.
    pub id: String,
    /// Stable, human-readable key (e.g. `QUEUE-42`).
    pub key: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub version: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EntityRef>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<EntityRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<EntityRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<EntityRef>,
    /// Tracker timestamp, e.g. `2017-07-18T13:33:44.291+0000`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<User>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Present when the listing was requested with `expand=attachments`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub attachments: Vec<AttachmentRef>,
    /// Remaining metadata, opaque to the pipeline.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A comment on an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(rename = "self", default, deserialize_with = "null_as_default")]
    pub self_url: String,
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attachments: Vec<AttachmentRef>,
}

/// Resolved attachment metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(rename = "self", default, deserialize_with = "null_as_default")]
    pub self_url: String,
    pub id: String,
    pub name: String,
    /// Download URL of the blob.
    #[serde(rename = "content", default, deserialize_with = "null_as_default")]
    pub content_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub mimetype: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub size: u64,
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// An attachment whose content was fetched and passed the content filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentDocument {
    pub attachment: Attachment,
    /// Decoded textual content.
    pub content: String,
}

/// A comment with the attachments that passed the filter, in reference order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentDocument {
    pub comment: Comment,
    pub attachments: Vec<AttachmentDocument>,
}

/// Self-contained document tree for one issue, ready for indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueDocument {
    pub issue: Issue,
    /// One entry per comment returned for the issue, in tracker order.
    pub comments: Vec<CommentDocument>,
    /// The issue's own attachments that passed the filter.
    pub attachments: Vec<AttachmentDocument>,
}

impl IssueDocument {
    /// The key the document is indexed under.
    pub fn key(&self) -> &str {
        &self.issue.key
    }
}

// ---------------------------------------------------------------------------
// Index manifest
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one harvest run (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One indexed document as listed in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedEntry {
    pub key: String,
    /// Path relative to the index directory.
    pub path: String,
    /// SHA-256 of the serialized document.
    pub sha256: String,
}

/// The `manifest.json` written at the root of a JSON directory index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexManifest {
    pub schema_version: u32,
    pub run_id: RunId,
    pub tool_version: String,
    pub created_at: DateTime<Utc>,
    pub document_count: usize,
    pub documents: Vec<IndexedEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ISSUE_JSON: &str = r#"{
        "self": "https://api.tracker.yandex.net/v3/issues/TEST-1",
        "id": "593cd211ef7e8a33",
        "key": "TEST-1",
        "version": 7,
        "summary": "Crash on start",
        "status": {"self": "s", "id": "1", "key": "open", "display": "Open"},
        "type": {"self": "t", "id": "2", "key": "bug", "display": "Bug"},
        "createdAt": "2017-07-18T13:33:44.291+0000",
        "votes": 3,
        "favorite": false,
        "attachments": [{"self": "a", "id": "4159", "display": "trace.log"}]
    }"#;

    #[test]
    fn issue_decodes_typed_and_opaque_fields() {
        let issue: Issue = serde_json::from_str(ISSUE_JSON).expect("decode issue");
        assert_eq!(issue.key, "TEST-1");
        assert_eq!(issue.issue_type.as_ref().map(|t| t.display.as_str()), Some("Bug"));
        assert_eq!(issue.attachments.len(), 1);
        assert_eq!(issue.extra.get("votes"), Some(&serde_json::json!(3)));
    }

    #[test]
    fn issue_passes_unknown_fields_through() {
        let issue: Issue = serde_json::from_str(ISSUE_JSON).expect("decode issue");
        let json = serde_json::to_value(&issue).expect("serialize");
        assert_eq!(json["votes"], 3);
        assert_eq!(json["type"]["key"], "bug");
        assert_eq!(json["createdAt"], "2017-07-18T13:33:44.291+0000");
    }

    #[test]
    fn comment_without_attachments_decodes() {
        let comment: Comment =
            serde_json::from_str(r#"{"self": "c", "id": 12, "text": "hello"}"#).expect("decode");
        assert_eq!(comment.id, 12);
        assert!(comment.attachments.is_empty());
    }

    #[test]
    fn explicit_nulls_decode_as_empty() {
        let comment: Comment =
            serde_json::from_str(r#"{"self": "c", "id": 1, "text": null, "attachments": null}"#)
                .expect("decode comment");
        assert_eq!(comment.text, "");
        assert!(comment.attachments.is_empty());

        let issue: Issue = serde_json::from_str(
            r#"{"self": null, "id": "1", "key": "Q-1", "version": null, "summary": null,
                "tags": null, "attachments": [{"self": "a", "id": "7", "display": null}]}"#,
        )
        .expect("decode issue");
        assert_eq!(issue.summary, "");
        assert_eq!(issue.version, 0);
        assert!(issue.tags.is_empty());
        assert_eq!(issue.attachments[0].display, "");
        assert!(issue.extra.is_empty());

        let attachment: Attachment = serde_json::from_str(
            r#"{"id": "7", "name": "a.txt", "content": null, "mimetype": null, "size": null}"#,
        )
        .expect("decode attachment");
        assert_eq!(attachment.content_url, "");
        assert_eq!(attachment.size, 0);
    }

    #[test]
    fn document_key_is_issue_key() {
        let issue: Issue = serde_json::from_str(ISSUE_JSON).expect("decode issue");
        let doc = IssueDocument {
            issue,
            comments: vec![],
            attachments: vec![],
        };
        assert_eq!(doc.key(), "TEST-1");
    }

    #[test]
    fn run_id_is_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }
}
