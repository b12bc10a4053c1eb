//! Shared types, error model, and configuration for trackdocs.
//!
//! This crate is the foundation depended on by all other trackdocs crates.
//! It provides:
//! - [`TrackDocsError`] — the unified error type
//! - Domain types ([`Issue`], [`Comment`], [`Attachment`], and the document trees)
//! - Configuration ([`AppConfig`], [`HarvestConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, Credentials, FilterConfig, HarvestConfig, HarvestSection, MAX_PER_PAGE, OrgKind,
    OutputConfig, TrackerConfig, base_url, config_dir, config_file_path, init_config,
    load_config, load_config_from, resolve_credentials,
};
pub use error::{Result, TrackDocsError};
pub use types::{
    Attachment, AttachmentDocument, AttachmentRef, CURRENT_SCHEMA_VERSION, Comment,
    CommentDocument, EntityRef, IndexManifest, IndexedEntry, Issue, IssueDocument, RunId, User,
};
