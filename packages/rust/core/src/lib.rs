//! Pipeline orchestration and indexing for trackdocs.
//!
//! This crate ties the tracker client and the harvester building blocks into
//! the end-to-end [`harvest`] run, and defines how assembled documents are
//! handed to an index.

pub mod index;
pub mod pipeline;

pub use index::{DocumentIndex, JsonDirIndex, index_documents, read_document, validate_index};
pub use pipeline::{HarvestResult, ProgressReporter, SilentProgress, harvest, page_count};
