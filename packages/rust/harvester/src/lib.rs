//! Concurrent fetch-and-assemble building blocks.
//!
//! This crate provides:
//! - [`filter`] — the attachment content filter (text-like extension allow-list)
//! - [`fanout`] — bounded, fail-fast fan-out executor
//! - [`assembler`] — per-issue detail fetch producing document trees

pub mod assembler;
pub mod fanout;
pub mod filter;

pub use assembler::IssueAssembler;
pub use fanout::FanOut;
pub use filter::{ContentFilter, is_text_like};
