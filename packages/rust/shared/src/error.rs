//! Error types for trackdocs.
//!
//! Library crates use [`TrackDocsError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all trackdocs operations.
#[derive(Debug, thiserror::Error)]
pub enum TrackDocsError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport-level failure talking to the tracker (connect, timeout, body read).
    #[error("network error: {0}")]
    Network(String),

    /// The tracker answered with a non-2xx status.
    #[error("tracker API error {status}: {body}")]
    Api { status: u16, body: String },

    /// Response payload does not match the expected shape.
    #[error("decode error: {message}")]
    Decode { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad parameters, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The indexing collaborator rejected a document.
    #[error("index error: {0}")]
    Index(String),

    /// A job stopped because its stage was aborted or the run was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// A fan-out job panicked or could not be joined.
    #[error("task failed: {0}")]
    Task(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TrackDocsError>;

impl TrackDocsError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a decode error from any displayable message.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the retry wrapper re-issues the request after this error.
    ///
    /// Every remote failure is retried the same way, permanent statuses such
    /// as 404 included. Decode failures are not: re-sending the request does
    /// not change how the payload is decoded.
    pub fn is_retried(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Api { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = TrackDocsError::config("missing token");
        assert_eq!(err.to_string(), "config error: missing token");

        let err = TrackDocsError::Api {
            status: 404,
            body: "issue not found".into(),
        };
        assert_eq!(err.to_string(), "tracker API error 404: issue not found");
    }

    #[test]
    fn remote_failures_are_retried_regardless_of_status() {
        assert!(TrackDocsError::Network("connection reset".into()).is_retried());
        assert!(TrackDocsError::Api { status: 503, body: String::new() }.is_retried());
        assert!(TrackDocsError::Api { status: 404, body: String::new() }.is_retried());
    }

    #[test]
    fn decode_and_local_failures_are_not_retried() {
        assert!(!TrackDocsError::decode("expected array").is_retried());
        assert!(!TrackDocsError::Cancelled.is_retried());
        assert!(!TrackDocsError::validation("bad page size").is_retried());
        assert!(!TrackDocsError::Task("job panicked".into()).is_retried());
    }
}
