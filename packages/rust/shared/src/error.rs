//! Error types for the blackboard.
//!
//! Library crates use [`BlackboardError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for all blackboard operations.
#[derive(Debug, thiserror::Error)]
pub enum BlackboardError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A plan, step, or other addressed record does not exist.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// Malformed input (duplicate step id, unresolved dependency, bad key segment).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Reading a source failed (unreachable URL, missing file, unsupported scheme).
    ///
    /// `transient` marks failures worth another attempt, such as dropped
    /// connections or 5xx/429 responses.
    #[error("fetch error for {identifier}: {message}")]
    Fetch {
        identifier: String,
        message: String,
        transient: bool,
    },

    /// Converting fetched bytes to Markdown failed.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// An operation did not finish within its deadline.
    #[error("{operation} timed out after {}ms", after.as_millis())]
    Timeout { operation: String, after: Duration },

    /// The backing store could not be reached (transient; retryable).
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Non-transient storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BlackboardError>;

impl BlackboardError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a not-found error describing the missing record.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create a permanent fetch error for a source identifier.
    pub fn fetch(identifier: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Fetch {
            identifier: identifier.into(),
            message: msg.into(),
            transient: false,
        }
    }

    /// Create a fetch error that a later attempt may not hit.
    pub fn fetch_transient(identifier: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Fetch {
            identifier: identifier.into(),
            message: msg.into(),
            transient: true,
        }
    }

    /// Create a timeout error for a named operation.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a caller may reasonably retry the operation later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::Timeout { .. } | Self::Fetch { transient: true, .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = BlackboardError::config("missing cache root");
        assert_eq!(err.to_string(), "config error: missing cache root");

        let err = BlackboardError::not_found("plan p1");
        assert_eq!(err.to_string(), "not found: plan p1");

        let err = BlackboardError::fetch("file:///tmp/x.md", "no such file");
        assert!(err.to_string().contains("file:///tmp/x.md"));

        let err = BlackboardError::timeout("fetch", Duration::from_millis(1500));
        assert_eq!(err.to_string(), "fetch timed out after 1500ms");
    }

    #[test]
    fn transient_classification() {
        assert!(BlackboardError::StoreUnavailable("busy".into()).is_transient());
        assert!(BlackboardError::timeout("get", Duration::from_secs(1)).is_transient());
        assert!(!BlackboardError::validation("bad").is_transient());
        assert!(!BlackboardError::Storage("corrupt".into()).is_transient());
        assert!(BlackboardError::fetch_transient("https://x", "reset").is_transient());
        assert!(!BlackboardError::fetch("https://x", "HTTP 404").is_transient());
    }
}
