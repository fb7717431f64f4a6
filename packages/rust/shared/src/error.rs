//! Error types for the EPPN coordination core.
//!
//! Library crates use [`EppnError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all coordination operations.
#[derive(Debug, thiserror::Error)]
pub enum EppnError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Malformed message rejected at the catalog boundary.
    #[error("validation error: field `{field}` expected {expected}, found {found}")]
    Validation {
        field: String,
        expected: String,
        found: String,
    },

    /// Durable store unreadable or unwritable. The operation was aborted
    /// and nothing was written.
    #[error("persistence error at {path:?}: {message}")]
    Persistence { path: PathBuf, message: String },

    /// No destinations configured for a message kind.
    #[error("routing miss: no destinations for `{kind}`")]
    RoutingMiss { kind: String },

    /// The delivery substrate refused or timed out a send.
    #[error("delivery to `{destination}` failed: {message}")]
    Delivery {
        destination: String,
        message: String,
    },

    /// A participant received a message kind it does not handle.
    #[error("participant `{participant}` does not accept `{kind}`")]
    Unsupported { participant: String, kind: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, EppnError>;

impl EppnError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error naming the field, the expected shape and
    /// what was actually found.
    pub fn validation(
        field: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::Validation {
            field: field.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create a persistence error for the store at `path`.
    pub fn persistence(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Persistence {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a delivery error for `destination`.
    pub fn delivery(destination: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Delivery {
            destination: destination.into(),
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = EppnError::config("missing data dir");
        assert_eq!(err.to_string(), "config error: missing data dir");

        let err = EppnError::validation("urls", "sequence of string", "number");
        assert_eq!(
            err.to_string(),
            "validation error: field `urls` expected sequence of string, found number"
        );

        let err = EppnError::RoutingMiss {
            kind: "pdf_ready".into(),
        };
        assert!(err.to_string().contains("pdf_ready"));
    }

    #[test]
    fn persistence_error_names_path() {
        let err = EppnError::persistence("/tmp/registry.json", "rename failed");
        let text = err.to_string();
        assert!(text.contains("registry.json"));
        assert!(text.contains("rename failed"));
    }
}
