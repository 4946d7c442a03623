//! Error types for ContentFlow.
//!
//! Library crates use [`ContentFlowError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all ContentFlow operations.
#[derive(Debug, thiserror::Error)]
pub enum ContentFlowError {
    /// A step required an input (source file, schema id) the run does not carry.
    #[error("input missing: {message}")]
    InputMissing { message: String },

    /// The analyzer existence check failed for a reason other than "not found".
    #[error("analyzer lookup failed for '{analyzer_id}': {message}")]
    ProfileLookupFailed {
        analyzer_id: String,
        message: String,
    },

    /// Schema fetch, schema artifact load, or analyzer creation failed.
    #[error("provisioning failed for '{analyzer_id}': {message}")]
    ProvisioningFailed {
        analyzer_id: String,
        message: String,
    },

    /// The analysis job reached a failed terminal state (or never finished).
    #[error("analysis failed: {message}")]
    AnalysisFailed { message: String },

    /// Catalog or object store I/O failed while persisting or reading artifacts.
    #[error("persistence failed: {0}")]
    PersistenceFailed(String),

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to an external service.
    #[error("network error: {0}")]
    Network(String),

    /// Database or catalog layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (duplicate step, invalid identifier, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// JSON encoding or decoding error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ContentFlowError>;

impl ContentFlowError {
    /// Create an input-missing error from any displayable message.
    pub fn input_missing(msg: impl Into<String>) -> Self {
        Self::InputMissing {
            message: msg.into(),
        }
    }

    /// Create a lookup error for the given analyzer.
    pub fn lookup(analyzer_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ProfileLookupFailed {
            analyzer_id: analyzer_id.into(),
            message: msg.into(),
        }
    }

    /// Create a provisioning error for the given analyzer.
    pub fn provisioning(analyzer_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ProvisioningFailed {
            analyzer_id: analyzer_id.into(),
            message: msg.into(),
        }
    }

    /// Create an analysis error from any displayable message.
    pub fn analysis(msg: impl Into<String>) -> Self {
        Self::AnalysisFailed {
            message: msg.into(),
        }
    }

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

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for ContentFlowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = ContentFlowError::input_missing("no source files");
        assert_eq!(err.to_string(), "input missing: no source files");

        let err = ContentFlowError::lookup("inv-2025", "HTTP 503");
        assert!(err.to_string().contains("inv-2025"));
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn serde_errors_convert() {
        let err: ContentFlowError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, ContentFlowError::Serialization(_)));
    }
}
