//! Error types for spirea-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from descriptor registration and document I/O.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// JSON parse error on load, with the offending file path.
    #[error("failed to parse JSON document at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A source was registered with an empty base directory.
    #[error("source base directory must not be empty")]
    EmptyBase,

    /// A source was registered with a malformed extension.
    #[error("source extension {ext:?} must start with '.'")]
    InvalidExtension { ext: String },

    /// `output()` was called on a source registered without a dist directory.
    #[error("source at {base} has no dist directory; cannot write artifacts")]
    MissingDist { base: PathBuf },

    /// A load was registered with an empty output path.
    #[error("load {name:?} must declare a non-empty output path")]
    EmptyLoadOut { name: String },
}

/// Convenience constructor for [`CoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.into(),
        source,
    }
}
