//! Error types for spirea-engine.

use std::path::PathBuf;

use thiserror::Error;

use spirea_core::{CallbackError, CoreError};

/// All errors that can arise from cache, scan, and pipeline operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An error from descriptor resolution or document I/O in the core.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (cache document).
    #[error("cache JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A user-supplied parse callback failed. Not retried, not quarantined.
    #[error("parse callback failed for {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: CallbackError,
    },

    /// `dirs::home_dir()` returned `None` — cannot locate `~/.spirea/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

/// Convenience constructor for [`EngineError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> EngineError {
    EngineError::Io {
        path: path.into(),
        source,
    }
}
