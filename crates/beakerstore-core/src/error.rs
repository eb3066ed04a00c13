//! Error types for dataset resolution and cache materialization.

use std::path::PathBuf;

/// Errors surfaced by the store.
#[derive(Debug, thiserror::Error)]
pub enum BeakerstoreError {
    /// Every identifier form tried against the registry came back 404.
    /// `message` carries one line per attempt.
    #[error("{message}")]
    DatasetNotFound { message: String },

    /// Blob storage answered a manifest or file request with a non-success status.
    #[error("unable to get the requested {what}; response code: {status}")]
    Store { what: &'static str, status: u32 },

    /// The registry failed with something other than "not found".
    #[error("registry lookup for '{identifier}' failed with HTTP {status}")]
    Registry { identifier: String, status: u32 },

    /// No cache override was given and this OS has no known default location.
    #[error("unsupported platform: {os}")]
    UnsupportedPlatform { os: String },

    /// Bad configuration (unparsable URL, missing home directory, ...).
    #[error("configuration error: {message}")]
    Config { message: String },

    /// The user path cannot name a dataset or a file inside one.
    #[error("invalid dataset path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// A registry or storage response could not be understood.
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },

    /// Transport failure (DNS, connection reset, ...).
    #[error(transparent)]
    Http(#[from] curl::Error),

    /// Local filesystem failure.
    #[error("{context}: {}", path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BeakerstoreError {
    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }

    /// True for the expected, user-facing "no such dataset" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::DatasetNotFound { .. })
    }
}

/// Result type for store operations.
pub type BeakerstoreResult<T> = Result<T, BeakerstoreError>;
