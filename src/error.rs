use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub(crate) type Result<T> = std::result::Result<T, BridgeError>;

/// Canonical error surface for conversions.
///
/// Structural errors (unreadable container, missing archive entry) surface before any write.
/// Database errors raised inside a conversion abort the enclosing transaction.
#[derive(Debug, Error)]
pub(crate) enum BridgeError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Archive {archive} has no entry named {entry}")]
    MissingEntry { archive: PathBuf, entry: String },

    #[error("Malformed input: {0}")]
    Malformed(String),

    #[error("Unsupported schema: {0}")]
    UnsupportedSchema(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl BridgeError {
    pub(crate) fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: Some(path.into()),
        }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(source: std::io::Error) -> Self {
        Self::Io { source, path: None }
    }
}
