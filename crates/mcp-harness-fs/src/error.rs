//! Error types for file tracking.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for file tracking operations.
pub type Result<T> = std::result::Result<T, FsError>;

/// Errors that can occur while snapshotting or cleaning up.
#[derive(Debug, Error)]
pub enum FsError {
    /// A watch root is missing or not a directory.
    #[error("cannot watch '{}': not a directory", path.display())]
    NotADirectory { path: PathBuf },

    /// No tracked set exists under this label.
    #[error("unknown tracking label: {0}")]
    UnknownLabel(String),

    /// Walking a watch root failed.
    #[error("failed to walk '{}': {source}", path.display())]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },

    /// IO error.
    #[error("IO error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl FsError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
