//! Error types for librarian core operations

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LibrarianError>;

#[derive(Error, Debug)]
pub enum LibrarianError {
    /// A path argument is not inside any allowed root.
    #[error("access denied: {} is not within allowed directories", .0.display())]
    AccessDenied(PathBuf),

    /// Project root, reference directory, component or task does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Required index structures are missing. Resolvable by running the
    /// appropriate initialise operation first.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A reader saw an in-progress on-disk write and a single retry did not
    /// produce a consistent document.
    #[error("stale snapshot: {0}")]
    StaleSnapshot(String),

    /// Process-level failure, e.g. the reference directory cannot be created.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LibrarianError {
    /// Stable machine-readable error kind, used by the facade when shaping
    /// tool-result errors.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AccessDenied(_) => "access_denied",
            Self::NotFound(_) => "not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::StaleSnapshot(_) => "stale_snapshot",
            Self::Fatal(_) | Self::Io(_) | Self::Json(_) => "fatal",
        }
    }
}
