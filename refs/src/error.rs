//! Error types for cross-reference and context operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RefsError>;

#[derive(Error, Debug)]
pub enum RefsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Core(#[from] librarian_core::LibrarianError),

    #[error(transparent)]
    ToolRef(#[from] librarian_toolref::ToolRefError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RefsError {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Core(inner) => inner.kind(),
            Self::ToolRef(inner) => inner.kind(),
            Self::Io(_) | Self::Json(_) => "fatal",
        }
    }
}
