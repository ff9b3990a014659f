//! Error types for the tool registry store

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ToolRefError>;

#[derive(Error, Debug)]
pub enum ToolRefError {
    #[error("tool reference not initialized: {0}")]
    NotInitialized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsupported tool reference version: {0}")]
    UnsupportedVersion(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] librarian_core::LibrarianError),
}

impl ToolRefError {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotInitialized(_) | Self::UnsupportedVersion(_) => "invalid_state",
            Self::NotFound(_) => "not_found",
            Self::Io(_) | Self::Json(_) => "fatal",
            Self::Core(inner) => inner.kind(),
        }
    }
}
