//! Quarantine error types.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuarantineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("path has no file name: {0}")]
    InvalidPath(PathBuf),

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
}
