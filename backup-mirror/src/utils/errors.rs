//! Custom error types for the mirror agent.
//!
//! Every failure a run can hit maps to exactly one variant, and every variant
//! carries a human-readable message naming the phase that failed.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Source is not a readable directory: {0}")]
    InvalidSource(PathBuf),

    #[error("No backup files matching \"{0}\" found in the source directory")]
    NoCandidates(String),

    #[error("Destination is not a readable directory: {0}")]
    InvalidDestination(PathBuf),

    #[error("Failed to open source backup \"{name}\": {source}")]
    SourceOpenFailed {
        name: String,
        source: std::io::Error,
    },

    #[error("Failed to create destination file \"{name}\": {source}")]
    DestinationCreateFailed {
        name: String,
        source: std::io::Error,
    },

    #[error("Failed to open destination directory for commit: {source}")]
    DestinationOpenFailed { source: std::io::Error },

    #[error("I/O error while copying: {0}")]
    Io(#[from] std::io::Error),

    #[error("A mirror job is already running for this destination")]
    JobAlreadyRunning,

    #[error("Mirror job was cancelled")]
    Cancelled,
}

impl MirrorError {
    /// Transient failures are the only ones the scheduler may retry.
    /// Configuration-shaped errors (bad paths, nothing to copy) are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, MirrorError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;
