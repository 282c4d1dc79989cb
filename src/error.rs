//! Error types for the indel caller.
//!
//! Only conditions that stop a run live here. Candidates that fail to align,
//! carry too many ambiguous consensus bases or lack depth are filtered out by
//! the stage that sees them and never surface as errors.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for caller operations
pub type Result<T> = std::result::Result<T, CallerError>;

/// Error type for caller operations
#[derive(Error, Debug)]
pub enum CallerError {
    /// External aligner could not be started
    #[error("Failed to launch '{command}': {source}")]
    EngineLaunch {
        /// Command line that was attempted
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// External aligner exited with a non-zero status
    #[error("'{command}' exited with status {status}")]
    EngineFailed {
        /// Command line that failed
        command: String,
        /// Exit code, or -1 when terminated by a signal
        status: i32,
    },

    /// Reference window could not be served
    #[error("Reference lookup {chr}:{start}-{end} failed: {reason}")]
    Reference {
        chr: String,
        start: u64,
        end: u64,
        reason: String,
    },

    /// Alignment file could not be opened, queried or decoded
    #[error("Alignment input '{path}': {reason}")]
    Alignment {
        path: PathBuf,
        reason: String,
    },

    /// Invalid configuration value
    #[error("Invalid parameter '{parameter}': {reason}")]
    Config {
        parameter: String,
        reason: String,
    },

    /// Consensus worker pool could not be started
    #[error("Failed to start consensus workers: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CallerError {
    pub(crate) fn config(parameter: &str, reason: impl Into<String>) -> Self {
        CallerError::Config {
            parameter: parameter.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn alignment(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        CallerError::Alignment {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
