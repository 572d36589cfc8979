//! Error types for the workspace store

use crate::artifact::ArtifactId;
use crate::event::RunId;

/// Workspace store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem failure
    #[error("workspace io error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be encoded or decoded
    #[error("workspace serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// No workspace was ever provisioned for this run
    #[error("unknown run: {0}")]
    UnknownRun(RunId),

    /// Artifact is not in the run's index
    #[error("artifact not found: {0}")]
    ArtifactNotFound(ArtifactId),

    /// An event line in the log could not be parsed
    #[error("corrupt event log at line {line}: {message}")]
    CorruptLog {
        /// 1-based line number
        line: usize,
        /// Parse failure detail
        message: String,
    },
}
