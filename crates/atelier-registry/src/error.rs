//! Registry error types
//!
//! Load-stage failures are kept distinct from execution-stage failures
//! so the controller can record *where* in the lifecycle things broke.

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No manifest with this id is registered
    #[error("unknown subagent: {id}")]
    UnknownSubagent {
        /// Requested subagent id
        id: String,
    },

    /// Manifest exists but its constructor is missing or unusable
    #[error("failed to load subagent '{id}' (entry '{entry}'): {message}")]
    LoadFailed {
        /// Manifest id
        id: String,
        /// Registration-table key that was attempted
        entry: String,
        /// Failure detail
        message: String,
    },
}
