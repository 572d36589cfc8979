//! Error types

use crate::plan::NodeId;
use atelier_artifact::{ArtifactKind, RunId, StoreError};
use thiserror::Error;

/// Plan construction and validation errors
#[derive(Debug, Error)]
pub enum PlanError {
    /// A node references a dependency that is not in the graph
    #[error("node '{node}' depends on unknown node '{dependency}'")]
    MissingDependency {
        /// Referencing node
        node: NodeId,
        /// The missing dependency id
        dependency: NodeId,
    },

    /// The dependency relation has a cycle
    #[error("plan dependency graph contains a cycle")]
    CycleDetected,

    /// A plan step names a skill absent from the catalog
    #[error("no skill registered with id '{0}'")]
    MissingSkill(String),

    /// Planning produced no runnable steps
    #[error("no viable entry step for artifact kind '{kind}'")]
    NoViableEntry {
        /// Requested target kind
        kind: ArtifactKind,
    },

    /// No registered subagent can satisfy a transition
    #[error("no subagent produces '{to}' from {}", from.as_ref().map(|k| format!("'{k}'")).unwrap_or_else(|| "a bare prompt".to_string()))]
    NoSubagentForTransition {
        /// Source kind, absent when starting from nothing
        from: Option<ArtifactKind>,
        /// Target kind with no producer
        to: ArtifactKind,
    },
}

/// Run-level errors
///
/// Plan construction and step failures surface as a `Failed` run summary
/// rather than an `Err`; only misuse of the resume surface and workspace
/// I/O raise.
#[derive(Debug, Error)]
pub enum RunError {
    /// No recorded state exists for the run
    #[error("no resumable or recorded state for run '{0}'")]
    RunNotResumable(RunId),

    /// Resume named a different step than the one that froze
    #[error("run '{run_id}' is blocked on {expected:?}, not '{requested}'")]
    WrongBlockedStep {
        /// The frozen run
        run_id: RunId,
        /// Step the run is actually blocked on
        expected: Option<NodeId>,
        /// Step the caller named
        requested: NodeId,
    },

    /// Workspace store failure
    #[error(transparent)]
    Store(#[from] StoreError),
}
