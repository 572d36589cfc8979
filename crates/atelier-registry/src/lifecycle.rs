//! Subagent lifecycles
//!
//! A lifecycle is the loaded, executable instance behind a manifest.
//! Execution has three outcomes: completion (with an optional
//! artifact), a request for human approval (the run freezes until an
//! explicit resume), or failure (recorded, never fatal to the run).

use atelier_artifact::{Artifact, RunId};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Progress callback a subagent may invoke zero or more times
pub type ProgressEmitter = Arc<dyn Fn(Value) + Send + Sync>;

/// Execution request handed to a lifecycle
#[derive(Clone)]
pub struct SubagentRequest {
    /// Owning run
    pub run_id: RunId,
    /// Free-form parameters from the run request
    pub params: Value,
    /// Resolved input artifact, when one exists
    pub source_artifact: Option<Artifact>,
    /// Caller-approved plan, present only on the resume path
    pub approved_plan: Option<Value>,
    /// Suppresses a repeat approval request after a resume
    pub approval_suppressed: bool,
    /// Cooperative abort signal for the owning run
    ///
    /// Long-running lifecycles should observe this and return
    /// [`SubagentError::Cancelled`] when it fires.
    pub cancel: CancellationToken,
    /// When the request was issued
    pub requested_at: DateTime<Utc>,
}

impl SubagentRequest {
    /// Create a request
    #[must_use]
    pub fn new(run_id: RunId, params: Value) -> Self {
        Self {
            run_id,
            params,
            source_artifact: None,
            approved_plan: None,
            approval_suppressed: false,
            cancel: CancellationToken::new(),
            requested_at: Utc::now(),
        }
    }

    /// With a resolved source artifact
    #[inline]
    #[must_use]
    pub fn with_source(mut self, artifact: Artifact) -> Self {
        self.source_artifact = Some(artifact);
        self
    }

    /// Attach an approval payload and suppress further approval asks
    #[inline]
    #[must_use]
    pub fn with_approval(mut self, plan: Value) -> Self {
        self.approved_plan = Some(plan);
        self.approval_suppressed = true;
        self
    }

    /// Thread the owning run's cancellation signal through
    #[inline]
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl std::fmt::Debug for SubagentRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubagentRequest")
            .field("run_id", &self.run_id)
            .field("has_source", &self.source_artifact.is_some())
            .field("has_approval", &self.approved_plan.is_some())
            .field("approval_suppressed", &self.approval_suppressed)
            .finish()
    }
}

/// Result of a lifecycle execution
#[derive(Debug, Clone)]
pub enum SubagentOutcome {
    /// Work finished; artifact is optional for side-effect-only agents
    Completed {
        /// Artifact produced, if any
        artifact: Option<Artifact>,
        /// Execution metadata
        metadata: Value,
    },
    /// The subagent wants human approval of its plan before proceeding
    NeedsApproval {
        /// The plan to approve
        plan: Value,
    },
}

/// Subagent execution failure
///
/// Execution failures are recorded per-subagent and never abort the
/// run; load failures are a [`crate::RegistryError`] so the controller
/// can tell the stages apart.
#[derive(Debug, thiserror::Error)]
pub enum SubagentError {
    /// The subagent's own logic failed
    #[error("subagent execution failed: {0}")]
    Execution(String),

    /// Execution was cancelled cooperatively
    #[error("subagent execution cancelled")]
    Cancelled,
}

/// Loaded, executable subagent instance
#[async_trait::async_trait]
pub trait SubagentLifecycle: Send + Sync {
    /// Stable subagent identifier (matches the manifest)
    fn id(&self) -> &str;

    /// Execute the capability
    async fn execute(
        &self,
        request: SubagentRequest,
        emit: ProgressEmitter,
    ) -> Result<SubagentOutcome, SubagentError>;
}

impl std::fmt::Debug for dyn SubagentLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubagentLifecycle")
            .field("id", &self.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn approval_attachment_suppresses_ask() {
        let request = SubagentRequest::new(RunId::new("run-1"), json!({}))
            .with_approval(json!({"steps": ["a", "b"]}));

        assert!(request.approval_suppressed);
        assert_eq!(request.approved_plan.unwrap()["steps"][0], "a");
    }

    #[test]
    fn cancellation_signal_rides_the_request() {
        let cancel = CancellationToken::new();
        let request =
            SubagentRequest::new(RunId::new("run-1"), json!({})).with_cancel(cancel.clone());

        assert!(!request.cancel.is_cancelled());
        cancel.cancel();
        assert!(request.cancel.is_cancelled());
    }
}
