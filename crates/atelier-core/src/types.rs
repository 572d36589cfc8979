//! Run types
//!
//! The run request/context/summary surface plus the typed run state the
//! controller's state machine operates on. Run state is a struct with
//! named optional fields, not a generic metadata bag, so the state
//! machine's invariants are enforced by the type system.

use crate::intent::ArtifactIntent;
use crate::invocation::InvocationSettings;
use crate::plan::NodeId;
use crate::verify::VerificationReport;
use atelier_artifact::{
    Artifact, ArtifactId, ArtifactKind, ArtifactSummary, EventKind, RunId, WorkspaceHandle,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Run lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    /// Steps are executing
    Running,
    /// Terminal success
    Completed,
    /// Terminal failure
    Failed,
    /// Frozen until an external resume call arrives; not terminal
    AwaitingInput,
}

impl RunStatus {
    /// Whether this status ends the run
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Allowed state transitions
    #[must_use]
    pub fn can_transition_to(&self, to: Self) -> bool {
        match self {
            Self::Running => matches!(to, Self::Completed | Self::Failed | Self::AwaitingInput),
            Self::AwaitingInput => matches!(to, Self::Running),
            Self::Completed | Self::Failed => false,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::AwaitingInput => "awaiting-input",
        };
        write!(f, "{name}")
    }
}

/// A high-level request: "produce artifact X"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    /// Caller-supplied run id; generated when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    /// Free-form request message
    pub message: String,
    /// Target artifact kind
    pub artifact_kind: ArtifactKind,
    /// Additional artifact kinds the caller asked for
    #[serde(default)]
    pub requested_artifacts: Vec<ArtifactKind>,
    /// Requested document sections; empty means all catalog sections
    #[serde(default)]
    pub sections: Vec<String>,
    /// Artifacts the caller already holds
    #[serde(default)]
    pub existing_artifacts: Vec<Artifact>,
    /// Free-form parameters forwarded to subagents
    #[serde(default)]
    pub params: Value,
}

impl RunRequest {
    /// Create a request
    #[must_use]
    pub fn new(artifact_kind: ArtifactKind, message: impl Into<String>) -> Self {
        Self {
            run_id: None,
            message: message.into(),
            artifact_kind,
            requested_artifacts: Vec::new(),
            sections: Vec::new(),
            existing_artifacts: Vec::new(),
            params: Value::Null,
        }
    }

    /// With a caller-supplied run id
    #[inline]
    #[must_use]
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// With additional requested artifact kinds
    #[inline]
    #[must_use]
    pub fn with_requested_artifacts(mut self, kinds: Vec<ArtifactKind>) -> Self {
        self.requested_artifacts = kinds;
        self
    }

    /// With explicit sections
    #[inline]
    #[must_use]
    pub fn with_sections(mut self, sections: Vec<String>) -> Self {
        self.sections = sections;
        self
    }

    /// With already-held artifacts
    #[inline]
    #[must_use]
    pub fn with_existing_artifacts(mut self, artifacts: Vec<Artifact>) -> Self {
        self.existing_artifacts = artifacts;
        self
    }

    /// With subagent parameters
    #[inline]
    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

/// Per-run settings
#[derive(Debug, Clone, Default)]
pub struct RunSettings {
    /// Model invocation configuration; `None` runs every skill directly
    pub invocation: Option<InvocationSettings>,
    /// Cooperative cancellation signal
    pub cancel: CancellationToken,
}

impl RunSettings {
    /// With model invocation configured
    #[inline]
    #[must_use]
    pub fn with_invocation(mut self, settings: InvocationSettings) -> Self {
        self.invocation = Some(settings);
        self
    }

    /// With a caller-held cancellation token
    #[inline]
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Descriptor of a subagent frozen waiting for approval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedSubagent {
    /// Plan node that froze
    pub step_id: NodeId,
    /// Subagent that asked for approval
    pub subagent_id: String,
    /// The plan awaiting approval
    pub plan: Value,
    /// When approval was requested
    pub requested_at: DateTime<Utc>,
}

/// Which lifecycle stage a subagent failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureStage {
    /// Manifest present but the lifecycle could not be constructed
    Load,
    /// The lifecycle ran and failed
    Execution,
}

/// One recorded subagent success
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentResult {
    /// Subagent id
    pub subagent_id: String,
    /// Artifact kind produced
    pub kind: ArtifactKind,
    /// Produced artifact id, when one was delivered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<ArtifactId>,
    /// Whether this was a supplementary auto run
    pub auto: bool,
    /// Execution metadata
    #[serde(default)]
    pub metadata: Value,
}

/// One recorded subagent failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentFailure {
    /// Subagent id
    pub subagent_id: String,
    /// Plan node, absent for supplementary auto runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<NodeId>,
    /// Load vs execution stage
    pub stage: FailureStage,
    /// Failure detail
    pub message: String,
    /// Whether this was a supplementary auto run
    pub auto: bool,
}

/// Typed run state
///
/// Everything the controller needs to freeze and later resume a run.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    /// Memoized intent, so repeat resolutions within a run are free
    pub cached_intent: Option<ArtifactIntent>,
    /// Present while a subagent waits for approval
    pub blocked_subagent: Option<BlockedSubagent>,
    /// Clarification questions from a frozen skill step
    pub pending_clarification: Option<Value>,
    /// Completed subagent runs
    pub subagent_results: Vec<SubagentResult>,
    /// Recorded subagent failures, load and execution stage alike
    pub subagent_failures: Vec<SubagentFailure>,
}

/// Per-run identity and mutable state
///
/// Owned exclusively by one controller invocation; never shared across
/// runs.
#[derive(Debug)]
pub struct RunContext {
    /// Run identifier
    pub run_id: RunId,
    /// The originating request
    pub request: RunRequest,
    /// Run settings
    pub settings: RunSettings,
    /// Provisioned workspace
    pub workspace: WorkspaceHandle,
    /// Run start time
    pub started_at: DateTime<Utc>,
    /// Typed run state
    pub state: RunState,
}

impl RunContext {
    /// Create a run context
    #[must_use]
    pub fn new(
        run_id: RunId,
        request: RunRequest,
        settings: RunSettings,
        workspace: WorkspaceHandle,
    ) -> Self {
        Self {
            run_id,
            request,
            settings,
            workspace,
            started_at: Utc::now(),
            state: RunState::default(),
        }
    }

    /// The cancellation signal for this run
    #[inline]
    #[must_use]
    pub fn cancel(&self) -> &CancellationToken {
        &self.settings.cancel
    }
}

/// What a caller gets back from `start` / `resume`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run identifier
    pub run_id: RunId,
    /// Final (or frozen) status
    pub status: RunStatus,
    /// Target artifact kind
    pub artifact_kind: ArtifactKind,
    /// The run's primary artifact, when produced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_artifact: Option<Artifact>,
    /// Everything in the run's artifact index
    #[serde(default)]
    pub artifacts: Vec<ArtifactSummary>,
    /// Completed subagent runs
    #[serde(default)]
    pub subagent_results: Vec<SubagentResult>,
    /// Recorded subagent failures
    #[serde(default)]
    pub subagent_failures: Vec<SubagentFailure>,
    /// Aggregated verification outcome
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationReport>,
    /// Present while a subagent waits for approval
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_subagent: Option<BlockedSubagent>,
    /// Present while a skill step waits for clarification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarification: Option<Value>,
    /// Originating message for failed runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One outward progress notification
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    /// Notification type
    pub kind: EventKind,
    /// When it happened
    pub timestamp: DateTime<Utc>,
    /// Owning run
    pub run_id: RunId,
    /// Plan node, when step-scoped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<NodeId>,
    /// Run status, when the notification carries one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    /// Structured payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressEvent {
    /// Create a notification
    #[must_use]
    pub fn new(kind: EventKind, run_id: RunId) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            run_id,
            step_id: None,
            status: None,
            payload: None,
            message: None,
        }
    }

    /// With a step id
    #[inline]
    #[must_use]
    pub fn with_step(mut self, step_id: NodeId) -> Self {
        self.step_id = Some(step_id);
        self
    }

    /// With a run status
    #[inline]
    #[must_use]
    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// With a payload
    #[inline]
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// With a message
    #[inline]
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Outward progress stream consumed by UI/API collaborators
pub trait ProgressSink: Send + Sync {
    /// Deliver one notification
    fn emit(&self, event: ProgressEvent);
}

/// Sink that drops everything
#[derive(Debug, Default)]
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Channel-backed sink
#[derive(Debug, Clone)]
pub struct ChannelProgressSink {
    sender: tokio::sync::mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgressSink {
    /// Create a sink and its receiving end
    #[must_use]
    pub fn channel() -> (Self, tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ProgressSink for ChannelProgressSink {
    fn emit(&self, event: ProgressEvent) {
        // Receiver gone means nobody is listening anymore
        let _ = self.sender.send(event);
    }
}
