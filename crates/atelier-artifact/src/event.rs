//! Workspace events
//!
//! One event per state transition, appended in occurrence order and
//! never rewritten. The event log is the source of truth for "what
//! happened and when" in a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

/// Unique event identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub Ulid);

impl EventId {
    /// Generate new event ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Run identifier
///
/// A string newtype rather than a ULID because callers may supply their
/// own run ids; `generate` mints a ULID-backed one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Mint a fresh run id
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Wrap a caller-supplied id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id as a string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RunId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Event vocabulary
///
/// Shared between the durable log and the outward progress stream, so
/// the log is exactly the mirror of what collaborators observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Run accepted and workspace provisioned
    #[serde(rename = "run.started")]
    RunStarted,
    /// Run status changed
    #[serde(rename = "run.status")]
    RunStatus,
    /// Plan graph constructed
    #[serde(rename = "plan.created")]
    PlanCreated,
    /// Plan node began executing
    #[serde(rename = "step.started")]
    StepStarted,
    /// Plan node finished
    #[serde(rename = "step.completed")]
    StepCompleted,
    /// Plan node failed
    #[serde(rename = "step.failed")]
    StepFailed,
    /// Artifact persisted to the workspace
    #[serde(rename = "artifact.delivered")]
    ArtifactDelivered,
    /// Subagent lifecycle began
    #[serde(rename = "subagent.started")]
    SubagentStarted,
    /// Subagent progress callback fired
    #[serde(rename = "subagent.progress")]
    SubagentProgress,
    /// Subagent completed
    #[serde(rename = "subagent.completed")]
    SubagentCompleted,
    /// Subagent failed (load or execution stage)
    #[serde(rename = "subagent.failed")]
    SubagentFailed,
    /// Verification began
    #[serde(rename = "verification.started")]
    VerificationStarted,
    /// Verification finished
    #[serde(rename = "verification.completed")]
    VerificationCompleted,
    /// Run reached `completed`
    #[serde(rename = "run.completed")]
    RunCompleted,
    /// Run reached `failed`
    #[serde(rename = "run.failed")]
    RunFailed,
    /// Run froze waiting for external input
    #[serde(rename = "run.awaiting-input")]
    RunAwaitingInput,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // serde rename is the canonical wire name
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default();
        write!(f, "{name}")
    }
}

/// One append-only log line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceEvent {
    /// Event identifier (assigned on append when absent)
    pub id: EventId,
    /// Owning run
    pub run_id: RunId,
    /// Event kind
    pub kind: EventKind,
    /// Occurrence timestamp (assigned on append when absent)
    pub created_at: DateTime<Utc>,
    /// Structured payload
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl WorkspaceEvent {
    /// Create an event for a run
    #[must_use]
    pub fn new(run_id: RunId, kind: EventKind, payload: Value) -> Self {
        Self {
            id: EventId::new(),
            run_id,
            kind,
            created_at: Utc::now(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn run_id_generate_is_unique() {
        assert_ne!(RunId::generate(), RunId::generate());
    }

    #[test]
    fn run_id_honors_caller_value() {
        let id = RunId::new("run-42");
        assert_eq!(id.as_str(), "run-42");
    }

    #[test]
    fn event_kind_wire_names() {
        assert_eq!(
            serde_json::to_value(EventKind::StepStarted).unwrap(),
            json!("step.started")
        );
        assert_eq!(
            serde_json::to_value(EventKind::RunAwaitingInput).unwrap(),
            json!("run.awaiting-input")
        );
        assert_eq!(EventKind::ArtifactDelivered.to_string(), "artifact.delivered");
    }

    #[test]
    fn event_json_line_round_trip() {
        let event = WorkspaceEvent::new(
            RunId::new("run-1"),
            EventKind::PlanCreated,
            json!({"entry_id": "clarify"}),
        );
        let line = serde_json::to_string(&event).unwrap();
        let parsed: WorkspaceEvent = serde_json::from_str(&line).unwrap();

        assert_eq!(parsed.id, event.id);
        assert_eq!(parsed.kind, EventKind::PlanCreated);
        assert_eq!(parsed.payload["entry_id"], "clarify");
    }
}
