//! Testing utilities for the atelier workspace
//!
//! Scripted classifiers, recording skill runners, canned subagents, and
//! store fixtures shared by the integration tests.

#![allow(missing_docs)]

use atelier_artifact::{Artifact, ArtifactKind, WorkspaceStore};
use atelier_core::{
    Classification, Classifier, ClassifierError, IntentResolver, InvocationError, ModelInvoker,
    ModelRequest, ModelResponse, Planner, SkillCatalog, SkillError, SkillInvocation,
    SkillResponse, SkillResult, SkillRunner,
};
use atelier_registry::{
    ProgressEmitter, SubagentError, SubagentLifecycle, SubagentManifest, SubagentOutcome,
    SubagentRegistry, SubagentRequest,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Classifier that always returns the given chain
pub struct ScriptedClassifier {
    pub chain: Vec<ArtifactKind>,
    pub confidence: f64,
}

impl ScriptedClassifier {
    pub fn chain(kinds: &[&str]) -> Self {
        Self {
            chain: kinds.iter().map(|k| ArtifactKind::new(*k)).collect(),
            confidence: 0.9,
        }
    }
}

#[async_trait::async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(
        &self,
        _message: &str,
        _reachable: &[ArtifactKind],
    ) -> Result<Classification, ClassifierError> {
        Ok(Classification {
            target: self.chain.last().cloned(),
            chain: self.chain.clone(),
            confidence: self.confidence,
        })
    }
}

/// Classifier that is always unreachable
pub struct UnavailableClassifier;

#[async_trait::async_trait]
impl Classifier for UnavailableClassifier {
    async fn classify(
        &self,
        _message: &str,
        _reachable: &[ArtifactKind],
    ) -> Result<Classification, ClassifierError> {
        Err(ClassifierError::Unavailable("scripted outage".into()))
    }
}

/// Skill runner that echoes inputs and records every invocation
#[derive(Default)]
pub struct RecordingSkillRunner {
    invocations: Mutex<Vec<SkillInvocation>>,
    clarify_questions: Mutex<Option<Value>>,
    failing_skills: Mutex<Vec<String>>,
}

impl RecordingSkillRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the clarification-check skill raise questions
    pub fn with_clarification(self, questions: Value) -> Self {
        *self.clarify_questions.lock() = Some(questions);
        self
    }

    /// Make one skill fail on every invocation
    pub fn with_failing_skill(self, skill_id: &str) -> Self {
        self.failing_skills.lock().push(skill_id.to_string());
        self
    }

    /// Every invocation seen so far, in order
    pub fn invocations(&self) -> Vec<SkillInvocation> {
        self.invocations.lock().clone()
    }

    /// Number of invocations of one skill
    pub fn count_for(&self, skill_id: &str) -> usize {
        self.invocations
            .lock()
            .iter()
            .filter(|i| i.skill_id == skill_id)
            .count()
    }
}

#[async_trait::async_trait]
impl SkillRunner for RecordingSkillRunner {
    async fn invoke(&self, invocation: SkillInvocation) -> Result<SkillResponse, SkillError> {
        self.invocations.lock().push(invocation.clone());

        if self.failing_skills.lock().contains(&invocation.skill_id) {
            return Err(SkillError::Failed {
                skill_id: invocation.skill_id,
                message: "scripted failure".into(),
            });
        }
        if invocation.skill_id == atelier_core::CLARIFY_SKILL {
            if let Some(questions) = self.clarify_questions.lock().clone() {
                return Ok(SkillResponse::NeedsClarification { questions });
            }
        }
        Ok(SkillResponse::Completed(SkillResult::output(json!({
            "skill": invocation.skill_id,
            "input": invocation.input,
        }))))
    }
}

/// Subagent that completes immediately with a canned artifact
pub struct CountingSubagent {
    id: String,
    kind: ArtifactKind,
    pub executions: Arc<AtomicUsize>,
}

impl CountingSubagent {
    pub fn new(id: &str, kind: ArtifactKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            executions: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait::async_trait]
impl SubagentLifecycle for CountingSubagent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(
        &self,
        request: SubagentRequest,
        emit: ProgressEmitter,
    ) -> Result<SubagentOutcome, SubagentError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        emit(json!({"phase": "working"}));
        let source_id = request.source_artifact.as_ref().map(|a| a.id.to_string());
        Ok(SubagentOutcome::Completed {
            artifact: Some(Artifact::new(
                self.kind.clone(),
                json!({"produced_by": self.id, "source": source_id}),
            )),
            metadata: json!({"executions": self.executions.load(Ordering::SeqCst)}),
        })
    }
}

/// Subagent that asks for approval on its first execution
///
/// A resumed request with `approval_suppressed` set completes with an
/// artifact carrying the approved plan.
pub struct ApprovalSubagent {
    id: String,
    kind: ArtifactKind,
    pub executions: Arc<AtomicUsize>,
}

impl ApprovalSubagent {
    pub fn new(id: &str, kind: ArtifactKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            executions: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait::async_trait]
impl SubagentLifecycle for ApprovalSubagent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(
        &self,
        request: SubagentRequest,
        _emit: ProgressEmitter,
    ) -> Result<SubagentOutcome, SubagentError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        if !request.approval_suppressed {
            return Ok(SubagentOutcome::NeedsApproval {
                plan: json!({"steps": ["draft", "refine"]}),
            });
        }
        Ok(SubagentOutcome::Completed {
            artifact: Some(Artifact::new(
                self.kind.clone(),
                json!({"approved_plan": request.approved_plan}),
            )),
            metadata: Value::Null,
        })
    }
}

/// Subagent whose execution always fails
pub struct FailingSubagent {
    id: String,
}

impl FailingSubagent {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }
}

#[async_trait::async_trait]
impl SubagentLifecycle for FailingSubagent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(
        &self,
        _request: SubagentRequest,
        _emit: ProgressEmitter,
    ) -> Result<SubagentOutcome, SubagentError> {
        Err(SubagentError::Execution("scripted subagent failure".into()))
    }
}

/// Invoker that rejects every request with a 400
pub struct RejectingInvoker {
    pub calls: Arc<AtomicUsize>,
}

impl RejectingInvoker {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Default for RejectingInvoker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ModelInvoker for RejectingInvoker {
    async fn invoke(&self, _request: ModelRequest) -> Result<ModelResponse, InvocationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(InvocationError::Provider {
            status: 400,
            message: "scripted provider rejection".into(),
        })
    }
}

/// Invoker that answers every request with a tool call echoing the input
pub struct EchoInvoker;

#[async_trait::async_trait]
impl ModelInvoker for EchoInvoker {
    async fn invoke(&self, request: ModelRequest) -> Result<ModelResponse, InvocationError> {
        let name = request.tool.map(|t| t.name).unwrap_or_default();
        Ok(ModelResponse::ToolCall {
            name,
            arguments: json!({"echo": request.user}),
        })
    }
}

/// A persisted store rooted in a temp directory
pub fn temp_store() -> (Arc<WorkspaceStore>, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");
    (Arc::new(WorkspaceStore::new(dir.path())), dir)
}

/// Registry with a persona subagent consuming PRDs
pub fn persona_registry() -> (Arc<SubagentRegistry>, Arc<AtomicUsize>) {
    let subagent = Arc::new(CountingSubagent::new("persona", ArtifactKind::new("persona")));
    let executions = subagent.executions.clone();
    let mut registry = SubagentRegistry::new();
    registry.register(
        SubagentManifest::new("persona", ArtifactKind::new("persona"), vec![ArtifactKind::prd()]),
        move || Ok(subagent.clone() as Arc<dyn SubagentLifecycle>),
    );
    (Arc::new(registry), executions)
}

/// Register a lifecycle under a manifest in one call
pub fn register_lifecycle(
    registry: &mut SubagentRegistry,
    manifest: SubagentManifest,
    lifecycle: Arc<dyn SubagentLifecycle>,
) {
    registry.register(manifest, move || Ok(lifecycle.clone()));
}

/// Planner over a scripted classifier and the default catalog
pub fn scripted_planner(chain: &[&str], registry: Arc<SubagentRegistry>) -> Planner {
    let resolver = IntentResolver::new(Arc::new(ScriptedClassifier::chain(chain)), registry.clone());
    Planner::new(registry, resolver, SkillCatalog::default_prd())
}
