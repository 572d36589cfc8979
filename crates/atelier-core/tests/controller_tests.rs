//! End-to-end controller behavior: plan execution, pause/resume,
//! failure isolation, provider fallback, and verification gates.

use atelier_artifact::{Artifact, ArtifactKind, EventKind, RunId, WorkspaceStore};
use atelier_core::{
    ChannelProgressSink, FailureStage, GraphController, IntentResolver, NodeId, Planner, RunError,
    RunRequest, RunSettings, RunStatus, SkillCatalog, SkillError, SkillInvocation, SkillResponse,
    SkillResult, SkillRunner, VerificationIssue, VerificationReport, VerificationStatus, Verifier,
    VerifyError, ASSEMBLE_NODE,
};
use atelier_core::{
    InvocationError, InvocationSettings, ModelInvoker, ModelRequest, ModelResponse, RetryPolicy,
};
use atelier_registry::{
    ProgressEmitter, SubagentError, SubagentLifecycle, SubagentManifest, SubagentOutcome,
    SubagentRegistry, SubagentRequest,
};
use atelier_test_utils::{
    persona_registry, register_lifecycle, scripted_planner, temp_store, ApprovalSubagent,
    CountingSubagent, EchoInvoker, FailingSubagent, RecordingSkillRunner, RejectingInvoker,
    UnavailableClassifier,
};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Temp-backed store with log capture wired up for failed-test output
fn harness() -> (Arc<WorkspaceStore>, tempfile::TempDir) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    temp_store()
}

fn prd_request(message: &str) -> RunRequest {
    RunRequest::new(ArtifactKind::prd(), message)
}

struct ScriptedVerifier {
    status: VerificationStatus,
}

#[async_trait::async_trait]
impl Verifier for ScriptedVerifier {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn verify(&self, _artifact: &Artifact) -> Result<VerificationReport, VerifyError> {
        Ok(match self.status {
            VerificationStatus::Pass => VerificationReport::pass(),
            status => VerificationReport::with_issues(
                status,
                vec![VerificationIssue::in_section("goals are vague", "goals")],
            ),
        })
    }
}

#[tokio::test]
async fn prd_run_completes_with_primary_artifact() {
    let (store, _dir) = harness();
    let (registry, _) = persona_registry();
    let skills = Arc::new(RecordingSkillRunner::new());
    let controller = GraphController::new(
        scripted_planner(&["prd"], registry.clone()),
        registry,
        skills.clone(),
        store.clone(),
    );

    let summary = controller
        .start(prd_request("Create a PRD for a budgeting app"))
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    let primary = summary.primary_artifact.expect("primary artifact");
    assert_eq!(primary.kind, ArtifactKind::prd());
    assert!(summary.error.is_none());

    // Every section writer ran exactly once
    assert_eq!(skills.count_for("write-goals"), 1);
    assert_eq!(skills.count_for("assemble"), 1);

    // The durable log brackets the run and orders plan before steps
    let events = store.get_events(&summary.run_id).unwrap();
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(kinds.first(), Some(&EventKind::RunStarted));
    assert_eq!(kinds.last(), Some(&EventKind::RunCompleted));
    let plan_at = kinds.iter().position(|k| *k == EventKind::PlanCreated).unwrap();
    let first_step = kinds.iter().position(|k| *k == EventKind::StepStarted).unwrap();
    assert!(plan_at < first_step);
    assert!(kinds.contains(&EventKind::ArtifactDelivered));
}

#[tokio::test]
async fn chained_run_feeds_assembled_document_to_subagent() {
    let (store, _dir) = harness();
    let (registry, executions) = persona_registry();
    let skills = Arc::new(RecordingSkillRunner::new());
    let controller = GraphController::new(
        scripted_planner(&["prd", "persona"], registry.clone()),
        registry,
        skills,
        store.clone(),
    );

    let summary = controller
        .start(RunRequest::new(
            ArtifactKind::new("persona"),
            "PRD then personas",
        ))
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(executions.load(Ordering::SeqCst), 1);
    assert_eq!(summary.subagent_results.len(), 1);
    assert_eq!(summary.subagent_results[0].subagent_id, "persona");
    assert!(!summary.subagent_results[0].auto);

    // Both the document and the persona landed in the index
    let index = store.list_artifacts(&summary.run_id).unwrap();
    assert!(index.iter().any(|a| a.kind == ArtifactKind::prd()));
    assert!(index.iter().any(|a| a.kind == ArtifactKind::new("persona")));

    // Subagent progress ticks made it into the durable log
    let events = store.get_events(&summary.run_id).unwrap();
    assert!(events.iter().any(|e| e.kind == EventKind::SubagentProgress));
}

#[tokio::test]
async fn approval_request_freezes_and_resume_continues_without_rework() {
    let (store, _dir) = harness();
    let approver = Arc::new(ApprovalSubagent::new("persona", ArtifactKind::new("persona")));
    let mut registry = SubagentRegistry::new();
    register_lifecycle(
        &mut registry,
        SubagentManifest::new("persona", ArtifactKind::new("persona"), vec![ArtifactKind::prd()]),
        approver.clone(),
    );
    let registry = Arc::new(registry);
    let skills = Arc::new(RecordingSkillRunner::new());
    let controller = GraphController::new(
        scripted_planner(&["prd", "persona"], registry.clone()),
        registry,
        skills.clone(),
        store.clone(),
    );

    let frozen = controller
        .start(RunRequest::new(ArtifactKind::new("persona"), "needs approval"))
        .await
        .unwrap();

    assert_eq!(frozen.status, RunStatus::AwaitingInput);
    let blocked = frozen.blocked_subagent.as_ref().expect("blocked descriptor");
    assert_eq!(blocked.subagent_id, "persona");
    assert_eq!(blocked.plan["steps"][0], "draft");
    assert_eq!(approver.executions.load(Ordering::SeqCst), 1);
    let writer_runs_before = skills.count_for("write-goals");

    let resumed = controller
        .resume_subagent(
            &frozen.run_id,
            &blocked.step_id,
            json!({"steps": ["draft", "refine"], "approved": true}),
        )
        .await
        .unwrap();

    assert_eq!(resumed.status, RunStatus::Completed);
    assert!(resumed.blocked_subagent.is_none());
    assert_eq!(approver.executions.load(Ordering::SeqCst), 2);
    // Steps resolved before the freeze were not re-executed
    assert_eq!(skills.count_for("write-goals"), writer_runs_before);
    assert_eq!(skills.count_for("assemble"), 1);

    let persona = resumed
        .subagent_results
        .iter()
        .find(|r| r.subagent_id == "persona")
        .expect("persona result");
    assert_eq!(persona.kind, ArtifactKind::new("persona"));

    // The log shows the freeze and the running transition around it
    let events = store.get_events(&resumed.run_id).unwrap();
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    let frozen_at = kinds.iter().position(|k| *k == EventKind::RunAwaitingInput).unwrap();
    let running_at = kinds.iter().position(|k| *k == EventKind::RunStatus).unwrap();
    assert!(frozen_at < running_at);
    assert_eq!(kinds.last(), Some(&EventKind::RunCompleted));
}

#[tokio::test]
async fn resume_with_wrong_step_is_rejected_and_run_stays_frozen() {
    let (store, _dir) = harness();
    let approver = Arc::new(ApprovalSubagent::new("persona", ArtifactKind::new("persona")));
    let mut registry = SubagentRegistry::new();
    register_lifecycle(
        &mut registry,
        SubagentManifest::new("persona", ArtifactKind::new("persona"), vec![ArtifactKind::prd()]),
        approver,
    );
    let registry = Arc::new(registry);
    let controller = GraphController::new(
        scripted_planner(&["prd", "persona"], registry.clone()),
        registry,
        Arc::new(RecordingSkillRunner::new()),
        store,
    );

    let frozen = controller
        .start(RunRequest::new(ArtifactKind::new("persona"), "needs approval"))
        .await
        .unwrap();
    let blocked_step = frozen.blocked_subagent.unwrap().step_id;

    let err = controller
        .resume_subagent(&frozen.run_id, &NodeId::new(ASSEMBLE_NODE), json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::WrongBlockedStep { .. }));

    // The run is still resumable with the right step
    let resumed = controller
        .resume_subagent(&frozen.run_id, &blocked_step, json!({"approved": true}))
        .await
        .unwrap();
    assert_eq!(resumed.status, RunStatus::Completed);
}

#[tokio::test]
async fn resume_of_unknown_run_is_rejected() {
    let (store, _dir) = harness();
    let (registry, _) = persona_registry();
    let controller = GraphController::new(
        scripted_planner(&["prd"], registry.clone()),
        registry,
        Arc::new(RecordingSkillRunner::new()),
        store,
    );

    let err = controller
        .resume_subagent(&RunId::new("ghost"), &NodeId::new("subagent-persona"), json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, RunError::RunNotResumable(_)));
}

#[tokio::test]
async fn subagent_failure_is_isolated_from_the_run() {
    let (store, _dir) = harness();
    let mut registry = SubagentRegistry::new();
    register_lifecycle(
        &mut registry,
        SubagentManifest::new("persona", ArtifactKind::new("persona"), vec![ArtifactKind::prd()]),
        Arc::new(FailingSubagent::new("persona")) as Arc<dyn SubagentLifecycle>,
    );
    let registry = Arc::new(registry);
    let controller = GraphController::new(
        scripted_planner(&["prd", "persona"], registry.clone()),
        registry,
        Arc::new(RecordingSkillRunner::new()),
        store.clone(),
    );

    // The target kind is persona, which never materializes; but the run
    // must not abort mid-plan because of the subagent
    let summary = controller
        .start(RunRequest::new(ArtifactKind::new("persona"), "doomed persona"))
        .await
        .unwrap();

    assert_eq!(summary.subagent_failures.len(), 1);
    assert_eq!(summary.subagent_failures[0].stage, FailureStage::Execution);
    assert_eq!(summary.status, RunStatus::Failed);
    // The document pipeline still delivered its artifact first
    let index = store.list_artifacts(&summary.run_id).unwrap();
    assert!(index.iter().any(|a| a.kind == ArtifactKind::prd()));

    let events = store.get_events(&summary.run_id).unwrap();
    assert!(events.iter().any(|e| e.kind == EventKind::SubagentFailed));
}

#[tokio::test]
async fn missing_lifecycle_is_a_load_stage_failure() {
    let (store, _dir) = harness();
    let mut registry = SubagentRegistry::new();
    registry.register_manifest_only(SubagentManifest::new(
        "persona",
        ArtifactKind::new("persona"),
        vec![ArtifactKind::prd()],
    ));
    let registry = Arc::new(registry);
    let controller = GraphController::new(
        scripted_planner(&["prd"], registry.clone()),
        registry,
        Arc::new(RecordingSkillRunner::new()),
        store,
    );

    // Target prd, persona requested on the side: the auto run fails to
    // load but the run still completes
    let summary = controller
        .start(prd_request("PRD with broken persona build").with_requested_artifacts(vec![
            ArtifactKind::new("persona"),
        ]))
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.subagent_failures.len(), 1);
    assert_eq!(summary.subagent_failures[0].stage, FailureStage::Load);
    assert!(summary.subagent_failures[0].auto);
}

#[tokio::test]
async fn provider_rejection_falls_back_to_direct_execution() {
    let (store, _dir) = harness();
    let (registry, _) = persona_registry();
    let skills = Arc::new(RecordingSkillRunner::new());
    let invoker = Arc::new(RejectingInvoker::new());
    let controller = GraphController::new(
        scripted_planner(&["prd"], registry.clone()),
        registry,
        skills.clone(),
        store,
    )
    .with_invoker(invoker.clone() as Arc<dyn ModelInvoker>);

    let summary = controller
        .start_with_settings(
            prd_request("PRD with rejecting provider"),
            RunSettings::default().with_invocation(InvocationSettings::new("test-model")),
        )
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    // Each step hit the provider once (no retry on 4xx) and fell back
    assert!(invoker.calls.load(Ordering::SeqCst) >= 1);
    assert_eq!(skills.count_for("assemble"), 1);
}

#[tokio::test]
async fn tool_call_responses_satisfy_every_step() {
    let (store, _dir) = harness();
    let (registry, _) = persona_registry();
    let skills = Arc::new(RecordingSkillRunner::new());
    let controller = GraphController::new(
        scripted_planner(&["prd"], registry.clone()),
        registry,
        skills.clone(),
        store,
    )
    .with_invoker(Arc::new(EchoInvoker) as Arc<dyn ModelInvoker>);

    let summary = controller
        .start_with_settings(
            prd_request("model-backed PRD"),
            RunSettings::default().with_invocation(InvocationSettings::new("test-model")),
        )
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    // The provider answered every step; the direct runner was never used
    assert!(skills.invocations().is_empty());
    let primary = summary.primary_artifact.expect("primary artifact");
    assert!(primary.data["echo"]["sections"].is_array());
}

#[tokio::test]
async fn auto_subagent_covers_requested_kinds_after_completion() {
    let (store, _dir) = harness();
    let (registry, executions) = persona_registry();
    let controller = GraphController::new(
        scripted_planner(&["prd"], registry.clone()),
        registry,
        Arc::new(RecordingSkillRunner::new()),
        store.clone(),
    );

    let summary = controller
        .start(prd_request("PRD plus personas").with_requested_artifacts(vec![
            ArtifactKind::new("persona"),
        ]))
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(executions.load(Ordering::SeqCst), 1);
    let persona = summary
        .subagent_results
        .iter()
        .find(|r| r.subagent_id == "persona")
        .expect("auto persona result");
    assert!(persona.auto);
    let index = store.list_artifacts(&summary.run_id).unwrap();
    assert!(index.iter().any(|a| a.kind == ArtifactKind::new("persona")));
}

#[tokio::test]
async fn failing_verifier_fails_the_run() {
    let (store, _dir) = harness();
    let (registry, _) = persona_registry();
    let controller = GraphController::new(
        scripted_planner(&["prd"], registry.clone()),
        registry,
        Arc::new(RecordingSkillRunner::new()),
        store.clone(),
    )
    .with_verifier(Arc::new(ScriptedVerifier {
        status: VerificationStatus::Fail,
    }));

    let summary = controller.start(prd_request("unverifiable PRD")).await.unwrap();

    assert_eq!(summary.status, RunStatus::Failed);
    let report = summary.verification.expect("verification report");
    assert_eq!(report.status, VerificationStatus::Fail);
    assert_eq!(report.issues.len(), 1);

    let events = store.get_events(&summary.run_id).unwrap();
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&EventKind::VerificationStarted));
    assert!(kinds.contains(&EventKind::VerificationCompleted));
    assert_eq!(kinds.last(), Some(&EventKind::RunFailed));
}

#[tokio::test]
async fn needs_review_verification_freezes_the_run() {
    let (store, _dir) = harness();
    let (registry, _) = persona_registry();
    let controller = GraphController::new(
        scripted_planner(&["prd"], registry.clone()),
        registry,
        Arc::new(RecordingSkillRunner::new()),
        store,
    )
    .with_verifier(Arc::new(ScriptedVerifier {
        status: VerificationStatus::Pass,
    }))
    .with_verifier(Arc::new(ScriptedVerifier {
        status: VerificationStatus::NeedsReview,
    }));

    let summary = controller.start(prd_request("borderline PRD")).await.unwrap();

    // Pessimistic aggregation: pass + needs-review = needs-review
    assert_eq!(summary.status, RunStatus::AwaitingInput);
    let report = summary.verification.expect("verification report");
    assert_eq!(report.status, VerificationStatus::NeedsReview);
    assert!(summary.primary_artifact.is_some());
}

#[tokio::test]
async fn clarifying_skill_freezes_the_run_with_questions() {
    let (store, _dir) = harness();
    let (registry, _) = persona_registry();
    let skills = Arc::new(
        RecordingSkillRunner::new()
            .with_clarification(json!({"questions": ["What platforms?"]})),
    );
    let controller = GraphController::new(
        scripted_planner(&["prd"], registry.clone()),
        registry,
        skills.clone(),
        store,
    );

    let summary = controller.start(prd_request("vague request")).await.unwrap();

    assert_eq!(summary.status, RunStatus::AwaitingInput);
    let clarification = summary.clarification.expect("clarification payload");
    assert_eq!(clarification["questions"][0], "What platforms?");
    // The run froze on the first step; nothing downstream ran
    assert_eq!(skills.count_for("analyze-context"), 0);
}

#[tokio::test]
async fn failing_section_skill_is_fatal_to_the_run() {
    let (store, _dir) = harness();
    let (registry, _) = persona_registry();
    let skills = Arc::new(RecordingSkillRunner::new().with_failing_skill("write-goals"));
    let controller = GraphController::new(
        scripted_planner(&["prd"], registry.clone()),
        registry,
        skills.clone(),
        store.clone(),
    );

    let summary = controller.start(prd_request("doomed goals")).await.unwrap();

    assert_eq!(summary.status, RunStatus::Failed);
    let error = summary.error.as_deref().expect("error message");
    assert!(error.contains("write-goals"));
    assert!(error.contains("scripted failure"));
    // The walk stopped at the failing writer; assembly never ran
    assert_eq!(skills.count_for("write-goals"), 1);
    assert_eq!(skills.count_for("assemble"), 0);

    let events = store.get_events(&summary.run_id).unwrap();
    assert!(events.iter().any(|e| e.kind == EventKind::StepFailed));
    assert_eq!(events.last().unwrap().kind, EventKind::RunFailed);
}

#[tokio::test]
async fn classifier_outage_degrades_to_a_clarification_freeze() {
    let (store, _dir) = harness();
    let (registry, executions) = persona_registry();
    let resolver = IntentResolver::new(Arc::new(UnavailableClassifier), registry.clone());
    let planner = Planner::new(registry.clone(), resolver, SkillCatalog::default_prd());
    let skills = Arc::new(RecordingSkillRunner::new());
    let controller = GraphController::new(planner, registry, skills.clone(), store);

    let summary = controller
        .start(RunRequest::new(ArtifactKind::new("persona"), "???"))
        .await
        .unwrap();

    // An unreachable classifier is never fatal: the run freezes on a
    // minimal clarification plan instead
    assert_eq!(summary.status, RunStatus::AwaitingInput);
    assert_eq!(skills.count_for("clarification-check"), 1);
    assert_eq!(skills.count_for("analyze-context"), 0);
    assert_eq!(executions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unplannable_transition_fails_the_run_before_any_step() {
    let (store, _dir) = harness();
    let (registry, _) = persona_registry();
    let skills = Arc::new(RecordingSkillRunner::new());
    let controller = GraphController::new(
        scripted_planner(&["prd", "story-map"], registry.clone()),
        registry,
        skills.clone(),
        store.clone(),
    );

    let summary = controller
        .start(RunRequest::new(ArtifactKind::new("story-map"), "no producer"))
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Failed);
    assert!(summary.error.as_deref().unwrap().contains("story-map"));
    assert!(skills.invocations().is_empty());

    let events = store.get_events(&summary.run_id).unwrap();
    assert_eq!(events.last().unwrap().kind, EventKind::RunFailed);
    assert!(!events.iter().any(|e| e.kind == EventKind::StepStarted));
}

#[tokio::test]
async fn progress_stream_mirrors_the_durable_log() {
    let (store, _dir) = harness();
    let (registry, _) = persona_registry();
    let (sink, mut rx) = ChannelProgressSink::channel();
    let controller = GraphController::new(
        scripted_planner(&["prd"], registry.clone()),
        registry,
        Arc::new(RecordingSkillRunner::new()),
        store.clone(),
    )
    .with_progress_sink(Arc::new(sink));

    let summary = controller.start(prd_request("mirrored PRD")).await.unwrap();
    assert_eq!(summary.status, RunStatus::Completed);

    let logged: Vec<EventKind> = store
        .get_events(&summary.run_id)
        .unwrap()
        .iter()
        .map(|e| e.kind)
        .collect();
    let mut streamed = Vec::new();
    while let Ok(event) = rx.try_recv() {
        streamed.push(event.kind);
    }
    // Same events, same order: the log is written first, then mirrored
    assert_eq!(logged, streamed);
}

#[tokio::test]
async fn downstream_subagent_receives_the_resumed_steps_artifact() {
    let (store, _dir) = harness();
    let approver = Arc::new(ApprovalSubagent::new("persona", ArtifactKind::new("persona")));
    let research = Arc::new(CountingSubagent::new("research", ArtifactKind::new("research")));
    let mut registry = SubagentRegistry::new();
    register_lifecycle(
        &mut registry,
        SubagentManifest::new("persona", ArtifactKind::new("persona"), vec![ArtifactKind::prd()]),
        approver.clone(),
    );
    register_lifecycle(
        &mut registry,
        SubagentManifest::new(
            "research",
            ArtifactKind::new("research"),
            vec![ArtifactKind::new("persona")],
        ),
        research.clone(),
    );
    let registry = Arc::new(registry);
    let controller = GraphController::new(
        scripted_planner(&["prd", "persona", "research"], registry.clone()),
        registry,
        Arc::new(RecordingSkillRunner::new()),
        store.clone(),
    );

    let frozen = controller
        .start(RunRequest::new(ArtifactKind::new("research"), "full chain"))
        .await
        .unwrap();

    // Frozen at the persona step, before research ever ran
    assert_eq!(frozen.status, RunStatus::AwaitingInput);
    assert_eq!(approver.executions.load(Ordering::SeqCst), 1);
    assert_eq!(research.executions.load(Ordering::SeqCst), 0);
    let blocked_step = frozen.blocked_subagent.unwrap().step_id;

    let resumed = controller
        .resume_subagent(&frozen.run_id, &blocked_step, json!({"approved": true}))
        .await
        .unwrap();

    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(approver.executions.load(Ordering::SeqCst), 2);
    assert_eq!(research.executions.load(Ordering::SeqCst), 1);

    // Research consumed the persona artifact, not the original document
    let persona_id = resumed
        .subagent_results
        .iter()
        .find(|r| r.subagent_id == "persona")
        .and_then(|r| r.artifact_id)
        .expect("persona artifact id");
    let research_id = resumed
        .subagent_results
        .iter()
        .find(|r| r.subagent_id == "research")
        .and_then(|r| r.artifact_id)
        .expect("research artifact id");
    let research_artifact = store.read_artifact(&resumed.run_id, research_id).unwrap();
    assert_eq!(research_artifact.data["source"], persona_id.to_string());
}

#[tokio::test]
async fn one_failing_auto_subagent_does_not_take_down_the_other() {
    let (store, _dir) = harness();
    let persona = Arc::new(CountingSubagent::new("persona", ArtifactKind::new("persona")));
    let mut registry = SubagentRegistry::new();
    register_lifecycle(
        &mut registry,
        SubagentManifest::new("research", ArtifactKind::new("research"), vec![ArtifactKind::prd()]),
        Arc::new(FailingSubagent::new("research")) as Arc<dyn SubagentLifecycle>,
    );
    register_lifecycle(
        &mut registry,
        SubagentManifest::new("persona", ArtifactKind::new("persona"), vec![ArtifactKind::prd()]),
        persona.clone(),
    );
    let registry = Arc::new(registry);
    let controller = GraphController::new(
        scripted_planner(&["prd"], registry.clone()),
        registry,
        Arc::new(RecordingSkillRunner::new()),
        store,
    );

    let summary = controller
        .start(prd_request("PRD plus extras").with_requested_artifacts(vec![
            ArtifactKind::new("research"),
            ArtifactKind::new("persona"),
        ]))
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(persona.executions.load(Ordering::SeqCst), 1);
    assert_eq!(summary.subagent_failures.len(), 1);
    assert_eq!(summary.subagent_failures[0].subagent_id, "research");
    assert!(summary
        .subagent_results
        .iter()
        .any(|r| r.subagent_id == "persona" && r.auto));
}

struct TimeoutInvoker;

#[async_trait::async_trait]
impl ModelInvoker for TimeoutInvoker {
    async fn invoke(&self, _request: ModelRequest) -> Result<ModelResponse, InvocationError> {
        Err(InvocationError::Timeout)
    }
}

#[tokio::test]
async fn non_provider_invocation_error_fails_the_step() {
    let (store, _dir) = harness();
    let (registry, _) = persona_registry();
    let skills = Arc::new(RecordingSkillRunner::new());
    let controller = GraphController::new(
        scripted_planner(&["prd"], registry.clone()),
        registry,
        skills.clone(),
        store,
    )
    .with_invoker(Arc::new(TimeoutInvoker) as Arc<dyn ModelInvoker>);

    let settings = RunSettings::default().with_invocation(
        InvocationSettings::new("test-model").with_retry(RetryPolicy {
            max_attempts: 2,
            backoff: Duration::from_millis(1),
        }),
    );
    let summary = controller
        .start_with_settings(prd_request("timing out"), settings)
        .await
        .unwrap();

    // Timeouts are retried then propagate; no direct-execution fallback
    assert_eq!(summary.status, RunStatus::Failed);
    assert!(summary.error.as_deref().unwrap().contains("timed out"));
    assert!(skills.invocations().is_empty());
}

/// Runner that fires the run's abort signal from inside its first step
struct AbortingSkillRunner;

#[async_trait::async_trait]
impl SkillRunner for AbortingSkillRunner {
    async fn invoke(&self, invocation: SkillInvocation) -> Result<SkillResponse, SkillError> {
        invocation.cancel.cancel();
        Ok(SkillResponse::Completed(SkillResult::output(
            json!({"skill": invocation.skill_id}),
        )))
    }
}

#[tokio::test]
async fn cancellation_raised_inside_a_skill_stops_the_walk() {
    let (store, _dir) = harness();
    let (registry, _) = persona_registry();
    let controller = GraphController::new(
        scripted_planner(&["prd"], registry.clone()),
        registry,
        Arc::new(AbortingSkillRunner),
        store.clone(),
    );

    let summary = controller.start(prd_request("abort mid-run")).await.unwrap();

    assert_eq!(summary.status, RunStatus::Failed);
    assert!(summary.error.as_deref().unwrap().contains("cancelled"));

    // The aborting step itself completed; nothing after it started
    let events = store.get_events(&summary.run_id).unwrap();
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(kinds.iter().filter(|k| **k == EventKind::StepStarted).count(), 1);
    assert_eq!(kinds.iter().filter(|k| **k == EventKind::StepCompleted).count(), 1);
    assert_eq!(kinds.last(), Some(&EventKind::RunFailed));
}

/// Subagent that observes the abort signal it was handed and bows out
struct AbortObservingSubagent {
    id: String,
}

#[async_trait::async_trait]
impl SubagentLifecycle for AbortObservingSubagent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(
        &self,
        request: SubagentRequest,
        _emit: ProgressEmitter,
    ) -> Result<SubagentOutcome, SubagentError> {
        request.cancel.cancel();
        Err(SubagentError::Cancelled)
    }
}

#[tokio::test]
async fn cancelled_subagent_halts_downstream_steps() {
    let (store, _dir) = harness();
    let research = Arc::new(CountingSubagent::new("research", ArtifactKind::new("research")));
    let mut registry = SubagentRegistry::new();
    register_lifecycle(
        &mut registry,
        SubagentManifest::new("persona", ArtifactKind::new("persona"), vec![ArtifactKind::prd()]),
        Arc::new(AbortObservingSubagent {
            id: "persona".to_string(),
        }) as Arc<dyn SubagentLifecycle>,
    );
    register_lifecycle(
        &mut registry,
        SubagentManifest::new(
            "research",
            ArtifactKind::new("research"),
            vec![ArtifactKind::new("persona")],
        ),
        research.clone(),
    );
    let registry = Arc::new(registry);
    let controller = GraphController::new(
        scripted_planner(&["prd", "persona", "research"], registry.clone()),
        registry,
        Arc::new(RecordingSkillRunner::new()),
        store,
    );

    let summary = controller
        .start(RunRequest::new(ArtifactKind::new("research"), "abort chain"))
        .await
        .unwrap();

    // The persona step saw the run token it was handed; its own failure
    // is isolated, and the fired token stops the walk before research
    assert_eq!(summary.status, RunStatus::Failed);
    assert!(summary.error.as_deref().unwrap().contains("cancelled"));
    assert_eq!(summary.subagent_failures.len(), 1);
    assert!(summary.subagent_failures[0].message.contains("cancelled"));
    assert_eq!(research.executions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn resume_reports_the_last_known_summary_for_terminal_runs() {
    let (store, _dir) = harness();
    let (registry, _) = persona_registry();
    let controller = GraphController::new(
        scripted_planner(&["prd"], registry.clone()),
        registry,
        Arc::new(RecordingSkillRunner::new()),
        store,
    );

    let summary = controller.start(prd_request("finished PRD")).await.unwrap();
    assert_eq!(summary.status, RunStatus::Completed);

    let reported = controller.resume(&summary.run_id).unwrap();
    assert_eq!(reported.status, RunStatus::Completed);
    assert_eq!(
        reported.primary_artifact.map(|a| a.id),
        summary.primary_artifact.map(|a| a.id)
    );

    let err = controller.resume(&RunId::new("ghost")).unwrap_err();
    assert!(matches!(err, RunError::RunNotResumable(_)));
}
