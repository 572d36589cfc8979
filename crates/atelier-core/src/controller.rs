//! Run controller
//!
//! Owns the run state machine: `running` can reach `completed`,
//! `failed`, or `awaiting-input`; a frozen run only moves again through
//! an explicit resume call. Every transition is appended to the
//! workspace event log and mirrored to the progress sink, in that
//! order, so the log is always at least as current as what any
//! collaborator observed.
//!
//! Failure posture: plan construction errors and step failures produce
//! a `Failed` run summary; subagent failures are recorded and never
//! abort the run. Only resume misuse and workspace I/O raise
//! [`RunError`].

use crate::error::RunError;
use crate::invocation::{invoke_with_retry, ModelInvoker, ModelRequest, ModelResponse, ToolSpec};
use crate::plan::{NodeId, NodeTask, PlanGraph, PlanNode};
use crate::planner::Planner;
use crate::skills::{SkillInvocation, SkillResponse, SkillResult, SkillRunner};
use crate::types::{
    BlockedSubagent, FailureStage, NullProgressSink, ProgressEvent, ProgressSink, RunContext,
    RunRequest, RunSettings, RunStatus, RunSummary, SubagentFailure, SubagentResult,
};
use crate::verify::{aggregate, VerificationIssue, VerificationReport, VerificationStatus, Verifier};
use atelier_artifact::{
    Artifact, ArtifactKind, EventKind, RunId, WorkspaceEvent, WorkspaceStore,
};
use atelier_registry::{SubagentOutcome, SubagentRegistry, SubagentRequest};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Everything a paused run needs to pick up where it froze
struct ExecutionContext {
    ctx: RunContext,
    plan: PlanGraph,
    order: Vec<NodeId>,
    completed: HashSet<NodeId>,
    artifacts_by_step: HashMap<NodeId, Artifact>,
    artifacts_by_kind: HashMap<ArtifactKind, Artifact>,
    skill_results: HashMap<NodeId, Value>,
    verification: Option<VerificationReport>,
}

/// How one step left the run loop
enum StepFlow {
    /// Step resolved, keep going
    Continue,
    /// Step failed but the run continues (subagent isolation)
    Isolated(String),
    /// The run froze awaiting external input
    Pause,
    /// The run fails here
    Fail(String),
}

/// What the run loop decided
enum LoopOutcome {
    Completed,
    Paused,
    Failed(String),
}

/// Drives plans to completion
pub struct GraphController {
    planner: Planner,
    registry: Arc<SubagentRegistry>,
    skills: Arc<dyn SkillRunner>,
    invoker: Option<Arc<dyn ModelInvoker>>,
    verifiers: Vec<Arc<dyn Verifier>>,
    store: Arc<WorkspaceStore>,
    progress: Arc<dyn ProgressSink>,
    resumable: DashMap<RunId, ExecutionContext>,
    summaries: DashMap<RunId, RunSummary>,
}

impl GraphController {
    /// Create a controller
    #[must_use]
    pub fn new(
        planner: Planner,
        registry: Arc<SubagentRegistry>,
        skills: Arc<dyn SkillRunner>,
        store: Arc<WorkspaceStore>,
    ) -> Self {
        Self {
            planner,
            registry,
            skills,
            invoker: None,
            verifiers: Vec::new(),
            store,
            progress: Arc::new(NullProgressSink),
            resumable: DashMap::new(),
            summaries: DashMap::new(),
        }
    }

    /// Route skill steps through a model provider
    #[must_use]
    pub fn with_invoker(mut self, invoker: Arc<dyn ModelInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    /// Add a verification gate over the primary artifact
    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifiers.push(verifier);
        self
    }

    /// Mirror run events to a progress sink
    #[must_use]
    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Start a run with default settings
    pub async fn start(&self, request: RunRequest) -> Result<RunSummary, RunError> {
        self.start_with_settings(request, RunSettings::default())
            .await
    }

    /// Start a run
    ///
    /// Returns when the run reaches a terminal status or freezes
    /// awaiting input. Plan construction failures come back as a
    /// `Failed` summary, not an `Err`.
    pub async fn start_with_settings(
        &self,
        request: RunRequest,
        settings: RunSettings,
    ) -> Result<RunSummary, RunError> {
        let run_id = request.run_id.clone().unwrap_or_else(RunId::generate);
        let workspace = self
            .store
            .ensure_workspace(&run_id, &request.artifact_kind)?;
        let mut ctx = RunContext::new(run_id.clone(), request, settings, workspace);

        tracing::info!(run_id = %run_id, kind = %ctx.request.artifact_kind, "run started");
        self.record(
            &run_id,
            EventKind::RunStarted,
            None,
            json!({
                "message": ctx.request.message,
                "artifact_kind": ctx.request.artifact_kind,
            }),
        )?;

        let plan = match self.planner.create_plan(&mut ctx).await {
            Ok(plan) => plan,
            Err(err) => return self.fail(ctx, err.to_string(), None),
        };
        self.record(
            &run_id,
            EventKind::PlanCreated,
            None,
            plan.summary_payload(),
        )?;

        let order = match plan.topological_order() {
            Ok(order) => order,
            Err(err) => return self.fail(ctx, err.to_string(), None),
        };

        let mut exec = ExecutionContext {
            ctx,
            plan,
            order,
            completed: HashSet::new(),
            artifacts_by_step: HashMap::new(),
            artifacts_by_kind: HashMap::new(),
            skill_results: HashMap::new(),
            verification: None,
        };
        for artifact in &exec.ctx.request.existing_artifacts {
            exec.artifacts_by_kind
                .insert(artifact.kind.clone(), artifact.clone());
        }

        self.drive(exec).await
    }

    /// Last known summary for a run, frozen or terminal
    pub fn resume(&self, run_id: &RunId) -> Result<RunSummary, RunError> {
        self.summaries
            .get(run_id)
            .map(|s| s.clone())
            .ok_or_else(|| RunError::RunNotResumable(run_id.clone()))
    }

    /// Resume a run frozen on a subagent approval request
    ///
    /// `step_id` must name the step that froze; the approved plan is
    /// attached to the re-execution and further approval asks are
    /// suppressed. The rest of the plan then continues; already-resolved
    /// steps are not re-executed.
    pub async fn resume_subagent(
        &self,
        run_id: &RunId,
        step_id: &NodeId,
        approved_plan: Value,
    ) -> Result<RunSummary, RunError> {
        let (_, mut exec) = self
            .resumable
            .remove(run_id)
            .ok_or_else(|| RunError::RunNotResumable(run_id.clone()))?;

        let expected = exec.ctx.state.blocked_subagent.as_ref().map(|b| b.step_id.clone());
        if expected.as_ref() != Some(step_id) {
            // Put the frozen run back untouched
            self.resumable.insert(run_id.clone(), exec);
            return Err(RunError::WrongBlockedStep {
                run_id: run_id.clone(),
                expected,
                requested: step_id.clone(),
            });
        }
        exec.ctx.state.blocked_subagent = None;

        tracing::info!(run_id = %run_id, step = %step_id, "resuming run with approved plan");
        let progress = ProgressEvent::new(EventKind::RunStatus, run_id.clone())
            .with_status(RunStatus::Running);
        self.store.append_event(WorkspaceEvent::new(
            run_id.clone(),
            EventKind::RunStatus,
            json!({"status": RunStatus::Running}),
        ))?;
        self.progress.emit(progress);

        let Some(node) = exec.plan.nodes.get(step_id).cloned() else {
            return Err(RunError::WrongBlockedStep {
                run_id: run_id.clone(),
                expected: None,
                requested: step_id.clone(),
            });
        };

        self.record(
            run_id,
            EventKind::StepStarted,
            Some(step_id),
            json!({"step_id": step_id, "label": node.label, "resumed": true}),
        )?;
        let flow = self
            .execute_subagent_step(&mut exec, &node, Some(approved_plan))
            .await?;
        match flow {
            StepFlow::Continue => {
                exec.completed.insert(step_id.clone());
                self.record(
                    run_id,
                    EventKind::StepCompleted,
                    Some(step_id),
                    json!({"step_id": step_id}),
                )?;
            }
            StepFlow::Isolated(message) => {
                exec.completed.insert(step_id.clone());
                self.record(
                    run_id,
                    EventKind::StepFailed,
                    Some(step_id),
                    json!({"step_id": step_id, "error": message}),
                )?;
            }
            StepFlow::Pause => return self.pause(exec),
            StepFlow::Fail(message) => {
                let ExecutionContext {
                    ctx, verification, ..
                } = exec;
                return self.fail(ctx, message, verification);
            }
        }

        self.drive(exec).await
    }

    /// Run the plan until it completes, freezes, or fails
    async fn drive(&self, mut exec: ExecutionContext) -> Result<RunSummary, RunError> {
        match self.run_loop(&mut exec).await? {
            LoopOutcome::Completed => self.finish(exec).await,
            LoopOutcome::Paused => self.pause(exec),
            LoopOutcome::Failed(message) => {
                let ExecutionContext {
                    ctx, verification, ..
                } = exec;
                self.fail(ctx, message, verification)
            }
        }
    }

    /// Walk the topological order, skipping already-resolved steps
    async fn run_loop(&self, exec: &mut ExecutionContext) -> Result<LoopOutcome, RunError> {
        let order = exec.order.clone();
        for node_id in order {
            if exec.completed.contains(&node_id) {
                continue;
            }
            if exec.ctx.cancel().is_cancelled() {
                return Ok(LoopOutcome::Failed("run cancelled".to_string()));
            }

            let Some(node) = exec.plan.nodes.get(&node_id).cloned() else {
                continue;
            };
            self.record(
                &exec.ctx.run_id,
                EventKind::StepStarted,
                Some(&node_id),
                json!({"step_id": node_id, "label": node.label}),
            )?;

            let flow = match &node.task {
                NodeTask::Skill { .. } => self.execute_skill(exec, &node).await?,
                NodeTask::Subagent { .. } => {
                    self.execute_subagent_step(exec, &node, None).await?
                }
            };

            match flow {
                StepFlow::Continue => {
                    exec.completed.insert(node_id.clone());
                    self.record(
                        &exec.ctx.run_id,
                        EventKind::StepCompleted,
                        Some(&node_id),
                        json!({"step_id": node_id}),
                    )?;
                }
                StepFlow::Isolated(message) => {
                    exec.completed.insert(node_id.clone());
                    self.record(
                        &exec.ctx.run_id,
                        EventKind::StepFailed,
                        Some(&node_id),
                        json!({"step_id": node_id, "error": message}),
                    )?;
                }
                StepFlow::Pause => return Ok(LoopOutcome::Paused),
                StepFlow::Fail(message) => {
                    self.record(
                        &exec.ctx.run_id,
                        EventKind::StepFailed,
                        Some(&node_id),
                        json!({"step_id": node_id, "error": message}),
                    )?;
                    return Ok(LoopOutcome::Failed(message));
                }
            }
        }
        Ok(LoopOutcome::Completed)
    }

    /// Execute one skill step
    ///
    /// With a model invoker configured the step goes to the provider
    /// first; a 4xx provider rejection falls back to direct skill
    /// execution rather than failing the run.
    async fn execute_skill(
        &self,
        exec: &mut ExecutionContext,
        node: &PlanNode,
    ) -> Result<StepFlow, RunError> {
        let NodeTask::Skill { skill_id, produces } = &node.task else {
            return Ok(StepFlow::Continue);
        };
        let input = node
            .inputs
            .clone()
            .unwrap_or_else(|| json!({"message": exec.ctx.request.message}));
        let invocation = SkillInvocation {
            skill_id: skill_id.clone(),
            node_id: node.id.clone(),
            run_id: exec.ctx.run_id.clone(),
            input: input.clone(),
            cancel: exec.ctx.cancel().clone(),
        };

        let configured = self
            .invoker
            .as_ref()
            .zip(exec.ctx.settings.invocation.as_ref());
        let response = if let Some((invoker, settings)) = configured {
            let request = ModelRequest {
                model: settings.model.clone(),
                system: format!("Execute the '{skill_id}' skill and return its structured output."),
                user: input,
                tool: Some(ToolSpec {
                    name: skill_id.clone(),
                    description: node.label.clone(),
                    schema: json!({"type": "object"}),
                }),
            };
            match invoke_with_retry(invoker, &request, settings.retry, exec.ctx.cancel()).await {
                Ok(ModelResponse::ToolCall { arguments, .. }) => {
                    SkillResponse::Completed(SkillResult::output(arguments))
                }
                Ok(ModelResponse::Text(text)) => {
                    SkillResponse::Completed(SkillResult::output(json!({"text": text})))
                }
                Err(err) if err.is_provider_failure() => {
                    tracing::warn!(
                        run_id = %exec.ctx.run_id,
                        skill = %skill_id,
                        error = %err,
                        "provider rejected invocation, executing skill directly"
                    );
                    match self.skills.invoke(invocation).await {
                        Ok(response) => response,
                        Err(err) => return Ok(StepFlow::Fail(err.to_string())),
                    }
                }
                Err(err) => return Ok(StepFlow::Fail(err.to_string())),
            }
        } else {
            match self.skills.invoke(invocation).await {
                Ok(response) => response,
                Err(err) => return Ok(StepFlow::Fail(err.to_string())),
            }
        };

        match response {
            SkillResponse::Completed(result) => {
                exec.skill_results
                    .insert(node.id.clone(), result.output.clone());
                let artifact = result.artifact.or_else(|| {
                    produces
                        .clone()
                        .map(|kind| Artifact::new(kind, result.output.clone()))
                });
                if let Some(artifact) = artifact {
                    self.deliver_artifact(exec, Some(&node.id), artifact)?;
                }
                Ok(StepFlow::Continue)
            }
            SkillResponse::NeedsClarification { questions } => {
                exec.ctx.state.pending_clarification = Some(questions.clone());
                self.record(
                    &exec.ctx.run_id,
                    EventKind::RunAwaitingInput,
                    Some(&node.id),
                    json!({"step_id": node.id, "questions": questions}),
                )?;
                Ok(StepFlow::Pause)
            }
        }
    }

    /// Execute one subagent step
    ///
    /// Load and execution failures are recorded against the run and
    /// isolated; they never abort the remaining plan.
    async fn execute_subagent_step(
        &self,
        exec: &mut ExecutionContext,
        node: &PlanNode,
        approval: Option<Value>,
    ) -> Result<StepFlow, RunError> {
        let NodeTask::Subagent {
            subagent_id,
            source_kind,
            from_node,
        } = &node.task
        else {
            return Ok(StepFlow::Continue);
        };
        let run_id = exec.ctx.run_id.clone();

        self.record(
            &run_id,
            EventKind::SubagentStarted,
            Some(&node.id),
            json!({"subagent": subagent_id, "step_id": node.id}),
        )?;

        let lifecycle = match self.registry.create_lifecycle(subagent_id).await {
            Ok(lifecycle) => lifecycle,
            Err(err) => {
                let message = err.to_string();
                tracing::warn!(run_id = %run_id, subagent = %subagent_id, error = %message, "subagent load failed");
                exec.ctx.state.subagent_failures.push(SubagentFailure {
                    subagent_id: subagent_id.clone(),
                    step_id: Some(node.id.clone()),
                    stage: FailureStage::Load,
                    message: message.clone(),
                    auto: false,
                });
                self.record(
                    &run_id,
                    EventKind::SubagentFailed,
                    Some(&node.id),
                    json!({"subagent": subagent_id, "stage": FailureStage::Load, "error": message}),
                )?;
                return Ok(StepFlow::Isolated(message));
            }
        };

        let source = from_node
            .as_ref()
            .and_then(|id| exec.artifacts_by_step.get(id))
            .or_else(|| {
                source_kind
                    .as_ref()
                    .and_then(|kind| exec.artifacts_by_kind.get(kind))
            })
            .or_else(|| exec.artifacts_by_kind.get(&exec.plan.artifact_kind))
            .cloned()
            .unwrap_or_else(|| {
                Artifact::new(
                    ArtifactKind::prompt(),
                    json!({"message": exec.ctx.request.message}),
                )
            });

        let mut request = SubagentRequest::new(run_id.clone(), exec.ctx.request.params.clone())
            .with_source(source)
            .with_cancel(exec.ctx.cancel().clone());
        if let Some(plan) = approval {
            request = request.with_approval(plan);
        }

        let emit = self.progress_emitter(&run_id, subagent_id, Some(&node.id));
        match lifecycle.execute(request, emit).await {
            Ok(SubagentOutcome::Completed { artifact, metadata }) => {
                let kind = artifact
                    .as_ref()
                    .map(|a| a.kind.clone())
                    .or_else(|| self.declared_target(subagent_id))
                    .unwrap_or_else(ArtifactKind::prompt);
                let artifact_id = artifact.as_ref().map(|a| a.id);
                if let Some(artifact) = artifact {
                    self.deliver_artifact(exec, Some(&node.id), artifact)?;
                }
                exec.ctx.state.subagent_results.push(SubagentResult {
                    subagent_id: subagent_id.clone(),
                    kind,
                    artifact_id,
                    auto: false,
                    metadata,
                });
                self.record(
                    &run_id,
                    EventKind::SubagentCompleted,
                    Some(&node.id),
                    json!({"subagent": subagent_id, "artifact_id": artifact_id}),
                )?;
                Ok(StepFlow::Continue)
            }
            Ok(SubagentOutcome::NeedsApproval { plan }) => {
                exec.ctx.state.blocked_subagent = Some(BlockedSubagent {
                    step_id: node.id.clone(),
                    subagent_id: subagent_id.clone(),
                    plan: plan.clone(),
                    requested_at: Utc::now(),
                });
                self.record(
                    &run_id,
                    EventKind::RunAwaitingInput,
                    Some(&node.id),
                    json!({"step_id": node.id, "subagent": subagent_id, "plan": plan}),
                )?;
                Ok(StepFlow::Pause)
            }
            Err(err) => {
                let message = err.to_string();
                tracing::warn!(run_id = %run_id, subagent = %subagent_id, error = %message, "subagent execution failed");
                exec.ctx.state.subagent_failures.push(SubagentFailure {
                    subagent_id: subagent_id.clone(),
                    step_id: Some(node.id.clone()),
                    stage: FailureStage::Execution,
                    message: message.clone(),
                    auto: false,
                });
                self.record(
                    &run_id,
                    EventKind::SubagentFailed,
                    Some(&node.id),
                    json!({"subagent": subagent_id, "stage": FailureStage::Execution, "error": message}),
                )?;
                Ok(StepFlow::Isolated(message))
            }
        }
    }

    /// Resolve the run after every plan step settled
    async fn finish(&self, mut exec: ExecutionContext) -> Result<RunSummary, RunError> {
        let run_id = exec.ctx.run_id.clone();
        let primary = exec
            .artifacts_by_kind
            .get(&exec.plan.artifact_kind)
            .cloned();

        let Some(primary) = primary else {
            let needs_clarification = exec
                .ctx
                .state
                .cached_intent
                .as_ref()
                .is_some_and(|i| i.needs_clarification());
            if needs_clarification {
                // The clarification run resolved; hand the questions back
                let clarification = exec
                    .skill_results
                    .values()
                    .next()
                    .cloned()
                    .or_else(|| exec.ctx.state.pending_clarification.clone());
                exec.ctx.state.pending_clarification = clarification.clone();
                self.record(
                    &run_id,
                    EventKind::RunAwaitingInput,
                    None,
                    json!({"clarification": clarification}),
                )?;
                let summary = self.build_summary(&exec, RunStatus::AwaitingInput, None)?;
                self.summaries.insert(run_id, summary.clone());
                return Ok(summary);
            }
            let ExecutionContext {
                ctx, verification, ..
            } = exec;
            let kind = ctx.request.artifact_kind.clone();
            return self.fail(
                ctx,
                format!("run produced no primary artifact of kind '{kind}'"),
                verification,
            );
        };

        if !self.verifiers.is_empty() {
            self.record(
                &run_id,
                EventKind::VerificationStarted,
                None,
                json!({"artifact_id": primary.id, "verifiers": self.verifiers.len()}),
            )?;
            let mut reports = Vec::with_capacity(self.verifiers.len());
            for verifier in &self.verifiers {
                let report = match verifier.verify(&primary).await {
                    Ok(report) => report,
                    Err(err) => VerificationReport::with_issues(
                        VerificationStatus::Fail,
                        vec![VerificationIssue::new(format!(
                            "verifier '{}' errored: {err}",
                            verifier.name()
                        ))],
                    ),
                };
                reports.push(report);
            }
            let report = aggregate(reports);
            self.record(
                &run_id,
                EventKind::VerificationCompleted,
                None,
                json!({"status": report.status, "issues": report.issues.len()}),
            )?;
            exec.verification = Some(report.clone());

            match report.status {
                VerificationStatus::Fail => {
                    let ExecutionContext {
                        ctx, verification, ..
                    } = exec;
                    return self.fail(
                        ctx,
                        "verification failed for primary artifact".to_string(),
                        verification,
                    );
                }
                VerificationStatus::NeedsReview => {
                    self.record(
                        &run_id,
                        EventKind::RunAwaitingInput,
                        None,
                        json!({"reason": "verification-needs-review"}),
                    )?;
                    let summary =
                        self.build_summary(&exec, RunStatus::AwaitingInput, Some(&primary))?;
                    self.summaries.insert(run_id, summary.clone());
                    return Ok(summary);
                }
                VerificationStatus::Pass => {}
            }
        }

        self.run_auto_subagents(&mut exec, &primary).await?;

        self.record(
            &run_id,
            EventKind::RunCompleted,
            None,
            json!({"artifact_id": primary.id, "kind": primary.kind}),
        )?;
        tracing::info!(run_id = %run_id, artifact = %primary.id, "run completed");
        let summary = self.build_summary(&exec, RunStatus::Completed, Some(&primary))?;
        self.summaries.insert(run_id, summary.clone());
        Ok(summary)
    }

    /// Supplementary runs for requested kinds no plan step produced
    ///
    /// Approval requests cannot be honored here; a subagent that asks
    /// for one is recorded as skipped rather than freezing a run that
    /// already delivered its primary artifact.
    async fn run_auto_subagents(
        &self,
        exec: &mut ExecutionContext,
        primary: &Artifact,
    ) -> Result<(), RunError> {
        let requested = exec.ctx.request.requested_artifacts.clone();
        let run_id = exec.ctx.run_id.clone();

        for kind in requested {
            if exec.artifacts_by_kind.contains_key(&kind) {
                continue;
            }
            let Some(manifest) = self
                .registry
                .find_producer(Some(&primary.kind), &kind)
                .or_else(|| self.registry.find_producer(None, &kind))
                .cloned()
            else {
                tracing::debug!(run_id = %run_id, kind = %kind, "no producer for requested kind, skipping");
                continue;
            };

            self.record(
                &run_id,
                EventKind::SubagentStarted,
                None,
                json!({"subagent": manifest.id, "auto": true}),
            )?;
            let lifecycle = match self.registry.create_lifecycle(&manifest.id).await {
                Ok(lifecycle) => lifecycle,
                Err(err) => {
                    exec.ctx.state.subagent_failures.push(SubagentFailure {
                        subagent_id: manifest.id.clone(),
                        step_id: None,
                        stage: FailureStage::Load,
                        message: err.to_string(),
                        auto: true,
                    });
                    self.record(
                        &run_id,
                        EventKind::SubagentFailed,
                        None,
                        json!({"subagent": manifest.id, "stage": FailureStage::Load, "error": err.to_string()}),
                    )?;
                    continue;
                }
            };

            let request = SubagentRequest::new(run_id.clone(), exec.ctx.request.params.clone())
                .with_source(primary.clone())
                .with_cancel(exec.ctx.cancel().clone());
            let emit = self.progress_emitter(&run_id, &manifest.id, None);
            match lifecycle.execute(request, emit).await {
                Ok(SubagentOutcome::Completed { artifact, metadata }) => {
                    let artifact_id = artifact.as_ref().map(|a| a.id);
                    let produced_kind = artifact
                        .as_ref()
                        .map(|a| a.kind.clone())
                        .unwrap_or_else(|| manifest.creates.clone());
                    if let Some(artifact) = artifact {
                        self.deliver_artifact(exec, None, artifact)?;
                    }
                    exec.ctx.state.subagent_results.push(SubagentResult {
                        subagent_id: manifest.id.clone(),
                        kind: produced_kind,
                        artifact_id,
                        auto: true,
                        metadata,
                    });
                    self.record(
                        &run_id,
                        EventKind::SubagentCompleted,
                        None,
                        json!({"subagent": manifest.id, "artifact_id": artifact_id, "auto": true}),
                    )?;
                }
                Ok(SubagentOutcome::NeedsApproval { .. }) => {
                    let message = "approval required, skipped in auto mode".to_string();
                    exec.ctx.state.subagent_failures.push(SubagentFailure {
                        subagent_id: manifest.id.clone(),
                        step_id: None,
                        stage: FailureStage::Execution,
                        message: message.clone(),
                        auto: true,
                    });
                    self.record(
                        &run_id,
                        EventKind::SubagentFailed,
                        None,
                        json!({"subagent": manifest.id, "error": message, "auto": true}),
                    )?;
                }
                Err(err) => {
                    exec.ctx.state.subagent_failures.push(SubagentFailure {
                        subagent_id: manifest.id.clone(),
                        step_id: None,
                        stage: FailureStage::Execution,
                        message: err.to_string(),
                        auto: true,
                    });
                    self.record(
                        &run_id,
                        EventKind::SubagentFailed,
                        None,
                        json!({"subagent": manifest.id, "stage": FailureStage::Execution, "error": err.to_string(), "auto": true}),
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Freeze the run and park it in the resumable table
    fn pause(&self, mut exec: ExecutionContext) -> Result<RunSummary, RunError> {
        let run_id = exec.ctx.run_id.clone();
        tracing::info!(run_id = %run_id, "run awaiting input");
        let primary = exec
            .artifacts_by_kind
            .get(&exec.plan.artifact_kind)
            .cloned();
        let summary = self.build_summary(&exec, RunStatus::AwaitingInput, primary.as_ref())?;
        self.summaries.insert(run_id.clone(), summary.clone());
        self.resumable.insert(run_id, exec);
        Ok(summary)
    }

    /// Record a run failure and build its summary
    fn fail(
        &self,
        ctx: RunContext,
        message: String,
        verification: Option<VerificationReport>,
    ) -> Result<RunSummary, RunError> {
        let run_id = ctx.run_id.clone();
        tracing::warn!(run_id = %run_id, error = %message, "run failed");
        self.record(
            &run_id,
            EventKind::RunFailed,
            None,
            json!({"error": message}),
        )?;
        let summary = RunSummary {
            run_id: run_id.clone(),
            status: RunStatus::Failed,
            artifact_kind: ctx.request.artifact_kind.clone(),
            primary_artifact: None,
            artifacts: self.store.list_artifacts(&run_id)?,
            subagent_results: ctx.state.subagent_results.clone(),
            subagent_failures: ctx.state.subagent_failures.clone(),
            verification,
            blocked_subagent: None,
            clarification: None,
            error: Some(message),
        };
        self.summaries.insert(run_id, summary.clone());
        Ok(summary)
    }

    /// Assemble a summary from the execution context
    fn build_summary(
        &self,
        exec: &ExecutionContext,
        status: RunStatus,
        primary: Option<&Artifact>,
    ) -> Result<RunSummary, RunError> {
        Ok(RunSummary {
            run_id: exec.ctx.run_id.clone(),
            status,
            artifact_kind: exec.plan.artifact_kind.clone(),
            primary_artifact: primary.cloned(),
            artifacts: self.store.list_artifacts(&exec.ctx.run_id)?,
            subagent_results: exec.ctx.state.subagent_results.clone(),
            subagent_failures: exec.ctx.state.subagent_failures.clone(),
            verification: exec.verification.clone(),
            blocked_subagent: exec.ctx.state.blocked_subagent.clone(),
            clarification: exec.ctx.state.pending_clarification.clone(),
            error: None,
        })
    }

    /// Persist an artifact, index it, and announce delivery
    fn deliver_artifact(
        &self,
        exec: &mut ExecutionContext,
        step: Option<&NodeId>,
        artifact: Artifact,
    ) -> Result<(), RunError> {
        self.store.write_artifact(&exec.ctx.run_id, &artifact)?;
        self.record(
            &exec.ctx.run_id,
            EventKind::ArtifactDelivered,
            step,
            json!({
                "artifact_id": artifact.id,
                "kind": artifact.kind,
                "version": artifact.version,
                "content_hash": artifact.content_hash(),
            }),
        )?;
        if let Some(step) = step {
            exec.artifacts_by_step.insert(step.clone(), artifact.clone());
        }
        exec.artifacts_by_kind.insert(artifact.kind.clone(), artifact);
        Ok(())
    }

    /// Progress callback handed to a subagent lifecycle
    ///
    /// Each callback lands in the event log first, then on the sink.
    /// Log append failures inside the callback are logged and dropped;
    /// a progress tick is not worth aborting a running subagent.
    fn progress_emitter(
        &self,
        run_id: &RunId,
        subagent_id: &str,
        step: Option<&NodeId>,
    ) -> atelier_registry::ProgressEmitter {
        let store = self.store.clone();
        let sink = self.progress.clone();
        let run_id = run_id.clone();
        let subagent_id = subagent_id.to_string();
        let step = step.cloned();
        Arc::new(move |payload: Value| {
            let payload = json!({"subagent": subagent_id, "progress": payload});
            if let Err(err) = store.append_event(WorkspaceEvent::new(
                run_id.clone(),
                EventKind::SubagentProgress,
                payload.clone(),
            )) {
                tracing::warn!(run_id = %run_id, error = %err, "failed to log subagent progress");
            }
            let mut event =
                ProgressEvent::new(EventKind::SubagentProgress, run_id.clone()).with_payload(payload);
            if let Some(step) = &step {
                event = event.with_step(step.clone());
            }
            sink.emit(event);
        })
    }

    /// Declared target kind of a registered subagent
    fn declared_target(&self, subagent_id: &str) -> Option<ArtifactKind> {
        self.registry
            .list()
            .iter()
            .find(|m| m.id == subagent_id)
            .map(|m| m.creates.clone())
    }

    /// Append to the event log, then mirror to the progress sink
    fn record(
        &self,
        run_id: &RunId,
        kind: EventKind,
        step: Option<&NodeId>,
        payload: Value,
    ) -> Result<(), RunError> {
        self.store.append_event(WorkspaceEvent::new(
            run_id.clone(),
            kind,
            payload.clone(),
        ))?;
        let mut event = ProgressEvent::new(kind, run_id.clone()).with_payload(payload);
        if let Some(step) = step {
            event = event.with_step(step.clone());
        }
        self.progress.emit(event);
        Ok(())
    }
}

impl std::fmt::Debug for GraphController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphController")
            .field("verifiers", &self.verifiers.len())
            .field("resumable", &self.resumable.len())
            .finish_non_exhaustive()
    }
}
