//! Plan construction
//!
//! Turns a resolved intent into a [`PlanGraph`]. The core document
//! pipeline (clarify, analyze, section writers, assemble) is built from
//! the skill catalog; every remaining intent transition is satisfied by
//! chaining a subagent node behind the step that produces its source
//! artifact.

use crate::error::PlanError;
use crate::intent::{IntentResolver, Transition};
use crate::plan::{NodeId, PlanGraph, PlanNode};
use crate::skills::{SkillCatalog, ANALYZE_SKILL, ASSEMBLE_SKILL, CLARIFY_SKILL};
use crate::types::RunContext;
use atelier_artifact::ArtifactKind;
use atelier_registry::{SubagentManifest, SubagentRegistry};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

/// Node id of the clarification check step
pub const CLARIFY_NODE: &str = "clarify";
/// Node id of the context analysis step
pub const ANALYZE_NODE: &str = "analyze";
/// Node id of the assembly step
pub const ASSEMBLE_NODE: &str = "assemble";

/// Builds plan graphs from run requests
pub struct Planner {
    registry: Arc<SubagentRegistry>,
    resolver: IntentResolver,
    catalog: SkillCatalog,
}

impl Planner {
    /// Create a planner
    #[must_use]
    pub fn new(
        registry: Arc<SubagentRegistry>,
        resolver: IntentResolver,
        catalog: SkillCatalog,
    ) -> Self {
        Self {
            registry,
            resolver,
            catalog,
        }
    }

    /// Build the plan for a run
    ///
    /// Resolves the intent first; a needs-clarification intent yields a
    /// minimal plan whose only step is the clarification check, so the
    /// run freezes with questions instead of failing.
    pub async fn create_plan(&self, ctx: &mut RunContext) -> Result<PlanGraph, PlanError> {
        let intent = self.resolver.resolve(ctx).await;

        if intent.needs_clarification() {
            tracing::info!(run_id = %ctx.run_id, reason = ?intent.reason, "intent needs clarification, planning minimal run");
            let node = PlanNode::skill(CLARIFY_NODE, "Clarify request", CLARIFY_SKILL)
                .with_input(json!({
                    "message": ctx.request.message,
                    "reason": intent.reason,
                }));
            return PlanGraph::build(ctx.request.artifact_kind.clone(), vec![node], vec![]);
        }

        for section in &ctx.request.sections {
            if !self.catalog.sections().iter().any(|s| &s.section == section) {
                return Err(PlanError::MissingSkill(format!("write-{section}")));
            }
        }

        let mut satisfied: Vec<ArtifactKind> = ctx
            .request
            .existing_artifacts
            .iter()
            .map(|a| a.kind.clone())
            .collect();
        let mut nodes: Vec<PlanNode> = Vec::new();
        let mut produced_by: HashMap<ArtifactKind, NodeId> = HashMap::new();
        let mut transition_path: Vec<ArtifactKind> = Vec::new();
        let mut last_node: Option<NodeId> = None;

        for transition in &intent.transitions {
            if satisfied.contains(&transition.to) {
                continue;
            }

            if transition.to == ArtifactKind::prd() {
                let terminal = self.push_document_pipeline(ctx, &satisfied, &mut nodes);
                produced_by.insert(ArtifactKind::prd(), terminal.clone());
                last_node = Some(terminal);
            } else {
                let (manifest, source_kind) =
                    self.find_transition_producer(&satisfied, transition)?;
                let id = NodeId::new(format!("subagent-{}", manifest.id));
                let mut node = PlanNode::subagent(
                    id.clone(),
                    format!("Run {} subagent", manifest.id),
                    manifest.id.clone(),
                );
                if let Some(kind) = &source_kind {
                    node = node.with_source_kind(kind.clone());
                    if let Some(from) = produced_by.get(kind) {
                        node = node.with_from_node(from.clone());
                    }
                }
                if let Some(prev) = &last_node {
                    node = node.depends_on(prev.clone());
                }
                produced_by.insert(transition.to.clone(), id.clone());
                nodes.push(node);
                last_node = Some(id);
            }

            satisfied.push(transition.to.clone());
            transition_path.push(transition.to.clone());
        }

        PlanGraph::build(ctx.request.artifact_kind.clone(), nodes, transition_path)
    }

    /// Append the clarify/analyze/write/assemble chain
    ///
    /// Returns the id of the assembly step, which delivers the document
    /// artifact.
    fn push_document_pipeline(
        &self,
        ctx: &RunContext,
        satisfied: &[ArtifactKind],
        nodes: &mut Vec<PlanNode>,
    ) -> NodeId {
        nodes.push(
            PlanNode::skill(CLARIFY_NODE, "Clarify request", CLARIFY_SKILL).with_input(json!({
                "message": ctx.request.message,
            })),
        );
        nodes.push(
            PlanNode::skill(ANALYZE_NODE, "Analyze context", ANALYZE_SKILL)
                .depends_on(CLARIFY_NODE)
                .with_input(json!({
                    "message": ctx.request.message,
                    "existing": satisfied,
                })),
        );

        let sections = self.catalog.filter(&ctx.request.sections);
        let mut assemble = PlanNode::skill(ASSEMBLE_NODE, "Assemble document", ASSEMBLE_SKILL)
            .produces(ArtifactKind::prd())
            .with_input(json!({
                "sections": sections.iter().map(|s| s.section.clone()).collect::<Vec<_>>(),
            }));

        for skill in sections {
            nodes.push(
                PlanNode::skill(skill.skill_id.clone(), skill.label.clone(), skill.skill_id.clone())
                    .depends_on(ANALYZE_NODE)
                    .with_input(json!({ "section": skill.section })),
            );
            assemble = assemble.depends_on(skill.skill_id.clone());
        }

        nodes.push(assemble);
        NodeId::new(ASSEMBLE_NODE)
    }

    /// Pick the subagent that satisfies a transition
    ///
    /// Source preference: the transition's declared source, then any
    /// already-satisfied kind, then a bare prompt, then a subagent with
    /// no input constraint at all.
    fn find_transition_producer(
        &self,
        satisfied: &[ArtifactKind],
        transition: &Transition,
    ) -> Result<(SubagentManifest, Option<ArtifactKind>), PlanError> {
        if let Some(from) = &transition.from {
            if let Some(manifest) = self.registry.find_producer(Some(from), &transition.to) {
                return Ok((manifest.clone(), Some(from.clone())));
            }
        }
        for kind in satisfied {
            if let Some(manifest) = self.registry.find_producer(Some(kind), &transition.to) {
                return Ok((manifest.clone(), Some(kind.clone())));
            }
        }
        let prompt = ArtifactKind::prompt();
        if let Some(manifest) = self.registry.find_producer(Some(&prompt), &transition.to) {
            return Ok((manifest.clone(), Some(prompt)));
        }
        if let Some(manifest) = self.registry.find_producer(None, &transition.to) {
            return Ok((manifest.clone(), None));
        }
        Err(PlanError::NoSubagentForTransition {
            from: transition.from.clone(),
            to: transition.to.clone(),
        })
    }
}

impl std::fmt::Debug for Planner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Planner").finish_non_exhaustive()
    }
}
