//! Intent resolution
//!
//! Turns a free-form request plus already-held artifacts into a
//! structured [`ArtifactIntent`]. Resolution never fails: classifier
//! trouble degrades to a `needs-clarification` intent carrying a reason
//! code, which is a normal outcome, not an error.

use crate::types::RunContext;
use atelier_artifact::ArtifactKind;
use atelier_registry::SubagentRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One artifact-kind transition in the intent chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// Source kind; absent when the chain starts from nothing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<ArtifactKind>,
    /// Target kind
    pub to: ArtifactKind,
}

impl Transition {
    /// Create a transition
    #[inline]
    #[must_use]
    pub fn new(from: Option<ArtifactKind>, to: ArtifactKind) -> Self {
        Self { from, to }
    }
}

/// Terminal classification outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntentStatus {
    /// Target and chain identified
    Resolved,
    /// The request needs a human clarification round first
    NeedsClarification,
}

/// Why clarification is needed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClarificationReason {
    /// The classification capability errored or was unreachable
    ClassifierUnavailable,
    /// Classification produced no target artifact
    NoTargetIdentified,
    /// Classification produced a target but an empty chain
    EmptyChain,
}

/// The resolved interpretation of a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactIntent {
    /// The originating request message
    pub source: String,
    /// Artifact kinds the caller explicitly asked for
    pub requested_artifacts: Vec<ArtifactKind>,
    /// Target artifact kind, when identified
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_artifact: Option<ArtifactKind>,
    /// Ordered artifact-kind transitions to reach the target
    pub transitions: Vec<Transition>,
    /// Classifier confidence (0.0 - 1.0)
    pub confidence: f64,
    /// Resolution status
    pub status: IntentStatus,
    /// Reason code, present only for needs-clarification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ClarificationReason>,
}

impl ArtifactIntent {
    /// Whether this intent requires a clarification round
    #[inline]
    #[must_use]
    pub fn needs_clarification(&self) -> bool {
        self.status == IntentStatus::NeedsClarification
    }

    /// Build a needs-clarification intent
    #[must_use]
    pub fn clarification(
        source: impl Into<String>,
        requested: Vec<ArtifactKind>,
        reason: ClarificationReason,
    ) -> Self {
        Self {
            source: source.into(),
            requested_artifacts: requested,
            target_artifact: None,
            transitions: Vec::new(),
            confidence: 0.0,
            status: IntentStatus::NeedsClarification,
            reason: Some(reason),
        }
    }
}

/// Classifier output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    /// Identified target artifact kind
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<ArtifactKind>,
    /// Ordered artifact-kind chain ending at the target
    pub chain: Vec<ArtifactKind>,
    /// Confidence (0.0 - 1.0)
    pub confidence: f64,
}

/// Classification capability errors
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    /// Capability unreachable
    #[error("classifier unavailable: {0}")]
    Unavailable(String),

    /// Capability returned something unusable
    #[error("classifier returned invalid output: {0}")]
    Invalid(String),
}

/// External classification capability
#[async_trait::async_trait]
pub trait Classifier: Send + Sync {
    /// Classify a request against the reachable artifact kinds
    async fn classify(
        &self,
        message: &str,
        reachable: &[ArtifactKind],
    ) -> Result<Classification, ClassifierError>;
}

/// Resolves requests into artifact intents
pub struct IntentResolver {
    classifier: Arc<dyn Classifier>,
    registry: Arc<SubagentRegistry>,
}

impl IntentResolver {
    /// Create a resolver
    #[must_use]
    pub fn new(classifier: Arc<dyn Classifier>, registry: Arc<SubagentRegistry>) -> Self {
        Self {
            classifier,
            registry,
        }
    }

    /// Resolve the intent for a run
    ///
    /// Memoized on the run state: repeat calls within the same run
    /// return the cached intent unchanged.
    pub async fn resolve(&self, ctx: &mut RunContext) -> ArtifactIntent {
        if let Some(cached) = &ctx.state.cached_intent {
            return cached.clone();
        }

        let existing: Vec<ArtifactKind> = ctx
            .request
            .existing_artifacts
            .iter()
            .map(|a| a.kind.clone())
            .collect();
        let reachable = self.reachable_kinds(ctx, &existing);

        let intent = match self
            .classifier
            .classify(&ctx.request.message, &reachable)
            .await
        {
            Ok(classification) => self.intent_from_classification(ctx, classification, &existing),
            Err(err) => {
                tracing::warn!(run_id = %ctx.run_id, error = %err, "classification failed, degrading to clarification");
                ArtifactIntent::clarification(
                    ctx.request.message.clone(),
                    ctx.request.requested_artifacts.clone(),
                    ClarificationReason::ClassifierUnavailable,
                )
            }
        };

        ctx.state.cached_intent = Some(intent.clone());
        intent
    }

    /// Kinds currently reachable: held artifacts, the requested kind,
    /// and everything any registered subagent can produce
    fn reachable_kinds(&self, ctx: &RunContext, existing: &[ArtifactKind]) -> Vec<ArtifactKind> {
        let mut reachable: Vec<ArtifactKind> = existing.to_vec();
        for kind in std::iter::once(&ctx.request.artifact_kind)
            .chain(ctx.request.requested_artifacts.iter())
        {
            if !reachable.contains(kind) {
                reachable.push(kind.clone());
            }
        }
        for kind in self.registry.producible_kinds() {
            if !reachable.contains(&kind) {
                reachable.push(kind);
            }
        }
        reachable
    }

    fn intent_from_classification(
        &self,
        ctx: &RunContext,
        classification: Classification,
        existing: &[ArtifactKind],
    ) -> ArtifactIntent {
        let Some(target) = classification.target else {
            return ArtifactIntent::clarification(
                ctx.request.message.clone(),
                ctx.request.requested_artifacts.clone(),
                ClarificationReason::NoTargetIdentified,
            );
        };
        if classification.chain.is_empty() {
            return ArtifactIntent::clarification(
                ctx.request.message.clone(),
                ctx.request.requested_artifacts.clone(),
                ClarificationReason::EmptyChain,
            );
        }

        // Deduplicate while preserving order
        let mut chain: Vec<ArtifactKind> = Vec::with_capacity(classification.chain.len());
        for kind in classification.chain {
            if !chain.contains(&kind) {
                chain.push(kind);
            }
        }

        // Drop intermediate links whose artifact already exists, except
        // the final target
        let last = chain.len() - 1;
        let chain: Vec<ArtifactKind> = chain
            .into_iter()
            .enumerate()
            .filter(|(i, kind)| *i == last || !existing.contains(kind))
            .map(|(_, kind)| kind)
            .collect();

        let transitions = pairwise_transitions(&chain, existing);

        ArtifactIntent {
            source: ctx.request.message.clone(),
            requested_artifacts: ctx.request.requested_artifacts.clone(),
            target_artifact: Some(target),
            transitions,
            confidence: classification.confidence,
            status: IntentStatus::Resolved,
            reason: None,
        }
    }
}

impl std::fmt::Debug for IntentResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentResolver").finish_non_exhaustive()
    }
}

/// Build pairwise transitions from an ordered kind chain
///
/// A chain that does not open with `prompt` or an already-held kind
/// still needs its first element produced, so a head transition is
/// synthesized for it (from an already-held kind when one exists,
/// otherwise from nothing).
fn pairwise_transitions(chain: &[ArtifactKind], existing: &[ArtifactKind]) -> Vec<Transition> {
    let mut transitions = Vec::new();
    if let Some(first) = chain.first() {
        if *first != ArtifactKind::prompt() && !existing.contains(first) {
            transitions.push(Transition::new(existing.first().cloned(), first.clone()));
        }
    }
    transitions.extend(
        chain
            .windows(2)
            .map(|pair| Transition::new(Some(pair[0].clone()), pair[1].clone())),
    );
    transitions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(names: &[&str]) -> Vec<ArtifactKind> {
        names.iter().map(|n| ArtifactKind::new(*n)).collect()
    }

    #[test]
    fn pairwise_builds_ordered_transitions() {
        let transitions = pairwise_transitions(&kinds(&["prompt", "prd", "persona"]), &[]);
        assert_eq!(transitions.len(), 2);
        assert_eq!(transitions[0].from, Some(ArtifactKind::prompt()));
        assert_eq!(transitions[0].to, ArtifactKind::prd());
        assert_eq!(transitions[1].from, Some(ArtifactKind::prd()));
        assert_eq!(transitions[1].to, ArtifactKind::new("persona"));
    }

    #[test]
    fn headless_chain_gets_a_synthesized_first_transition() {
        let transitions = pairwise_transitions(&kinds(&["prd", "persona"]), &[]);
        assert_eq!(transitions.len(), 2);
        assert_eq!(transitions[0].from, None);
        assert_eq!(transitions[0].to, ArtifactKind::prd());
        assert_eq!(transitions[1].from, Some(ArtifactKind::prd()));
        assert_eq!(transitions[1].to, ArtifactKind::new("persona"));
    }

    #[test]
    fn single_element_chain_uses_existing_kind_as_source() {
        let transitions =
            pairwise_transitions(&kinds(&["persona"]), &kinds(&["prd"]));
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].from, Some(ArtifactKind::prd()));
    }

    #[test]
    fn clarification_intent_shape() {
        let intent = ArtifactIntent::clarification(
            "do something",
            vec![],
            ClarificationReason::NoTargetIdentified,
        );
        assert!(intent.needs_clarification());
        assert!(intent.target_artifact.is_none());
        assert!(intent.transitions.is_empty());
        assert_eq!(intent.reason, Some(ClarificationReason::NoTargetIdentified));
    }
}
