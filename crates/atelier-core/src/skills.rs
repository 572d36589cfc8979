//! Skill catalog and runner seam
//!
//! Skills are single-shot transformations with no independent
//! lifecycle: clarification checks, context analysis, section writers,
//! and final assembly. The catalog is static data; execution goes
//! through the [`SkillRunner`] trait so hosts decide how a skill is
//! actually carried out.

use atelier_artifact::{Artifact, RunId};
use crate::plan::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Skill id for the clarification check step
pub const CLARIFY_SKILL: &str = "clarification-check";
/// Skill id for the context analysis step
pub const ANALYZE_SKILL: &str = "analyze-context";
/// Skill id for the final assembly step
pub const ASSEMBLE_SKILL: &str = "assemble";

/// One section-writing skill
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionSkill {
    /// Catalog skill id
    pub skill_id: String,
    /// Document section this skill writes
    pub section: String,
    /// Human-readable label
    pub label: String,
}

impl SectionSkill {
    /// Create a section skill
    #[must_use]
    pub fn new(section: impl Into<String>, label: impl Into<String>) -> Self {
        let section = section.into();
        Self {
            skill_id: format!("write-{section}"),
            section,
            label: label.into(),
        }
    }
}

/// The static catalog of section-writing skills
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillCatalog {
    sections: Vec<SectionSkill>,
}

impl SkillCatalog {
    /// The default PRD section catalog
    #[must_use]
    pub fn default_prd() -> Self {
        Self {
            sections: vec![
                SectionSkill::new("overview", "Write overview"),
                SectionSkill::new("problem", "Write problem statement"),
                SectionSkill::new("goals", "Write goals"),
                SectionSkill::new("user-stories", "Write user stories"),
                SectionSkill::new("requirements", "Write requirements"),
                SectionSkill::new("success-metrics", "Write success metrics"),
            ],
        }
    }

    /// All catalog sections
    #[inline]
    #[must_use]
    pub fn sections(&self) -> &[SectionSkill] {
        &self.sections
    }

    /// Catalog sections restricted to a request
    ///
    /// An empty request means every section, in catalog order. Unknown
    /// requested sections are ignored.
    #[must_use]
    pub fn filter(&self, requested: &[String]) -> Vec<&SectionSkill> {
        if requested.is_empty() {
            return self.sections.iter().collect();
        }
        self.sections
            .iter()
            .filter(|s| requested.contains(&s.section))
            .collect()
    }
}

impl Default for SkillCatalog {
    fn default() -> Self {
        Self::default_prd()
    }
}

/// One skill invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillInvocation {
    /// Catalog skill id
    pub skill_id: String,
    /// Plan node being executed
    pub node_id: NodeId,
    /// Owning run
    pub run_id: RunId,
    /// Step input
    pub input: Value,
    /// Cooperative abort signal for the owning run
    ///
    /// Not persisted; a deserialized invocation gets a fresh,
    /// never-fired token.
    #[serde(skip)]
    pub cancel: CancellationToken,
}

/// Successful skill output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillResult {
    /// Structured output
    pub output: Value,
    /// Execution metadata
    #[serde(default)]
    pub metadata: Value,
    /// Runner confidence (0.0 - 1.0)
    pub confidence: f64,
    /// A fully-formed artifact, when the runner built one itself
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
}

impl SkillResult {
    /// A plain output with full confidence
    #[must_use]
    pub fn output(output: Value) -> Self {
        Self {
            output,
            metadata: Value::Null,
            confidence: 1.0,
            artifact: None,
        }
    }
}

/// What a skill invocation came back with
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum SkillResponse {
    /// The skill ran to completion
    Completed(SkillResult),
    /// The skill needs answers before the run can continue
    NeedsClarification {
        /// Questions for the requester
        questions: Value,
    },
}

/// Skill execution errors
#[derive(Debug, thiserror::Error)]
pub enum SkillError {
    /// The skill ran and failed
    #[error("skill '{skill_id}' failed: {message}")]
    Failed {
        /// Catalog skill id
        skill_id: String,
        /// Failure detail
        message: String,
    },
}

/// Host-provided skill execution capability
#[async_trait::async_trait]
pub trait SkillRunner: Send + Sync {
    /// Execute one skill invocation
    async fn invoke(&self, invocation: SkillInvocation) -> Result<SkillResponse, SkillError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_covers_standard_sections() {
        let catalog = SkillCatalog::default_prd();
        let sections: Vec<&str> = catalog.sections().iter().map(|s| s.section.as_str()).collect();
        assert_eq!(
            sections,
            vec![
                "overview",
                "problem",
                "goals",
                "user-stories",
                "requirements",
                "success-metrics"
            ]
        );
    }

    #[test]
    fn empty_filter_returns_all_in_catalog_order() {
        let catalog = SkillCatalog::default_prd();
        assert_eq!(catalog.filter(&[]).len(), catalog.sections().len());
    }

    #[test]
    fn filter_ignores_unknown_sections() {
        let catalog = SkillCatalog::default_prd();
        let picked = catalog.filter(&["goals".into(), "nonexistent".into()]);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].skill_id, "write-goals");
    }
}
