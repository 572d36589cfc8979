//! Artifact data model
//!
//! Artifacts are immutable once written. Producing a new version of an
//! artifact means writing a new record with a bumped version number;
//! earlier versions stay in the event log forever.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use ulid::Ulid;

/// Unique artifact identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArtifactId(pub Ulid);

impl ArtifactId {
    /// Generate new artifact ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ArtifactId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Open artifact-kind vocabulary
///
/// Kinds are free-form strings; the constants below cover the kinds the
/// built-in planner and subagents know about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactKind(String);

impl ArtifactKind {
    /// The synthesized kind wrapping the user's raw request
    pub const PROMPT: &'static str = "prompt";
    /// Product requirements document
    pub const PRD: &'static str = "prd";
    /// User personas
    pub const PERSONA: &'static str = "persona";
    /// Research notes
    pub const RESEARCH: &'static str = "research";
    /// Story map
    pub const STORY_MAP: &'static str = "story-map";

    /// Create a kind from any string
    #[inline]
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    /// The `prompt` kind
    #[inline]
    #[must_use]
    pub fn prompt() -> Self {
        Self::new(Self::PROMPT)
    }

    /// The `prd` kind
    #[inline]
    #[must_use]
    pub fn prd() -> Self {
        Self::new(Self::PRD)
    }

    /// Kind name as a string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ArtifactKind {
    fn from(kind: &str) -> Self {
        Self::new(kind)
    }
}

/// A versioned, immutable unit of produced content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Artifact identifier
    pub id: ArtifactId,
    /// Artifact kind
    pub kind: ArtifactKind,
    /// Version number (starts at 1)
    pub version: u32,
    /// Optional human-readable label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Artifact payload
    pub data: Value,
    /// Producer-attached metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Create a new version-1 artifact
    #[must_use]
    pub fn new(kind: ArtifactKind, data: Value) -> Self {
        Self {
            id: ArtifactId::new(),
            kind,
            version: 1,
            label: None,
            data,
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    /// With label
    #[inline]
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// With metadata entry
    #[inline]
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Produce the next version as a fresh record
    ///
    /// The new record gets its own id; the prior version is untouched.
    #[must_use]
    pub fn next_version(&self, data: Value) -> Self {
        Self {
            id: ArtifactId::new(),
            kind: self.kind.clone(),
            version: self.version + 1,
            label: self.label.clone(),
            data,
            metadata: self.metadata.clone(),
            created_at: Utc::now(),
        }
    }

    /// Content hash of the payload (sha256 over canonical JSON)
    #[must_use]
    pub fn content_hash(&self) -> String {
        let canonical = serde_json::to_vec(&self.data).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        hex::encode(hasher.finalize())
    }

    /// Summary view for the workspace index
    #[must_use]
    pub fn summary(&self) -> ArtifactSummary {
        ArtifactSummary {
            id: self.id,
            kind: self.kind.clone(),
            version: self.version,
            label: self.label.clone(),
            content_hash: self.content_hash(),
            created_at: self.created_at,
        }
    }
}

/// Artifact summary stored in the per-run index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSummary {
    /// Artifact identifier
    pub id: ArtifactId,
    /// Artifact kind
    pub kind: ArtifactKind,
    /// Version number
    pub version: u32,
    /// Optional label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Payload content hash
    pub content_hash: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn artifact_id_generation() {
        let id1 = ArtifactId::new();
        let id2 = ArtifactId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn artifact_builder() {
        let artifact = Artifact::new(ArtifactKind::prd(), json!({"title": "Budget app"}))
            .with_label("Budgeting PRD")
            .with_metadata("section_count", json!(4));

        assert_eq!(artifact.kind.as_str(), "prd");
        assert_eq!(artifact.version, 1);
        assert_eq!(artifact.label.as_deref(), Some("Budgeting PRD"));
        assert_eq!(artifact.metadata.get("section_count"), Some(&json!(4)));
    }

    #[test]
    fn next_version_is_a_new_record() {
        let v1 = Artifact::new(ArtifactKind::prd(), json!({"draft": 1}));
        let v2 = v1.next_version(json!({"draft": 2}));

        assert_ne!(v1.id, v2.id);
        assert_eq!(v2.version, 2);
        assert_eq!(v1.version, 1);
        assert_eq!(v2.kind, v1.kind);
    }

    #[test]
    fn content_hash_tracks_payload() {
        let a = Artifact::new(ArtifactKind::prd(), json!({"x": 1}));
        let b = Artifact::new(ArtifactKind::prd(), json!({"x": 1}));
        let c = Artifact::new(ArtifactKind::prd(), json!({"x": 2}));

        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.content_hash(), c.content_hash());
    }

    #[test]
    fn kind_is_open_vocabulary() {
        let kind = ArtifactKind::new("pitch-deck");
        assert_eq!(kind.as_str(), "pitch-deck");
        assert_ne!(kind, ArtifactKind::prd());
    }

    #[test]
    fn summary_round_trip() {
        let artifact = Artifact::new(ArtifactKind::new("persona"), json!([{"name": "Ada"}]));
        let summary = artifact.summary();

        assert_eq!(summary.id, artifact.id);
        assert_eq!(summary.content_hash, artifact.content_hash());

        let encoded = serde_json::to_string(&summary).unwrap();
        let decoded: ArtifactSummary = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.id, artifact.id);
    }
}
