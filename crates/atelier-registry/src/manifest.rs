//! Subagent manifests
//!
//! Static configuration describing a capability: what it creates, what
//! it consumes, and which registered constructor builds it.

use atelier_artifact::ArtifactKind;
use serde::{Deserialize, Serialize};

/// Static description of a pluggable subagent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentManifest {
    /// Stable subagent identifier
    pub id: String,
    /// Artifact kind this subagent produces
    pub creates: ArtifactKind,
    /// Artifact kinds this subagent accepts as input
    ///
    /// An empty list means the subagent can start from anything,
    /// including a bare prompt.
    #[serde(default)]
    pub consumes: Vec<ArtifactKind>,
    /// Registration-table key of the lifecycle constructor
    pub entry: String,
    /// Declared capabilities, informational
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl SubagentManifest {
    /// Create a manifest
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        creates: ArtifactKind,
        consumes: Vec<ArtifactKind>,
    ) -> Self {
        let id = id.into();
        Self {
            entry: id.clone(),
            id,
            creates,
            consumes,
            capabilities: Vec::new(),
        }
    }

    /// With an explicit registration entry key
    #[inline]
    #[must_use]
    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = entry.into();
        self
    }

    /// With declared capabilities
    #[inline]
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Whether this subagent accepts the given kind as input
    #[inline]
    #[must_use]
    pub fn accepts(&self, kind: &ArtifactKind) -> bool {
        self.consumes.is_empty() || self.consumes.contains(kind)
    }
}
