//! Plan graphs
//!
//! A plan is a DAG of execution steps. Each node is either a skill step
//! (single-shot transformation) or a subagent step (produces a new
//! artifact kind from an existing one). The dependency relation must be
//! acyclic and fully referenced; violations are rejected before any
//! step runs.

use crate::error::PlanError;
use atelier_artifact::ArtifactKind;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use ulid::Ulid;

/// Plan node identifier
///
/// Human-readable string ids (`clarify`, `assemble`, `subagent-persona`)
/// so event payloads and blocked-step descriptors read well.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node id
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

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Unique plan identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanId(pub Ulid);

impl PlanId {
    /// Generate new plan ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The operation a plan node performs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NodeTask {
    /// Single-shot transformation with no independent lifecycle
    Skill {
        /// Catalog skill to invoke
        skill_id: String,
        /// Artifact kind this step delivers, when it delivers one
        #[serde(skip_serializing_if = "Option::is_none")]
        produces: Option<ArtifactKind>,
    },
    /// Pluggable capability producing a new artifact kind
    Subagent {
        /// Registered subagent id
        subagent_id: String,
        /// Artifact kind to feed the subagent
        #[serde(skip_serializing_if = "Option::is_none")]
        source_kind: Option<ArtifactKind>,
        /// Node whose output artifact is the preferred input
        #[serde(skip_serializing_if = "Option::is_none")]
        from_node: Option<NodeId>,
    },
}

/// Informational node status
///
/// Actual run progress lives in the controller's execution context, not
/// the node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeStatus {
    /// Initial status for every constructed node
    #[default]
    Pending,
}

/// One execution step in a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanNode {
    /// Node identifier, unique within the graph
    pub id: NodeId,
    /// Human-readable label
    pub label: String,
    /// The operation to perform
    pub task: NodeTask,
    /// Informational status
    #[serde(default)]
    pub status: NodeStatus,
    /// Ids of nodes that must resolve first
    #[serde(default)]
    pub depends_on: Vec<NodeId>,
    /// Declared input for the step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Value>,
    /// Extra metadata
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl PlanNode {
    /// Create a skill node
    #[must_use]
    pub fn skill(id: impl Into<NodeId>, label: impl Into<String>, skill_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            task: NodeTask::Skill {
                skill_id: skill_id.into(),
                produces: None,
            },
            status: NodeStatus::Pending,
            depends_on: Vec::new(),
            inputs: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Create a subagent node
    #[must_use]
    pub fn subagent(
        id: impl Into<NodeId>,
        label: impl Into<String>,
        subagent_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            task: NodeTask::Subagent {
                subagent_id: subagent_id.into(),
                source_kind: None,
                from_node: None,
            },
            status: NodeStatus::Pending,
            depends_on: Vec::new(),
            inputs: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Add a dependency
    #[inline]
    #[must_use]
    pub fn depends_on(mut self, node_id: impl Into<NodeId>) -> Self {
        self.depends_on.push(node_id.into());
        self
    }

    /// With declared input
    #[inline]
    #[must_use]
    pub fn with_input(mut self, input: Value) -> Self {
        self.inputs = Some(input);
        self
    }

    /// Mark a skill node as delivering an artifact kind
    #[must_use]
    pub fn produces(mut self, kind: ArtifactKind) -> Self {
        if let NodeTask::Skill { produces, .. } = &mut self.task {
            *produces = Some(kind);
        }
        self
    }

    /// Record the source artifact kind on a subagent node
    #[must_use]
    pub fn with_source_kind(mut self, kind: ArtifactKind) -> Self {
        if let NodeTask::Subagent { source_kind, .. } = &mut self.task {
            *source_kind = Some(kind);
        }
        self
    }

    /// Record the contributing node id on a subagent node
    #[must_use]
    pub fn with_from_node(mut self, node_id: NodeId) -> Self {
        if let NodeTask::Subagent { from_node, .. } = &mut self.task {
            *from_node = Some(node_id);
        }
        self
    }
}

/// The DAG of steps from a request to a target artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanGraph {
    /// Plan identifier
    pub id: PlanId,
    /// Target artifact kind of the run
    pub artifact_kind: ArtifactKind,
    /// First runnable node
    pub entry_id: NodeId,
    /// Last node with no further dependents
    pub terminal_node_id: NodeId,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Plan format version
    pub version: u32,
    /// Nodes keyed by id, in insertion order
    pub nodes: IndexMap<NodeId, PlanNode>,
    /// Artifact kinds achieved in order, for observability
    pub transition_path: Vec<ArtifactKind>,
}

impl PlanGraph {
    /// Assemble a graph from ordered nodes
    ///
    /// Fails when no nodes exist, a dependency dangles, or the
    /// dependency relation has a cycle.
    pub fn build(
        artifact_kind: ArtifactKind,
        nodes: Vec<PlanNode>,
        transition_path: Vec<ArtifactKind>,
    ) -> Result<Self, PlanError> {
        let entry_id = nodes
            .first()
            .map(|n| n.id.clone())
            .ok_or_else(|| PlanError::NoViableEntry {
                kind: artifact_kind.clone(),
            })?;
        let terminal_node_id = nodes
            .last()
            .map(|n| n.id.clone())
            .unwrap_or_else(|| entry_id.clone());

        let mut map = IndexMap::with_capacity(nodes.len());
        for node in nodes {
            map.insert(node.id.clone(), node);
        }

        let graph = Self {
            id: PlanId::new(),
            artifact_kind,
            entry_id,
            terminal_node_id,
            created_at: Utc::now(),
            version: 1,
            nodes: map,
            transition_path,
        };
        graph.validate()?;
        Ok(graph)
    }

    /// Validate referential integrity and acyclicity
    pub fn validate(&self) -> Result<(), PlanError> {
        let mut indices = HashMap::with_capacity(self.nodes.len());
        let mut graph = DiGraph::<&NodeId, ()>::new();
        for id in self.nodes.keys() {
            indices.insert(id.clone(), graph.add_node(id));
        }

        for (id, node) in &self.nodes {
            for dep in &node.depends_on {
                let dep_idx = indices.get(dep).ok_or_else(|| PlanError::MissingDependency {
                    node: id.clone(),
                    dependency: dep.clone(),
                })?;
                graph.add_edge(*dep_idx, indices[id], ());
            }
        }

        if is_cyclic_directed(&graph) {
            return Err(PlanError::CycleDetected);
        }
        Ok(())
    }

    /// Compute the execution order
    ///
    /// Repeatedly picks the first node whose dependencies are all
    /// already resolved; when a full pass makes no progress before all
    /// nodes are placed, the graph has a cycle or an unsatisfiable
    /// dependency.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, PlanError> {
        let mut resolved: HashSet<&NodeId> = HashSet::with_capacity(self.nodes.len());
        let mut order = Vec::with_capacity(self.nodes.len());

        while order.len() < self.nodes.len() {
            let mut progressed = false;
            for (id, node) in &self.nodes {
                if resolved.contains(id) {
                    continue;
                }
                let ready = node.depends_on.iter().all(|dep| {
                    if !self.nodes.contains_key(dep) {
                        return false;
                    }
                    resolved.contains(dep)
                });
                if ready {
                    resolved.insert(id);
                    order.push(id.clone());
                    progressed = true;
                }
            }
            if !progressed {
                // Distinguish a dangling reference from a genuine cycle
                for (id, node) in &self.nodes {
                    for dep in &node.depends_on {
                        if !self.nodes.contains_key(dep) {
                            return Err(PlanError::MissingDependency {
                                node: id.clone(),
                                dependency: dep.clone(),
                            });
                        }
                    }
                }
                return Err(PlanError::CycleDetected);
            }
        }
        Ok(order)
    }

    /// Payload for the `plan.created` event
    #[must_use]
    pub fn summary_payload(&self) -> Value {
        json!({
            "plan_id": self.id,
            "artifact_kind": self.artifact_kind,
            "entry_id": self.entry_id,
            "terminal_node_id": self.terminal_node_id,
            "node_count": self.nodes.len(),
            "transition_path": self.transition_path,
        })
    }
}
