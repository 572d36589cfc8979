//! Subagent registry
//!
//! Manifests are registered next to a compile-time-checked constructor
//! at process start. Lifecycles load on first use and stay cached for
//! the process lifetime; concurrent requests for the same id share one
//! in-flight load instead of loading twice.

use crate::error::RegistryError;
use crate::lifecycle::SubagentLifecycle;
use crate::manifest::SubagentManifest;
use atelier_artifact::ArtifactKind;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Constructor for a subagent lifecycle
pub type LifecycleFactory =
    Arc<dyn Fn() -> Result<Arc<dyn SubagentLifecycle>, RegistryError> + Send + Sync>;

/// Registry of pluggable subagent capabilities
pub struct SubagentRegistry {
    manifests: Vec<SubagentManifest>,
    factories: HashMap<String, LifecycleFactory>,
    cache: DashMap<String, Arc<OnceCell<Arc<dyn SubagentLifecycle>>>>,
}

impl SubagentRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            manifests: Vec::new(),
            factories: HashMap::new(),
            cache: DashMap::new(),
        }
    }

    /// Register a manifest with its lifecycle constructor
    ///
    /// Registration order is preserved and used as the tie-break when
    /// several subagents can satisfy the same transition.
    pub fn register<F>(&mut self, manifest: SubagentManifest, factory: F)
    where
        F: Fn() -> Result<Arc<dyn SubagentLifecycle>, RegistryError> + Send + Sync + 'static,
    {
        self.factories.insert(manifest.entry.clone(), Arc::new(factory));
        self.manifests.push(manifest);
    }

    /// Register a manifest whose constructor is absent
    ///
    /// Loading will fail with a descriptive [`RegistryError::LoadFailed`];
    /// useful for configurations that declare capabilities not present
    /// in this build.
    pub fn register_manifest_only(&mut self, manifest: SubagentManifest) {
        self.manifests.push(manifest);
    }

    /// All registered manifests, in registration order
    #[inline]
    #[must_use]
    pub fn list(&self) -> &[SubagentManifest] {
        &self.manifests
    }

    /// Manifests that accept the given artifact kind as input
    ///
    /// A manifest with an empty `consumes` list matches every kind.
    #[must_use]
    pub fn filter_by_artifact(&self, kind: &ArtifactKind) -> Vec<&SubagentManifest> {
        self.manifests.iter().filter(|m| m.accepts(kind)).collect()
    }

    /// First manifest producing `to`, optionally constrained by source kind
    ///
    /// With `from = None` only manifests with an empty `consumes` list
    /// match, which is what allows a chain to start directly from a
    /// bare prompt.
    #[must_use]
    pub fn find_producer(
        &self,
        from: Option<&ArtifactKind>,
        to: &ArtifactKind,
    ) -> Option<&SubagentManifest> {
        self.manifests.iter().find(|m| {
            &m.creates == to
                && match from {
                    Some(kind) => m.accepts(kind),
                    None => m.consumes.is_empty(),
                }
        })
    }

    /// Artifact kinds any registered subagent can produce
    #[must_use]
    pub fn producible_kinds(&self) -> Vec<ArtifactKind> {
        let mut kinds: Vec<ArtifactKind> = Vec::new();
        for manifest in &self.manifests {
            if !kinds.contains(&manifest.creates) {
                kinds.push(manifest.creates.clone());
            }
        }
        kinds
    }

    /// Load (or return the cached) lifecycle for a subagent id
    ///
    /// Loads lazily; concurrent callers for the same id share one
    /// in-flight load.
    pub async fn create_lifecycle(
        &self,
        id: &str,
    ) -> Result<Arc<dyn SubagentLifecycle>, RegistryError> {
        let manifest = self
            .manifests
            .iter()
            .find(|m| m.id == id)
            .ok_or_else(|| RegistryError::UnknownSubagent { id: id.to_string() })?;

        let cell = self
            .cache
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let lifecycle = cell
            .get_or_try_init(|| async {
                let factory = self.factories.get(&manifest.entry).ok_or_else(|| {
                    RegistryError::LoadFailed {
                        id: manifest.id.clone(),
                        entry: manifest.entry.clone(),
                        message: "no lifecycle constructor registered for entry".to_string(),
                    }
                })?;
                tracing::debug!(subagent = %manifest.id, entry = %manifest.entry, "loading subagent lifecycle");
                factory()
            })
            .await?;

        Ok(lifecycle.clone())
    }
}

impl Default for SubagentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SubagentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubagentRegistry")
            .field("manifests", &self.manifests.len())
            .field("loaded", &self.cache.len())
            .finish()
    }
}
