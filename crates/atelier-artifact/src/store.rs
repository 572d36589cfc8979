//! Durable per-run workspace store
//!
//! On-disk layout, one directory per run:
//!
//! ```text
//! <run-root>/artifacts/index.json        # array of artifact summaries
//! <run-root>/artifacts/<artifactId>.json # full artifact snapshot
//! <run-root>/events/events.jsonl         # one WorkspaceEvent per line
//! ```
//!
//! All writes for a run are expected to come from a single controller
//! at a time; the store serializes appends per run but does not
//! arbitrate concurrent writers beyond that. An ephemeral store keeps
//! the same records in memory for runs with persistence disabled.

use crate::artifact::{Artifact, ArtifactId, ArtifactKind, ArtifactSummary};
use crate::error::StoreError;
use crate::event::{EventId, RunId, WorkspaceEvent};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Handle to a provisioned run workspace
#[derive(Debug, Clone)]
pub struct WorkspaceHandle {
    /// Owning run
    pub run_id: RunId,
    /// Target artifact kind the run was provisioned for
    pub artifact_kind: ArtifactKind,
    /// Run root directory (unused when persistence is disabled)
    pub root: PathBuf,
    /// Whether records are written to disk
    pub persisted: bool,
}

#[derive(Debug, Default)]
struct MemoryWorkspace {
    artifacts: Vec<Artifact>,
    events: Vec<WorkspaceEvent>,
}

/// Per-run artifact snapshots plus the append-only event log
#[derive(Debug)]
pub struct WorkspaceStore {
    root: PathBuf,
    persist: bool,
    handles: DashMap<RunId, WorkspaceHandle>,
    append_locks: DashMap<RunId, Arc<Mutex<()>>>,
    memory: DashMap<RunId, Arc<Mutex<MemoryWorkspace>>>,
}

impl WorkspaceStore {
    /// Create a persistent store rooted at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            persist: true,
            handles: DashMap::new(),
            append_locks: DashMap::new(),
            memory: DashMap::new(),
        }
    }

    /// Create a store that keeps everything in memory
    ///
    /// Used for runs with persistence disabled; the contract is the
    /// same but `teardown` is the only way records disappear.
    #[must_use]
    pub fn ephemeral() -> Self {
        Self {
            root: PathBuf::new(),
            persist: false,
            handles: DashMap::new(),
            append_locks: DashMap::new(),
            memory: DashMap::new(),
        }
    }

    /// Whether this store writes to disk
    #[inline]
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.persist
    }

    /// Provision (or return the existing) workspace for a run
    ///
    /// Idempotent: calling twice for the same run returns the same
    /// descriptor.
    pub fn ensure_workspace(
        &self,
        run_id: &RunId,
        artifact_kind: &ArtifactKind,
    ) -> Result<WorkspaceHandle, StoreError> {
        if let Some(handle) = self.handles.get(run_id) {
            return Ok(handle.clone());
        }

        let root = self.run_root(run_id);
        if self.persist {
            fs::create_dir_all(root.join("artifacts"))?;
            fs::create_dir_all(root.join("events"))?;
        } else {
            self.memory
                .entry(run_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(MemoryWorkspace::default())));
        }

        let handle = WorkspaceHandle {
            run_id: run_id.clone(),
            artifact_kind: artifact_kind.clone(),
            root,
            persisted: self.persist,
        };
        self.handles.insert(run_id.clone(), handle.clone());
        tracing::debug!(run_id = %run_id, kind = %artifact_kind, "workspace provisioned");
        Ok(handle)
    }

    /// Upsert an artifact snapshot into the run's index
    ///
    /// Keyed by artifact id: writing the same id twice updates the
    /// single index entry in place.
    pub fn write_artifact(&self, run_id: &RunId, artifact: &Artifact) -> Result<(), StoreError> {
        self.require_known(run_id)?;

        if !self.persist {
            let slot = self.memory_slot(run_id)?;
            let mut ws = slot.lock();
            match ws.artifacts.iter_mut().find(|a| a.id == artifact.id) {
                Some(existing) => *existing = artifact.clone(),
                None => ws.artifacts.push(artifact.clone()),
            }
            return Ok(());
        }

        let lock = self.append_lock(run_id);
        let _guard = lock.lock();

        let artifacts_dir = self.run_root(run_id).join("artifacts");
        let snapshot = artifacts_dir.join(format!("{}.json", artifact.id));
        write_json(&snapshot, artifact)?;

        let index_path = artifacts_dir.join("index.json");
        let mut index: Vec<ArtifactSummary> = read_json_or_default(&index_path)?;
        match index.iter_mut().find(|s| s.id == artifact.id) {
            Some(entry) => *entry = artifact.summary(),
            None => index.push(artifact.summary()),
        }
        write_json(&index_path, &index)?;

        tracing::debug!(run_id = %run_id, artifact_id = %artifact.id, kind = %artifact.kind, "artifact written");
        Ok(())
    }

    /// Read back a full artifact snapshot
    pub fn read_artifact(&self, run_id: &RunId, id: ArtifactId) -> Result<Artifact, StoreError> {
        self.require_known(run_id)?;

        if !self.persist {
            let slot = self.memory_slot(run_id)?;
            let ws = slot.lock();
            return ws
                .artifacts
                .iter()
                .find(|a| a.id == id)
                .cloned()
                .ok_or(StoreError::ArtifactNotFound(id));
        }

        let path = self
            .run_root(run_id)
            .join("artifacts")
            .join(format!("{id}.json"));
        if !path.exists() {
            return Err(StoreError::ArtifactNotFound(id));
        }
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// List the run's artifact index
    pub fn list_artifacts(&self, run_id: &RunId) -> Result<Vec<ArtifactSummary>, StoreError> {
        self.require_known(run_id)?;

        if !self.persist {
            let slot = self.memory_slot(run_id)?;
            let ws = slot.lock();
            return Ok(ws.artifacts.iter().map(Artifact::summary).collect());
        }

        let index_path = self.run_root(run_id).join("artifacts").join("index.json");
        read_json_or_default(&index_path)
    }

    /// Append one event line
    ///
    /// Events for a run are appended in occurrence order and never
    /// reordered or rewritten.
    pub fn append_event(&self, event: WorkspaceEvent) -> Result<EventId, StoreError> {
        self.require_known(&event.run_id)?;
        let event_id = event.id;

        if !self.persist {
            let slot = self.memory_slot(&event.run_id)?;
            slot.lock().events.push(event);
            return Ok(event_id);
        }

        let lock = self.append_lock(&event.run_id);
        let _guard = lock.lock();

        let path = self.run_root(&event.run_id).join("events").join("events.jsonl");
        let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        let line = serde_json::to_string(&event)?;
        writeln!(file, "{line}")?;
        Ok(event_id)
    }

    /// Read and parse the full event log
    pub fn get_events(&self, run_id: &RunId) -> Result<Vec<WorkspaceEvent>, StoreError> {
        self.require_known(run_id)?;

        if !self.persist {
            let slot = self.memory_slot(run_id)?;
            return Ok(slot.lock().events.clone());
        }

        let path = self.run_root(run_id).join("events").join("events.jsonl");
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(path)?;
        let mut events = Vec::new();
        for (i, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let event = serde_json::from_str(line).map_err(|e| StoreError::CorruptLog {
                line: i + 1,
                message: e.to_string(),
            })?;
            events.push(event);
        }
        Ok(events)
    }

    /// Delete all state for a run
    pub fn teardown(&self, run_id: &RunId) -> Result<(), StoreError> {
        self.handles.remove(run_id);
        self.append_locks.remove(run_id);
        self.memory.remove(run_id);

        if self.persist {
            let root = self.run_root(run_id);
            if root.exists() {
                fs::remove_dir_all(root)?;
            }
        }
        tracing::debug!(run_id = %run_id, "workspace torn down");
        Ok(())
    }

    fn run_root(&self, run_id: &RunId) -> PathBuf {
        self.root.join(run_id.as_str())
    }

    fn require_known(&self, run_id: &RunId) -> Result<(), StoreError> {
        if self.handles.contains_key(run_id) {
            Ok(())
        } else {
            Err(StoreError::UnknownRun(run_id.clone()))
        }
    }

    fn append_lock(&self, run_id: &RunId) -> Arc<Mutex<()>> {
        self.append_locks
            .entry(run_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn memory_slot(&self, run_id: &RunId) -> Result<Arc<Mutex<MemoryWorkspace>>, StoreError> {
        self.memory
            .get(run_id)
            .map(|slot| slot.clone())
            .ok_or_else(|| StoreError::UnknownRun(run_id.clone()))
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let encoded = serde_json::to_vec_pretty(value)?;
    fs::write(path, encoded)?;
    Ok(())
}

fn read_json_or_default<T: serde::de::DeserializeOwned + Default>(
    path: &Path,
) -> Result<T, StoreError> {
    if !path.exists() {
        return Ok(T::default());
    }
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn temp_store() -> (tempfile::TempDir, WorkspaceStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn ensure_workspace_is_idempotent() {
        let (_dir, store) = temp_store();
        let run_id = RunId::new("run-1");

        let first = store.ensure_workspace(&run_id, &ArtifactKind::prd()).unwrap();
        let second = store.ensure_workspace(&run_id, &ArtifactKind::prd()).unwrap();

        assert_eq!(first.root, second.root);
        assert!(first.root.join("artifacts").is_dir());
        assert!(first.root.join("events").is_dir());
    }

    #[test]
    fn artifact_index_upserts_in_place() {
        let (_dir, store) = temp_store();
        let run_id = RunId::new("run-1");
        store.ensure_workspace(&run_id, &ArtifactKind::prd()).unwrap();

        let artifact = Artifact::new(ArtifactKind::prd(), json!({"draft": 1}));
        store.write_artifact(&run_id, &artifact).unwrap();

        let updated = Artifact {
            data: json!({"draft": 2}),
            ..artifact.clone()
        };
        store.write_artifact(&run_id, &updated).unwrap();

        let index = store.list_artifacts(&run_id).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index[0].id, artifact.id);
        assert_eq!(index[0].content_hash, updated.content_hash());

        let read_back = store.read_artifact(&run_id, artifact.id).unwrap();
        assert_eq!(read_back.data, json!({"draft": 2}));
    }

    #[test]
    fn events_preserve_append_order() {
        let (_dir, store) = temp_store();
        let run_id = RunId::new("run-1");
        store.ensure_workspace(&run_id, &ArtifactKind::prd()).unwrap();

        for kind in [
            EventKind::RunStarted,
            EventKind::PlanCreated,
            EventKind::StepStarted,
            EventKind::StepCompleted,
            EventKind::RunCompleted,
        ] {
            store
                .append_event(WorkspaceEvent::new(run_id.clone(), kind, json!(null)))
                .unwrap();
        }

        let events = store.get_events(&run_id).unwrap();
        assert_eq!(events.len(), 5);
        assert_eq!(events[0].kind, EventKind::RunStarted);
        assert_eq!(events[4].kind, EventKind::RunCompleted);
    }

    #[test]
    fn unknown_run_is_rejected() {
        let (_dir, store) = temp_store();
        let run_id = RunId::new("never-provisioned");

        let err = store.list_artifacts(&run_id).unwrap_err();
        assert!(matches!(err, StoreError::UnknownRun(_)));
    }

    #[test]
    fn teardown_removes_all_state() {
        let (_dir, store) = temp_store();
        let run_id = RunId::new("run-1");
        let handle = store.ensure_workspace(&run_id, &ArtifactKind::prd()).unwrap();

        store
            .append_event(WorkspaceEvent::new(
                run_id.clone(),
                EventKind::RunStarted,
                json!(null),
            ))
            .unwrap();

        store.teardown(&run_id).unwrap();
        assert!(!handle.root.exists());
        assert!(matches!(
            store.get_events(&run_id),
            Err(StoreError::UnknownRun(_))
        ));
    }

    #[test]
    fn ephemeral_store_keeps_records_in_memory() {
        let store = WorkspaceStore::ephemeral();
        let run_id = RunId::new("run-1");
        let handle = store.ensure_workspace(&run_id, &ArtifactKind::prd()).unwrap();
        assert!(!handle.persisted);

        let artifact = Artifact::new(ArtifactKind::prd(), json!({"x": 1}));
        store.write_artifact(&run_id, &artifact).unwrap();
        store
            .append_event(WorkspaceEvent::new(
                run_id.clone(),
                EventKind::ArtifactDelivered,
                json!({"artifact_id": artifact.id}),
            ))
            .unwrap();

        assert_eq!(store.list_artifacts(&run_id).unwrap().len(), 1);
        assert_eq!(store.get_events(&run_id).unwrap().len(), 1);
        assert_eq!(
            store.read_artifact(&run_id, artifact.id).unwrap().data,
            json!({"x": 1})
        );
    }
}
