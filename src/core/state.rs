//! Execution state persistence.
//!
//! A [`ExecutionSnapshot`] is a versioned, serde-round-trippable image of an
//! execution — everything the scheduler needs to resume. [`StateStore`]
//! implementations persist snapshots; the [`StateManager`] adds per-execution
//! write serialization, retry with backoff, and degradation to in-memory-only
//! continuation when the store keeps failing.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{EngineError, EngineResult};

use super::context::{ExecutionContext, ExecutionStatus, NodeState};
use super::envelope::Envelope;

/// Bumped whenever the snapshot layout changes incompatibly.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Full persisted image of one execution.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExecutionSnapshot {
    pub version: u32,
    pub execution_id: String,
    pub diagram_id: String,
    pub status: ExecutionStatus,
    pub started_at: i64,
    #[serde(default)]
    pub ended_at: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
    pub node_states: HashMap<String, NodeState>,
    pub node_outputs: HashMap<String, Envelope>,
    #[serde(default)]
    pub branch_decisions: HashMap<String, String>,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    #[serde(default)]
    pub executed_nodes: Vec<String>,
    #[serde(default)]
    pub exec_counts: HashMap<String, u32>,
}

impl ExecutionSnapshot {
    pub fn capture(ctx: &ExecutionContext) -> Self {
        ExecutionSnapshot {
            version: SNAPSHOT_VERSION,
            execution_id: ctx.execution_id.clone(),
            diagram_id: ctx.diagram_id.clone(),
            status: ctx.status,
            started_at: ctx.started_at,
            ended_at: ctx.ended_at,
            error: ctx.error.clone(),
            node_states: ctx.node_states().clone(),
            node_outputs: ctx.outputs().clone(),
            branch_decisions: ctx.branch_decisions().clone(),
            variables: ctx.variables().clone(),
            executed_nodes: ctx.executed_nodes().to_vec(),
            exec_counts: ctx.exec_counts().clone(),
        }
    }

    /// Rebuild a context for resumption. The scheduler re-enters its ready
    /// computation from the restored completed/failed sets.
    pub fn restore(&self) -> ExecutionContext {
        ExecutionContext::from_parts(
            self.execution_id.clone(),
            self.diagram_id.clone(),
            self.status,
            self.started_at,
            self.ended_at,
            self.error.clone(),
            self.node_states.clone(),
            self.node_outputs.clone(),
            self.branch_decisions.clone(),
            self.variables.clone(),
            self.executed_nodes.clone(),
            self.exec_counts.clone(),
        )
    }
}

// ================================
// Store
// ================================

#[derive(Debug, thiserror::Error)]
pub enum StateStoreError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Snapshot corrupted: {0}")]
    Corrupted(String),
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save(&self, snapshot: &ExecutionSnapshot) -> Result<(), StateStoreError>;
    async fn load(&self, execution_id: &str)
        -> Result<Option<ExecutionSnapshot>, StateStoreError>;
    async fn delete(&self, execution_id: &str) -> Result<(), StateStoreError>;
    /// Atomic single-node update for lightweight progress reporting without
    /// a full snapshot.
    async fn update_node_status(
        &self,
        execution_id: &str,
        node_id: &str,
        state: NodeState,
    ) -> Result<(), StateStoreError>;
}

#[derive(Default)]
pub struct MemoryStateStore {
    data: tokio::sync::RwLock<HashMap<String, ExecutionSnapshot>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn save(&self, snapshot: &ExecutionSnapshot) -> Result<(), StateStoreError> {
        self.data
            .write()
            .await
            .insert(snapshot.execution_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn load(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionSnapshot>, StateStoreError> {
        Ok(self.data.read().await.get(execution_id).cloned())
    }

    async fn delete(&self, execution_id: &str) -> Result<(), StateStoreError> {
        self.data.write().await.remove(execution_id);
        Ok(())
    }

    async fn update_node_status(
        &self,
        execution_id: &str,
        node_id: &str,
        state: NodeState,
    ) -> Result<(), StateStoreError> {
        let mut data = self.data.write().await;
        let snapshot = data.get_mut(execution_id).ok_or_else(|| {
            StateStoreError::Storage(format!("no snapshot for execution {}", execution_id))
        })?;
        snapshot.node_states.insert(node_id.to_string(), state);
        Ok(())
    }
}

pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, StateStoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| StateStoreError::Storage(e.to_string()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, execution_id: &str) -> PathBuf {
        self.dir.join(format!("{}.snapshot.json", execution_id))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn save(&self, snapshot: &ExecutionSnapshot) -> Result<(), StateStoreError> {
        let path = self.path_for(&snapshot.execution_id);
        let bytes = serde_json::to_vec(snapshot)
            .map_err(|e| StateStoreError::Serialization(e.to_string()))?;
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| StateStoreError::Storage(e.to_string()))
    }

    async fn load(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionSnapshot>, StateStoreError> {
        let path = self.path_for(execution_id);
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateStoreError::Storage(e.to_string())),
        };
        let snapshot = serde_json::from_slice::<ExecutionSnapshot>(&bytes)
            .map_err(|e| StateStoreError::Corrupted(e.to_string()))?;
        Ok(Some(snapshot))
    }

    async fn delete(&self, execution_id: &str) -> Result<(), StateStoreError> {
        let _ = tokio::fs::remove_file(self.path_for(execution_id)).await;
        Ok(())
    }

    async fn update_node_status(
        &self,
        execution_id: &str,
        node_id: &str,
        state: NodeState,
    ) -> Result<(), StateStoreError> {
        let mut snapshot = self.load(execution_id).await?.ok_or_else(|| {
            StateStoreError::Storage(format!("no snapshot for execution {}", execution_id))
        })?;
        snapshot.node_states.insert(node_id.to_string(), state);
        self.save(&snapshot).await
    }
}

// ================================
// Manager
// ================================

/// Persistence authority for executions.
///
/// Saves for the *same* execution id serialize through a per-id lock (no lost
/// updates); saves for different ids proceed independently. Store failures
/// retry with backoff; once retries are exhausted the manager degrades to
/// in-memory-only continuation and keeps the run alive, surfacing a warning
/// instead of aborting.
pub struct StateManager {
    store: Arc<dyn StateStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    fallback: DashMap<String, ExecutionSnapshot>,
    degraded: AtomicBool,
    max_attempts: u32,
    base_backoff_ms: u64,
}

impl StateManager {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        StateManager {
            store,
            locks: DashMap::new(),
            fallback: DashMap::new(),
            degraded: AtomicBool::new(false),
            max_attempts: 3,
            base_backoff_ms: 50,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn lock_for(&self, execution_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(execution_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Checkpoint an execution. Safe to call repeatedly mid-run.
    pub async fn save(&self, snapshot: &ExecutionSnapshot) -> EngineResult<()> {
        let lock = self.lock_for(&snapshot.execution_id);
        let _guard = lock.lock().await;

        let mut last_error = None;
        for attempt in 0..self.max_attempts {
            match self.store.save(snapshot).await {
                Ok(()) => {
                    self.fallback
                        .insert(snapshot.execution_id.clone(), snapshot.clone());
                    return Ok(());
                }
                Err(e) => {
                    last_error = Some(e);
                    let backoff = self.base_backoff_ms << attempt;
                    tokio::time::sleep(std::time::Duration::from_millis(backoff)).await;
                }
            }
        }

        self.degraded.store(true, Ordering::Relaxed);
        self.fallback
            .insert(snapshot.execution_id.clone(), snapshot.clone());
        tracing::warn!(
            execution_id = %snapshot.execution_id,
            error = %last_error.map(|e| e.to_string()).unwrap_or_default(),
            "state store unavailable after retries; continuing in-memory only"
        );
        Ok(())
    }

    /// Load a snapshot for resumption.
    pub async fn load(&self, execution_id: &str) -> EngineResult<ExecutionSnapshot> {
        let snapshot = match self.store.load(execution_id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                // The store never saw it; an in-memory copy from a degraded
                // run is still usable within this process.
                self.fallback
                    .get(execution_id)
                    .map(|entry| entry.clone())
                    .ok_or_else(|| EngineError::SnapshotNotFound(execution_id.to_string()))?
            }
            Err(e) => return Err(EngineError::Persistence(e.to_string())),
        };

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(EngineError::UnsupportedSnapshotVersion(snapshot.version));
        }
        Ok(snapshot)
    }

    pub async fn delete(&self, execution_id: &str) -> EngineResult<()> {
        let lock = self.lock_for(execution_id);
        let _guard = lock.lock().await;
        self.fallback.remove(execution_id);
        self.store
            .delete(execution_id)
            .await
            .map_err(|e| EngineError::Persistence(e.to_string()))
    }

    /// Atomic single-node progress update.
    pub async fn update_node_status(
        &self,
        execution_id: &str,
        node_id: &str,
        state: NodeState,
    ) -> EngineResult<()> {
        let lock = self.lock_for(execution_id);
        let _guard = lock.lock().await;

        if let Some(mut entry) = self.fallback.get_mut(execution_id) {
            entry
                .node_states
                .insert(node_id.to_string(), state.clone());
        }

        match self
            .store
            .update_node_status(execution_id, node_id, state)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                self.degraded.store(true, Ordering::Relaxed);
                tracing::warn!(
                    execution_id,
                    node_id,
                    error = %e,
                    "node status update not persisted"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::NodeStatus;
    use serde_json::json;

    fn sample_snapshot(execution_id: &str) -> ExecutionSnapshot {
        let mut node_states = HashMap::new();
        node_states.insert(
            "a".to_string(),
            NodeState {
                status: NodeStatus::Completed,
                started_at: Some(1),
                ended_at: Some(2),
                error: None,
            },
        );
        let mut node_outputs = HashMap::new();
        node_outputs.insert("a".to_string(), Envelope::text("a", "out", 2));
        let mut exec_counts = HashMap::new();
        exec_counts.insert("a".to_string(), 1);

        ExecutionSnapshot {
            version: SNAPSHOT_VERSION,
            execution_id: execution_id.to_string(),
            diagram_id: "d1".to_string(),
            status: ExecutionStatus::Running,
            started_at: 1,
            ended_at: None,
            error: None,
            node_states,
            node_outputs,
            branch_decisions: HashMap::from([("cond".to_string(), "true".to_string())]),
            variables: HashMap::from([("x".to_string(), json!(5))]),
            executed_nodes: vec!["a".to_string()],
            exec_counts,
        }
    }

    #[test]
    fn test_snapshot_roundtrip_preserves_scheduler_fields() {
        let snapshot = sample_snapshot("e1");
        let text = serde_json::to_string(&snapshot).unwrap();
        let back: ExecutionSnapshot = serde_json::from_str(&text).unwrap();
        assert_eq!(back, snapshot);

        let ctx = back.restore();
        assert_eq!(ctx.status_of("a"), NodeStatus::Completed);
        assert_eq!(ctx.exec_count("a"), 1);
        assert_eq!(ctx.branch_taken("cond"), Some("true"));
        assert_eq!(ctx.variable("x"), Some(&json!(5)));

        let recaptured = ExecutionSnapshot::capture(&ctx);
        assert_eq!(recaptured, snapshot);
    }

    #[tokio::test]
    async fn test_memory_store_save_load_delete() {
        let store = MemoryStateStore::new();
        let snapshot = sample_snapshot("e1");

        store.save(&snapshot).await.unwrap();
        let loaded = store.load("e1").await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);

        store.delete("e1").await.unwrap();
        assert!(store.load("e1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_update_node_status() {
        let store = MemoryStateStore::new();
        store.save(&sample_snapshot("e1")).await.unwrap();
        store
            .update_node_status(
                "e1",
                "b",
                NodeState {
                    status: NodeStatus::Running,
                    started_at: Some(3),
                    ended_at: None,
                    error: None,
                },
            )
            .await
            .unwrap();
        let loaded = store.load("e1").await.unwrap().unwrap();
        assert_eq!(loaded.node_states["b"].status, NodeStatus::Running);
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path()).unwrap();
        let snapshot = sample_snapshot("e1");

        store.save(&snapshot).await.unwrap();
        let loaded = store.load("e1").await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);

        store.delete("e1").await.unwrap();
        assert!(store.load("e1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_manager_degrades_on_persistent_failure() {
        struct FailingStore;
        #[async_trait]
        impl StateStore for FailingStore {
            async fn save(&self, _: &ExecutionSnapshot) -> Result<(), StateStoreError> {
                Err(StateStoreError::Storage("disk on fire".into()))
            }
            async fn load(
                &self,
                _: &str,
            ) -> Result<Option<ExecutionSnapshot>, StateStoreError> {
                Ok(None)
            }
            async fn delete(&self, _: &str) -> Result<(), StateStoreError> {
                Ok(())
            }
            async fn update_node_status(
                &self,
                _: &str,
                _: &str,
                _: NodeState,
            ) -> Result<(), StateStoreError> {
                Err(StateStoreError::Storage("disk on fire".into()))
            }
        }

        let manager = StateManager::new(Arc::new(FailingStore));
        let snapshot = sample_snapshot("e1");
        // Degrades instead of failing the run.
        manager.save(&snapshot).await.unwrap();
        assert!(manager.is_degraded());
        // The in-memory copy still resumes within this process.
        let loaded = manager.load("e1").await.unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[tokio::test]
    async fn test_manager_serializes_saves_per_execution() {
        let store = Arc::new(MemoryStateStore::new());
        let manager = Arc::new(StateManager::new(store.clone()));

        let mut handles = Vec::new();
        for i in 0..8u32 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                let mut snapshot = sample_snapshot("e1");
                snapshot.exec_counts.insert("a".to_string(), i);
                manager.save(&snapshot).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // One of the writers won wholesale; no torn state.
        let final_snapshot = store.load("e1").await.unwrap().unwrap();
        assert!(final_snapshot.exec_counts["a"] < 8);
        assert_eq!(final_snapshot.executed_nodes, vec!["a".to_string()]);
    }
}
