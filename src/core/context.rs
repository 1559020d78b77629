//! Per-run execution context.
//!
//! The context is the single registry of node outputs and run metadata for
//! one execution. It is exclusively owned by the orchestrator; the scheduler
//! and resolver read it, only the orchestrator mutates it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::error::{EngineError, EngineResult};

use super::envelope::Envelope;

// ================================
// Status types
// ================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeStatus::Completed | NodeStatus::Failed | NodeStatus::Skipped
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub status: NodeStatus,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub ended_at: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl NodeState {
    fn pending() -> Self {
        NodeState {
            status: NodeStatus::Pending,
            started_at: None,
            ended_at: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

// ================================
// ExecutionContext
// ================================

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub diagram_id: String,
    pub status: ExecutionStatus,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub error: Option<String>,
    node_states: HashMap<String, NodeState>,
    node_outputs: HashMap<String, Envelope>,
    branch_decisions: HashMap<String, String>,
    variables: HashMap<String, Value>,
    executed_nodes: Vec<String>,
    exec_counts: HashMap<String, u32>,
    /// Nodes with a dispatch in flight that has not stored its output yet.
    /// A second `store_output` for the same dispatch is an integration error.
    open_dispatches: HashSet<String>,
}

impl ExecutionContext {
    pub fn new(
        execution_id: impl Into<String>,
        diagram_id: impl Into<String>,
        node_ids: impl IntoIterator<Item = String>,
        variables: HashMap<String, Value>,
        started_at: i64,
    ) -> Self {
        let node_states = node_ids
            .into_iter()
            .map(|id| (id, NodeState::pending()))
            .collect();
        ExecutionContext {
            execution_id: execution_id.into(),
            diagram_id: diagram_id.into(),
            status: ExecutionStatus::Pending,
            started_at,
            ended_at: None,
            error: None,
            node_states,
            node_outputs: HashMap::new(),
            branch_decisions: HashMap::new(),
            variables,
            executed_nodes: Vec::new(),
            exec_counts: HashMap::new(),
            open_dispatches: HashSet::new(),
        }
    }

    /// Reassemble a context from persisted parts. Open-dispatch tracking
    /// starts empty: a restored run has nothing in flight.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        execution_id: String,
        diagram_id: String,
        status: ExecutionStatus,
        started_at: i64,
        ended_at: Option<i64>,
        error: Option<String>,
        node_states: HashMap<String, NodeState>,
        node_outputs: HashMap<String, Envelope>,
        branch_decisions: HashMap<String, String>,
        variables: HashMap<String, Value>,
        executed_nodes: Vec<String>,
        exec_counts: HashMap<String, u32>,
    ) -> Self {
        ExecutionContext {
            execution_id,
            diagram_id,
            status,
            started_at,
            ended_at,
            error,
            node_states,
            node_outputs,
            branch_decisions,
            variables,
            executed_nodes,
            exec_counts,
            open_dispatches: HashSet::new(),
        }
    }

    // --- reads ---

    pub fn state(&self, node_id: &str) -> Option<&NodeState> {
        self.node_states.get(node_id)
    }

    pub fn status_of(&self, node_id: &str) -> NodeStatus {
        self.node_states
            .get(node_id)
            .map(|s| s.status)
            .unwrap_or(NodeStatus::Pending)
    }

    pub fn node_states(&self) -> &HashMap<String, NodeState> {
        &self.node_states
    }

    /// Latest envelope only; full history lives in the tracker.
    pub fn output(&self, node_id: &str) -> Option<&Envelope> {
        self.node_outputs.get(node_id)
    }

    pub fn outputs(&self) -> &HashMap<String, Envelope> {
        &self.node_outputs
    }

    pub fn branch_taken(&self, node_id: &str) -> Option<&str> {
        self.branch_decisions.get(node_id).map(|s| s.as_str())
    }

    pub fn branch_decisions(&self) -> &HashMap<String, String> {
        &self.branch_decisions
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn variables(&self) -> &HashMap<String, Value> {
        &self.variables
    }

    pub fn executed_nodes(&self) -> &[String] {
        &self.executed_nodes
    }

    pub fn exec_count(&self, node_id: &str) -> u32 {
        self.exec_counts.get(node_id).copied().unwrap_or(0)
    }

    pub fn exec_counts(&self) -> &HashMap<String, u32> {
        &self.exec_counts
    }

    pub fn is_first_execution(&self, node_id: &str) -> bool {
        self.exec_count(node_id) <= 1
    }

    pub fn nodes_with_status(&self, status: NodeStatus) -> Vec<&str> {
        self.node_states
            .iter()
            .filter(|(_, s)| s.status == status)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn has_running_nodes(&self) -> bool {
        self.node_states
            .values()
            .any(|s| s.status == NodeStatus::Running)
    }

    // --- writes (orchestrator only) ---

    /// Begin a dispatch: transitions to Running and increments the execution
    /// count exactly once. Returns the 1-indexed dispatch number.
    pub fn begin_dispatch(&mut self, node_id: &str, now: i64) -> u32 {
        let count = self.exec_counts.entry(node_id.to_string()).or_insert(0);
        *count += 1;
        let count = *count;
        self.node_states.insert(
            node_id.to_string(),
            NodeState {
                status: NodeStatus::Running,
                started_at: Some(now),
                ended_at: None,
                error: None,
            },
        );
        self.open_dispatches.insert(node_id.to_string());
        count
    }

    /// Store the output of the open dispatch and mark the node Completed.
    ///
    /// Fails with [`EngineError::DuplicateOutput`] if called twice for one
    /// dispatch instance. A later loop iteration opens a new dispatch and is
    /// not a duplicate.
    pub fn store_output(&mut self, node_id: &str, envelope: Envelope, now: i64) -> EngineResult<()> {
        if !self.open_dispatches.remove(node_id) {
            return Err(EngineError::DuplicateOutput(node_id.to_string()));
        }
        if let Some(branch) = envelope.branch() {
            self.branch_decisions
                .insert(node_id.to_string(), branch.to_string());
        }
        self.node_outputs.insert(node_id.to_string(), envelope);
        if let Some(state) = self.node_states.get_mut(node_id) {
            state.status = NodeStatus::Completed;
            state.ended_at = Some(now);
            state.error = None;
        }
        self.executed_nodes.push(node_id.to_string());
        Ok(())
    }

    pub fn mark_failed(&mut self, node_id: &str, error: impl Into<String>, now: i64) {
        self.open_dispatches.remove(node_id);
        if let Some(state) = self.node_states.get_mut(node_id) {
            state.status = NodeStatus::Failed;
            state.ended_at = Some(now);
            state.error = Some(error.into());
        }
    }

    pub fn mark_skipped(&mut self, node_id: &str, now: i64) {
        if let Some(state) = self.node_states.get_mut(node_id) {
            if !state.status.is_terminal() {
                state.status = NodeStatus::Skipped;
                state.ended_at = Some(now);
            }
        }
    }

    /// Re-arm a completed node for a new loop iteration. The previous output
    /// stays visible to consumers until the new dispatch replaces it;
    /// execution counts are never reset.
    pub fn reset_for_iteration(&mut self, node_id: &str) {
        if let Some(state) = self.node_states.get_mut(node_id) {
            state.status = NodeStatus::Pending;
            state.started_at = None;
            state.ended_at = None;
            state.error = None;
        }
        self.branch_decisions.remove(node_id);
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn merge_variables(&mut self, vars: HashMap<String, Value>) {
        self.variables.extend(vars);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> ExecutionContext {
        ExecutionContext::new(
            "exec-1",
            "diagram-1",
            ["a".to_string(), "b".to_string()],
            HashMap::new(),
            100,
        )
    }

    #[test]
    fn test_dispatch_lifecycle() {
        let mut ctx = context();
        assert_eq!(ctx.status_of("a"), NodeStatus::Pending);

        let count = ctx.begin_dispatch("a", 101);
        assert_eq!(count, 1);
        assert_eq!(ctx.status_of("a"), NodeStatus::Running);
        assert_eq!(ctx.exec_count("a"), 1);

        let env = Envelope::text("a", "out", 102);
        ctx.store_output("a", env, 102).unwrap();
        assert_eq!(ctx.status_of("a"), NodeStatus::Completed);
        assert_eq!(ctx.output("a").unwrap().as_text().unwrap(), "out");
        assert_eq!(ctx.executed_nodes(), ["a".to_string()]);
    }

    #[test]
    fn test_duplicate_output_rejected() {
        let mut ctx = context();
        ctx.begin_dispatch("a", 101);
        ctx.store_output("a", Envelope::text("a", "x", 102), 102)
            .unwrap();
        let err = ctx
            .store_output("a", Envelope::text("a", "y", 103), 103)
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateOutput(_)));
        // The first output is still the visible one.
        assert_eq!(ctx.output("a").unwrap().as_text().unwrap(), "x");
    }

    #[test]
    fn test_new_iteration_is_not_a_duplicate() {
        let mut ctx = context();
        ctx.begin_dispatch("a", 101);
        ctx.store_output("a", Envelope::text("a", "first", 102), 102)
            .unwrap();

        ctx.reset_for_iteration("a");
        assert_eq!(ctx.status_of("a"), NodeStatus::Pending);
        // Previous output remains visible until replaced.
        assert_eq!(ctx.output("a").unwrap().as_text().unwrap(), "first");

        assert_eq!(ctx.begin_dispatch("a", 103), 2);
        ctx.store_output("a", Envelope::text("a", "second", 104), 104)
            .unwrap();
        assert_eq!(ctx.exec_count("a"), 2);
        assert_eq!(ctx.output("a").unwrap().as_text().unwrap(), "second");
        assert_eq!(ctx.executed_nodes().len(), 2);
    }

    #[test]
    fn test_branch_decision_recorded_from_envelope() {
        let mut ctx = context();
        ctx.begin_dispatch("a", 101);
        let env = Envelope::structured("a", json!({"result": true}), 102).with_branch("true");
        ctx.store_output("a", env, 102).unwrap();
        assert_eq!(ctx.branch_taken("a"), Some("true"));

        ctx.reset_for_iteration("a");
        assert_eq!(ctx.branch_taken("a"), None);
    }

    #[test]
    fn test_mark_skipped_only_non_terminal() {
        let mut ctx = context();
        ctx.begin_dispatch("a", 101);
        ctx.store_output("a", Envelope::text("a", "x", 102), 102)
            .unwrap();
        ctx.mark_skipped("a", 103);
        assert_eq!(ctx.status_of("a"), NodeStatus::Completed);

        ctx.mark_skipped("b", 103);
        assert_eq!(ctx.status_of("b"), NodeStatus::Skipped);
    }

    #[test]
    fn test_mark_failed_records_error() {
        let mut ctx = context();
        ctx.begin_dispatch("a", 101);
        ctx.mark_failed("a", "boom", 102);
        let state = ctx.state("a").unwrap();
        assert_eq!(state.status, NodeStatus::Failed);
        assert_eq!(state.error.as_deref(), Some("boom"));
    }
}
