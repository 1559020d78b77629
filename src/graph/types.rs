use serde_json::Value;

use crate::schema::{ContentTypeHint, RetryPolicy, TransformRule};

/// A compiled diagram node.
#[derive(Debug, Clone)]
pub struct DiagramNode {
    pub id: String,
    /// Type tag dispatched against the handler registry.
    pub node_type: String,
    pub title: String,
    /// Static, type-specific configuration.
    pub config: Value,
    pub inputs: Vec<InputHandle>,
    pub retry: Option<RetryPolicy>,
    pub timeout_secs: Option<u64>,
    pub max_iterations: Option<u32>,
}

impl DiagramNode {
    pub fn input_handle(&self, name: &str) -> Option<&InputHandle> {
        self.inputs.iter().find(|h| h.name == name)
    }
}

/// A declared input handle.
#[derive(Debug, Clone)]
pub struct InputHandle {
    pub name: String,
    pub required: bool,
    pub default: Option<Value>,
}

/// A compiled diagram edge.
#[derive(Debug, Clone)]
pub struct DiagramEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    /// Output handle on the source node; `None` means the whole output.
    pub source_handle: Option<String>,
    /// Input handle on the target node.
    pub target_handle: String,
    pub kind: EdgeKind,
    pub content_hint: Option<ContentTypeHint>,
    pub priority: i32,
    pub transform: TransformRule,
}

/// Edge classification derived from the source handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Plain data dependency.
    Data,
    /// Armed only when the source condition takes its true branch.
    TrueBranch,
    /// Armed only when the source condition takes its false branch.
    FalseBranch,
    /// Armed only when the source recovers a failure into an error envelope.
    ErrorBranch,
}

impl EdgeKind {
    pub fn from_source_handle(handle: &Option<String>) -> Self {
        match handle.as_deref() {
            Some("true") => EdgeKind::TrueBranch,
            Some("false") => EdgeKind::FalseBranch,
            Some("error") => EdgeKind::ErrorBranch,
            _ => EdgeKind::Data,
        }
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, EdgeKind::TrueBranch | EdgeKind::FalseBranch)
    }
}
