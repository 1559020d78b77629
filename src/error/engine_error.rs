//! Engine-level error types.

use super::{CompileError, NodeError};
use thiserror::Error;

/// Errors raised while building or driving an execution.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("No handler registered for node type: {0}")]
    HandlerNotFound(String),
    #[error("Duplicate output for node '{0}' within one dispatch")]
    DuplicateOutput(String),
    #[error("Max steps exceeded: {0}")]
    MaxStepsExceeded(i32),
    #[error("Execution time limit exceeded")]
    ExecutionTimeout,
    #[error("Execution aborted: {0}")]
    Aborted(String),
    #[error("Node execution failed: node={node_id}, error={error}")]
    NodeFailed { node_id: String, error: String },
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Snapshot not found for execution: {0}")]
    SnapshotNotFound(String),
    #[error("Unsupported snapshot version: {0}")]
    UnsupportedSnapshotVersion(u32),
    #[error("Node error: {0}")]
    Node(Box<NodeError>),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<NodeError> for EngineError {
    fn from(value: NodeError) -> Self {
        EngineError::Node(Box::new(value))
    }
}
