//! Diagram compile errors. A diagram that fails to compile never starts executing.

use thiserror::Error;

/// Errors detected while compiling a diagram schema into an executable graph.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Unknown node type: '{type_tag}' (node '{node_id}')")]
    UnknownNodeType { node_id: String, type_tag: String },
    #[error("Duplicate node id: {0}")]
    DuplicateNodeId(String),
    #[error("Edge '{edge_id}' references missing node: {node_id}")]
    DanglingEdge { edge_id: String, node_id: String },
    #[error("Cyclic dependency: cycle through {nodes:?} has no condition node with an exit branch")]
    CyclicDependency { nodes: Vec<String> },
    #[error("No start node found")]
    NoStartNode,
    #[error("Multiple start nodes found")]
    MultipleStartNodes,
    #[error("Schema violation: {0}")]
    SchemaViolation(String),
}
