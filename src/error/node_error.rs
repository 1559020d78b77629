use thiserror::Error;

/// Node-level errors
#[derive(Debug, Clone, Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Missing required input '{handle}' on node '{node_id}'")]
    MissingRequiredInput { node_id: String, handle: String },
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Execution error: {0}")]
    Execution(String),
    #[error("Template error: {0}")]
    Template(String),
    #[error("Timeout: node execution exceeded time limit")]
    Timeout,
    #[error("Capability '{capability}' unavailable: {reason}")]
    CapabilityUnavailable { capability: String, reason: String },
    #[error("Capability call failed: {0}")]
    CapabilityFailed(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Cancelled")]
    Cancelled,
}

impl NodeError {
    /// Whether a retry policy may re-attempt the node after this error.
    /// Integration and validation errors are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NodeError::Timeout | NodeError::CapabilityFailed(_))
    }

    /// Short tag used in error envelopes and event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            NodeError::Configuration(_) => "configuration",
            NodeError::MissingRequiredInput { .. } => "missing_required_input",
            NodeError::Validation(_) => "validation",
            NodeError::Execution(_) => "execution",
            NodeError::Template(_) => "template",
            NodeError::Timeout => "timeout",
            NodeError::CapabilityUnavailable { .. } => "capability_unavailable",
            NodeError::CapabilityFailed(_) => "capability_failed",
            NodeError::Serialization(_) => "serialization",
            NodeError::Cancelled => "cancelled",
        }
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::Serialization(e.to_string())
    }
}
