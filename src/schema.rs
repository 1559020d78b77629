//! Diagram input schema.
//!
//! Diagrams arrive from an upstream authoring/compiler pipeline as a
//! declarative graph of typed node configs and handle-addressed edges. The
//! schema is deserialized with serde and consumed read-only; all validation
//! beyond shape happens in [`crate::graph::compile`](crate::graph).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A complete diagram definition as produced upstream.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct DiagramSchema {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub nodes: Vec<NodeSchema>,
    #[serde(default)]
    pub edges: Vec<EdgeSchema>,
    /// Initial run variables, seeded into the execution context by the start node.
    #[serde(default)]
    pub variables: HashMap<String, Value>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct NodeSchema {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub title: String,
    /// Node-type-specific static configuration.
    #[serde(default)]
    pub config: Value,
    /// Declared input handles. An edge may still target an undeclared handle;
    /// declared handles exist to carry `required` and `default`.
    #[serde(default)]
    pub inputs: Vec<HandleSchema>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Upper bound on dispatches of this node across all loop iterations.
    #[serde(default)]
    pub max_iterations: Option<u32>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct HandleSchema {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EdgeSchema {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub target: String,
    /// Output handle on the source. Branch labels ("true", "false", "error")
    /// live here; anything else is a plain data handle.
    #[serde(default, alias = "sourceHandle")]
    pub source_handle: Option<String>,
    /// Input handle on the target; defaults to "default".
    #[serde(default, alias = "targetHandle")]
    pub target_handle: Option<String>,
    /// Content-type hint for the value carried by this edge.
    #[serde(default)]
    pub content_hint: Option<ContentTypeHint>,
    /// Tie-break for ordering within a ready batch. Higher runs earlier in
    /// logs; never implies serialization.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub transform: Option<TransformRule>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentTypeHint {
    Text,
    Structured,
    ConversationState,
}

/// Value transformation applied while traversing an edge.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransformRule {
    PassThrough,
    /// Extract a dotted-path field from a structured body.
    ExtractField { path: String },
    /// Render a template over the incoming value and run variables.
    Template { template: String },
}

impl Default for TransformRule {
    fn default() -> Self {
        TransformRule::PassThrough
    }
}

// ================================
// Retry policy
// ================================

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RetryPolicy {
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default)]
    pub backoff: BackoffStrategy,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    /// When true (the default), only errors the node taxonomy marks retryable
    /// are re-attempted.
    #[serde(default = "default_retry_on_retryable_only")]
    pub retry_on_retryable_only: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    #[default]
    Fixed,
    Exponential,
    ExponentialWithJitter,
}

fn default_retry_interval_ms() -> u64 {
    1000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_max_interval_ms() -> u64 {
    60_000
}
fn default_retry_on_retryable_only() -> bool {
    true
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 0,
            retry_interval_ms: default_retry_interval_ms(),
            backoff: BackoffStrategy::Fixed,
            backoff_multiplier: default_backoff_multiplier(),
            max_interval_ms: default_max_interval_ms(),
            retry_on_retryable_only: default_retry_on_retryable_only(),
        }
    }
}
