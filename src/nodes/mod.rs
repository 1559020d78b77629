//! Node handlers.
//!
//! Each node type is a [`NodeHandler`]: a fixed capability set of
//! `prepare_inputs` / `run` / `serialize_output` / `on_error` /
//! `post_execute`. Handlers perform work only through the injected
//! capability providers; they never construct collaborators themselves.
//! Dispatch is a pure keyed lookup through the [`HandlerRegistry`] — unknown
//! type tags are rejected at diagram compile time, not at dispatch time.

pub mod control_flow;
pub mod jobs;
pub mod person_job;
pub mod registry;
pub mod sub_diagram;
pub mod user_response;

pub use registry::HandlerRegistry;

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::envelope::{ContentType, Envelope};
use crate::core::events::{EventEmitter, ExecutionEvent};
use crate::core::resolver::ResolvedInputs;
use crate::core::runtime::RuntimeContext;
use crate::error::{NodeError, NodeResult};
use crate::graph::DiagramNode;

pub const NODE_TYPE_START: &str = "start";
pub const NODE_TYPE_ENDPOINT: &str = "endpoint";
pub const NODE_TYPE_CONDITION: &str = "condition";
pub const NODE_TYPE_PERSON_JOB: &str = "person_job";
pub const NODE_TYPE_CODE_JOB: &str = "code_job";
pub const NODE_TYPE_API_JOB: &str = "api_job";
pub const NODE_TYPE_DB: &str = "db";
pub const NODE_TYPE_TEMPLATE_JOB: &str = "template_job";
pub const NODE_TYPE_SUB_DIAGRAM: &str = "sub_diagram";
pub const NODE_TYPE_USER_RESPONSE: &str = "user_response";

/// Per-dispatch context handed to a handler.
#[derive(Clone)]
pub struct HandlerContext {
    pub execution_id: String,
    pub node_id: String,
    /// 1-indexed dispatch number (loop iterations count up).
    pub dispatch: u32,
    /// Snapshot of run variables at dispatch time.
    pub variables: HashMap<String, Value>,
    pub runtime: Arc<RuntimeContext>,
    pub events: EventEmitter,
}

impl HandlerContext {
    pub fn now_millis(&self) -> i64 {
        self.runtime.now_millis()
    }

    pub fn is_first_dispatch(&self) -> bool {
        self.dispatch <= 1
    }

    /// Emit a log line into the execution's event stream.
    pub async fn log(&self, message: impl Into<String>) {
        self.events
            .emit(ExecutionEvent::Log {
                execution_id: self.execution_id.clone(),
                node_id: Some(self.node_id.clone()),
                message: message.into(),
                timestamp: chrono::Utc::now(),
            })
            .await;
    }
}

/// Raw result of a handler's `run`, before envelope wrapping.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub content_type: ContentType,
    pub body: Value,
    pub meta: HashMap<String, Value>,
}

impl RunOutput {
    pub fn text(content: impl Into<String>) -> Self {
        RunOutput {
            content_type: ContentType::Text,
            body: Value::String(content.into()),
            meta: HashMap::new(),
        }
    }

    pub fn structured(body: Value) -> Self {
        RunOutput {
            content_type: ContentType::Structured,
            body,
            meta: HashMap::new(),
        }
    }

    pub fn conversation(state: Value) -> Self {
        RunOutput {
            content_type: ContentType::ConversationState,
            body: state,
            meta: HashMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    pub fn into_envelope(self, produced_by: &str, timestamp: i64) -> NodeResult<Envelope> {
        Envelope::new(produced_by, self.content_type, self.body, self.meta, timestamp)
    }
}

/// Pluggable logic for one node type.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Adapt resolver output to the handler's expected shape.
    fn prepare_inputs(
        &self,
        _node: &DiagramNode,
        inputs: ResolvedInputs,
    ) -> NodeResult<ResolvedInputs> {
        Ok(inputs)
    }

    /// Perform the work. All I/O goes through `ctx.runtime.capabilities`.
    async fn run(
        &self,
        node: &DiagramNode,
        inputs: &ResolvedInputs,
        ctx: &HandlerContext,
    ) -> NodeResult<RunOutput>;

    /// Wrap the result as an envelope.
    fn serialize_output(
        &self,
        node: &DiagramNode,
        output: RunOutput,
        ctx: &HandlerContext,
    ) -> NodeResult<Envelope> {
        output
            .into_envelope(&node.id, ctx.now_millis())
            .map(|env| env.with_iteration(ctx.dispatch))
    }

    /// Convert a caught failure into a routed error envelope instead of
    /// aborting the run. `None` propagates the failure to the orchestrator.
    fn on_error(
        &self,
        _node: &DiagramNode,
        _error: &NodeError,
        _ctx: &HandlerContext,
    ) -> Option<Envelope> {
        None
    }

    /// Hook after the envelope is stored; failures here fail the node.
    async fn post_execute(
        &self,
        _node: &DiagramNode,
        _envelope: &Envelope,
        _ctx: &HandlerContext,
    ) -> NodeResult<()> {
        Ok(())
    }
}

/// Template context shared by handlers: input bodies at the top level plus
/// `inputs` and `variables` maps.
pub(crate) fn template_context(
    inputs: &ResolvedInputs,
    variables: &HashMap<String, Value>,
) -> Value {
    let bodies = inputs.bodies();
    let mut root = serde_json::Map::new();
    for (name, body) in &bodies {
        root.insert(name.clone(), body.clone());
    }
    root.insert("inputs".to_string(), json!(bodies));
    root.insert("variables".to_string(), json!(variables));
    Value::Object(root)
}

/// Shared helper: routed error envelope for handlers that opt into
/// branch-handled failures via `route_errors: true` in their config.
pub(crate) fn routed_error_envelope(
    node: &DiagramNode,
    error: &NodeError,
    ctx: &HandlerContext,
) -> Option<Envelope> {
    let route = node
        .config
        .get("route_errors")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !route {
        return None;
    }
    Some(Envelope::error(
        &node.id,
        error.to_string(),
        error.kind(),
        ctx.now_millis(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_output_into_envelope() {
        let env = RunOutput::text("hi").into_envelope("n1", 7).unwrap();
        assert_eq!(env.produced_by, "n1");
        assert_eq!(env.as_text().unwrap(), "hi");
        assert_eq!(env.timestamp, 7);
    }

    #[test]
    fn test_run_output_meta_carries_over() {
        let env = RunOutput::structured(json!({"result": false}))
            .with_meta("branch", json!("false"))
            .into_envelope("cond", 1)
            .unwrap();
        assert_eq!(env.branch(), Some("false"));
    }

    #[test]
    fn test_template_context_shape() {
        let mut inputs = ResolvedInputs::new();
        inputs.insert("x", Envelope::structured("a", json!(5), 1));
        let vars = HashMap::from([("who".to_string(), json!("world"))]);
        let ctx = template_context(&inputs, &vars);
        assert_eq!(ctx["x"], json!(5));
        assert_eq!(ctx["inputs"]["x"], json!(5));
        assert_eq!(ctx["variables"]["who"], json!("world"));
    }
}
