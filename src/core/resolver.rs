//! Runtime input resolution.
//!
//! [`resolve_inputs`] computes a node's effective inputs from upstream
//! envelopes, edge transforms, and declared defaults. It is side-effect-free
//! and idempotent against a fixed context snapshot, so the orchestrator can
//! also call it for dry-run validation.

use serde_json::{json, Value};
use std::collections::HashMap;

use crate::error::{NodeError, NodeResult};
use crate::graph::{CompiledDiagram, DiagramEdge, EdgeKind};
use crate::schema::TransformRule;
use crate::template;

use super::context::{ExecutionContext, NodeStatus};
use super::envelope::{ContentType, Envelope};

/// Inputs resolved for one dispatch, keyed by target handle name.
#[derive(Debug, Clone, Default)]
pub struct ResolvedInputs {
    values: HashMap<String, Envelope>,
}

impl ResolvedInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: impl Into<String>, envelope: Envelope) {
        self.values.insert(handle.into(), envelope);
    }

    pub fn get(&self, handle: &str) -> Option<&Envelope> {
        self.values.get(handle)
    }

    pub fn require(&self, handle: &str) -> NodeResult<&Envelope> {
        self.values
            .get(handle)
            .ok_or_else(|| NodeError::Validation(format!("input '{}' not resolved", handle)))
    }

    /// The "default" input, or the only input when exactly one is present.
    pub fn primary(&self) -> Option<&Envelope> {
        self.values.get("default").or_else(|| {
            if self.values.len() == 1 {
                self.values.values().next()
            } else {
                None
            }
        })
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Envelope)> {
        self.values.iter()
    }

    /// Bodies only, for handlers that feed inputs into templates or sandboxes.
    pub fn bodies(&self) -> HashMap<String, Value> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.body.clone()))
            .collect()
    }
}

/// Resolve all inputs for `node_id` from the current context snapshot.
///
/// Fails with [`NodeError::MissingRequiredInput`] if a required handle ends
/// up unconnected and defaultless.
pub fn resolve_inputs(
    diagram: &CompiledDiagram,
    node_id: &str,
    ctx: &ExecutionContext,
    now: i64,
) -> NodeResult<ResolvedInputs> {
    let node = diagram
        .node(node_id)
        .ok_or_else(|| NodeError::Configuration(format!("node not in diagram: {}", node_id)))?;

    let mut edges: Vec<&DiagramEdge> = diagram.incoming_edges(node_id);
    // Priority, then stable id order: deterministic last-writer when two edges
    // feed the same handle.
    edges.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));

    let mut resolved = ResolvedInputs::new();

    for edge in edges {
        if !edge_carries_value(edge, ctx) {
            continue;
        }
        let Some(source_output) = ctx.output(&edge.source) else {
            continue;
        };

        let mut envelope = select_source_handle(source_output, edge);
        envelope = apply_transform(envelope, &edge.transform, ctx.variables(), now)?;
        resolved.insert(edge.target_handle.clone(), envelope);
    }

    for handle in &node.inputs {
        if resolved.get(&handle.name).is_some() {
            continue;
        }
        if let Some(default) = &handle.default {
            resolved.insert(
                handle.name.clone(),
                envelope_from_value("defaults", default.clone(), now),
            );
        } else if handle.required {
            return Err(NodeError::MissingRequiredInput {
                node_id: node_id.to_string(),
                handle: handle.name.clone(),
            });
        }
    }

    Ok(resolved)
}

/// Whether an edge currently carries a value: the producer completed, and the
/// edge's arming condition (branch taken, error routed) holds.
fn edge_carries_value(edge: &DiagramEdge, ctx: &ExecutionContext) -> bool {
    if ctx.status_of(&edge.source) != NodeStatus::Completed {
        return false;
    }
    let Some(output) = ctx.output(&edge.source) else {
        return false;
    };
    match edge.kind {
        EdgeKind::TrueBranch => ctx.branch_taken(&edge.source) == Some("true"),
        EdgeKind::FalseBranch => ctx.branch_taken(&edge.source) == Some("false"),
        EdgeKind::ErrorBranch => output.is_error(),
        EdgeKind::Data => !output.is_error(),
    }
}

/// Narrow a producer's output to the edge's source handle, when it names a
/// field of a structured body.
fn select_source_handle(output: &Envelope, edge: &DiagramEdge) -> Envelope {
    let Some(handle) = edge.source_handle.as_deref() else {
        return output.clone();
    };
    if edge.kind != EdgeKind::Data || handle == "default" {
        return output.clone();
    }
    match output.body.get(handle) {
        Some(field) => derive_envelope(output, field.clone()),
        None => output.clone(),
    }
}

fn apply_transform(
    envelope: Envelope,
    transform: &TransformRule,
    variables: &HashMap<String, Value>,
    now: i64,
) -> NodeResult<Envelope> {
    match transform {
        TransformRule::PassThrough => Ok(envelope),
        TransformRule::ExtractField { path } => {
            let extracted = lookup_path(&envelope.body, path).cloned().ok_or_else(|| {
                NodeError::Validation(format!(
                    "transform path '{}' not found in output of '{}'",
                    path, envelope.produced_by
                ))
            })?;
            Ok(derive_envelope(&envelope, extracted))
        }
        TransformRule::Template { template } => {
            let context = json!({
                "value": envelope.body,
                "variables": variables,
            });
            let rendered = template::render(template, &context)?;
            let mut derived = derive_envelope(&envelope, Value::String(rendered));
            derived.content_type = ContentType::Text;
            derived.timestamp = now;
            Ok(derived)
        }
    }
}

/// A new envelope derived from `source` with a different body; provenance and
/// metadata carry over.
fn derive_envelope(source: &Envelope, body: Value) -> Envelope {
    let content_type = match &body {
        Value::String(_) => ContentType::Text,
        _ => ContentType::Structured,
    };
    Envelope {
        id: uuid::Uuid::new_v4().to_string(),
        produced_by: source.produced_by.clone(),
        content_type,
        body,
        meta: source.meta.clone(),
        timestamp: source.timestamp,
    }
}

fn envelope_from_value(produced_by: &str, value: Value, now: i64) -> Envelope {
    match value {
        Value::String(s) => Envelope::text(produced_by, s, now),
        other => Envelope::structured(produced_by, other, now),
    }
}

fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::compile;
    use crate::nodes::HandlerRegistry;
    use crate::schema::DiagramSchema;
    use serde_json::json;

    fn diagram(schema: Value) -> CompiledDiagram {
        let schema: DiagramSchema = serde_json::from_value(schema).unwrap();
        compile(&schema, &HandlerRegistry::new()).unwrap()
    }

    fn context_for(diagram: &CompiledDiagram) -> ExecutionContext {
        ExecutionContext::new(
            "exec-1",
            diagram.id.clone(),
            diagram.node_ids().map(|s| s.to_string()).collect::<Vec<_>>(),
            HashMap::new(),
            0,
        )
    }

    fn complete(ctx: &mut ExecutionContext, node_id: &str, envelope: Envelope) {
        ctx.begin_dispatch(node_id, 0);
        ctx.store_output(node_id, envelope, 1).unwrap();
    }

    #[test]
    fn test_pass_through_resolution() {
        let d = diagram(json!({
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "b", "type": "template_job", "config": {"template": "x"},
                 "inputs": [{"name": "default", "required": true}]}
            ],
            "edges": [{"source": "start", "target": "b"}]
        }));
        let mut ctx = context_for(&d);
        complete(&mut ctx, "start", Envelope::text("start", "hello", 1));

        let inputs = resolve_inputs(&d, "b", &ctx, 2).unwrap();
        assert_eq!(inputs.require("default").unwrap().as_text().unwrap(), "hello");
    }

    #[test]
    fn test_missing_required_input() {
        let d = diagram(json!({
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "b", "type": "template_job", "config": {"template": "x"},
                 "inputs": [{"name": "default", "required": true}]}
            ],
            "edges": [{"source": "start", "target": "b"}]
        }));
        let ctx = context_for(&d);
        // start has not completed, no default declared
        let err = resolve_inputs(&d, "b", &ctx, 2).unwrap_err();
        assert!(matches!(err, NodeError::MissingRequiredInput { .. }));
    }

    #[test]
    fn test_default_fallback() {
        let d = diagram(json!({
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "b", "type": "template_job", "config": {"template": "x"},
                 "inputs": [{"name": "limit", "required": true, "default": 10}]}
            ],
            "edges": [{"source": "start", "target": "b"}]
        }));
        let ctx = context_for(&d);
        let inputs = resolve_inputs(&d, "b", &ctx, 2).unwrap();
        assert_eq!(inputs.require("limit").unwrap().body, json!(10));
    }

    #[test]
    fn test_extract_field_transform() {
        let d = diagram(json!({
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "b", "type": "template_job", "config": {"template": "x"}}
            ],
            "edges": [{
                "source": "start", "target": "b", "target_handle": "x",
                "transform": {"type": "extract_field", "path": "result.value"}
            }]
        }));
        let mut ctx = context_for(&d);
        complete(
            &mut ctx,
            "start",
            Envelope::structured("start", json!({"result": {"value": 5}}), 1),
        );

        let inputs = resolve_inputs(&d, "b", &ctx, 2).unwrap();
        assert_eq!(inputs.require("x").unwrap().body, json!(5));
    }

    #[test]
    fn test_template_transform() {
        let d = diagram(json!({
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "b", "type": "template_job", "config": {"template": "x"}}
            ],
            "edges": [{
                "source": "start", "target": "b",
                "transform": {"type": "template", "template": "got: {{ value.n }}"}
            }]
        }));
        let mut ctx = context_for(&d);
        complete(
            &mut ctx,
            "start",
            Envelope::structured("start", json!({"n": 7}), 1),
        );

        let inputs = resolve_inputs(&d, "b", &ctx, 2).unwrap();
        assert_eq!(inputs.primary().unwrap().as_text().unwrap(), "got: 7");
    }

    #[test]
    fn test_untaken_branch_edge_resolves_nothing() {
        let d = diagram(json!({
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "cond", "type": "condition",
                 "config": {"conditions": [{"operand": "default", "operator": "not_empty"}]}},
                {"id": "c", "type": "template_job", "config": {"template": "x"}},
                {"id": "dn", "type": "template_job", "config": {"template": "y"}}
            ],
            "edges": [
                {"source": "start", "target": "cond"},
                {"source": "cond", "target": "c", "source_handle": "true"},
                {"source": "cond", "target": "dn", "source_handle": "false"}
            ]
        }));
        let mut ctx = context_for(&d);
        complete(&mut ctx, "start", Envelope::text("start", "in", 1));
        complete(
            &mut ctx,
            "cond",
            Envelope::structured("cond", json!({"result": true}), 2).with_branch("true"),
        );

        let c_inputs = resolve_inputs(&d, "c", &ctx, 3).unwrap();
        assert_eq!(c_inputs.len(), 1);

        let d_inputs = resolve_inputs(&d, "dn", &ctx, 3).unwrap();
        assert!(d_inputs.is_empty());
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let d = diagram(json!({
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "b", "type": "template_job", "config": {"template": "x"}}
            ],
            "edges": [{"source": "start", "target": "b"}]
        }));
        let mut ctx = context_for(&d);
        complete(&mut ctx, "start", Envelope::text("start", "same", 1));

        let first = resolve_inputs(&d, "b", &ctx, 2).unwrap();
        let second = resolve_inputs(&d, "b", &ctx, 2).unwrap();
        assert_eq!(
            first.primary().unwrap().body,
            second.primary().unwrap().body
        );
    }

    #[test]
    fn test_lookup_path_array_index() {
        let v = json!({"items": [{"x": 1}, {"x": 2}]});
        assert_eq!(lookup_path(&v, "items.1.x"), Some(&json!(2)));
        assert_eq!(lookup_path(&v, "items.9.x"), None);
    }
}
