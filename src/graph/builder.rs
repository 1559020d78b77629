use std::collections::{HashMap, HashSet};

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::error::CompileError;
use crate::nodes::{HandlerRegistry, NODE_TYPE_START};
use crate::schema::{DiagramSchema, TransformRule};

use super::types::*;
use super::validator;

/// An immutable compiled diagram, ready for execution.
///
/// Construction goes through [`compile`]; nothing here mutates at runtime.
/// Cycle analysis (SCC membership, back-edge classification) happens once
/// here so the scheduler can answer loop questions with set lookups.
#[derive(Debug)]
pub struct CompiledDiagram {
    pub id: String,
    pub name: String,
    graph: StableDiGraph<DiagramNode, DiagramEdge>,
    index: HashMap<String, NodeIndex>,
    start_node_id: String,
    /// SCC id per node, from a single Tarjan pass at compile time.
    scc_of: HashMap<String, usize>,
    /// SCC ids that actually contain a cycle.
    cyclic_sccs: HashSet<usize>,
    /// Edge ids that close a cycle (DFS back edges within a cyclic SCC).
    /// These edges re-arm loop iterations; they are not readiness
    /// requirements.
    loop_edge_ids: HashSet<String>,
    /// Declared initial run variables.
    pub variables: HashMap<String, serde_json::Value>,
}

impl CompiledDiagram {
    pub fn node(&self, node_id: &str) -> Option<&DiagramNode> {
        self.index
            .get(node_id)
            .and_then(|idx| self.graph.node_weight(*idx))
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.graph.node_weights().map(|n| n.id.as_str())
    }

    pub fn nodes(&self) -> impl Iterator<Item = &DiagramNode> {
        self.graph.node_weights()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn start_node_id(&self) -> &str {
        &self.start_node_id
    }

    pub fn incoming_edges(&self, node_id: &str) -> Vec<&DiagramEdge> {
        self.edges_directed(node_id, Direction::Incoming)
    }

    pub fn outgoing_edges(&self, node_id: &str) -> Vec<&DiagramEdge> {
        self.edges_directed(node_id, Direction::Outgoing)
    }

    fn edges_directed(&self, node_id: &str, direction: Direction) -> Vec<&DiagramEdge> {
        let Some(idx) = self.index.get(node_id) else {
            return Vec::new();
        };
        let mut edges: Vec<&DiagramEdge> = self
            .graph
            .edges_directed(*idx, direction)
            .map(|e| e.weight())
            .collect();
        edges.sort_by(|a, b| a.id.cmp(&b.id));
        edges
    }

    /// Whether two nodes sit in the same cyclic SCC.
    pub fn in_same_cycle(&self, a: &str, b: &str) -> bool {
        match (self.scc_of.get(a), self.scc_of.get(b)) {
            (Some(x), Some(y)) => x == y && self.cyclic_sccs.contains(x),
            _ => false,
        }
    }

    /// Whether an edge closes a cycle. Loop edges re-arm completed targets
    /// for a new iteration instead of gating readiness.
    pub fn is_loop_edge(&self, edge: &DiagramEdge) -> bool {
        self.loop_edge_ids.contains(&edge.id)
    }

    /// Whether any incoming edge of `node_id` is a loop edge.
    pub fn has_loop_input(&self, node_id: &str) -> bool {
        self.incoming_edges(node_id)
            .iter()
            .any(|e| self.is_loop_edge(e))
    }

    /// Whether the node participates in any cycle.
    pub fn in_cycle(&self, node_id: &str) -> bool {
        self.scc_of
            .get(node_id)
            .is_some_and(|scc| self.cyclic_sccs.contains(scc))
    }
}

/// Compile a diagram schema into an executable graph.
///
/// Validates everything the engine refuses to discover at dispatch time:
/// unknown type tags, dangling edges, duplicate ids, start-node cardinality,
/// and cycle legality (a cycle must pass through a condition node that can
/// route flow out of it).
pub fn compile(
    schema: &DiagramSchema,
    registry: &HandlerRegistry,
) -> Result<CompiledDiagram, CompileError> {
    let mut graph = StableDiGraph::<DiagramNode, DiagramEdge>::new();
    let mut index: HashMap<String, NodeIndex> = HashMap::new();

    for node_schema in &schema.nodes {
        if index.contains_key(&node_schema.id) {
            return Err(CompileError::DuplicateNodeId(node_schema.id.clone()));
        }
        if !registry.contains(&node_schema.node_type) {
            return Err(CompileError::UnknownNodeType {
                node_id: node_schema.id.clone(),
                type_tag: node_schema.node_type.clone(),
            });
        }

        let node = DiagramNode {
            id: node_schema.id.clone(),
            node_type: node_schema.node_type.clone(),
            title: if node_schema.title.is_empty() {
                node_schema.id.clone()
            } else {
                node_schema.title.clone()
            },
            config: node_schema.config.clone(),
            inputs: node_schema
                .inputs
                .iter()
                .map(|h| InputHandle {
                    name: h.name.clone(),
                    required: h.required,
                    default: h.default.clone(),
                })
                .collect(),
            retry: node_schema.retry.clone(),
            timeout_secs: node_schema.timeout_secs,
            max_iterations: node_schema.max_iterations,
        };

        let idx = graph.add_node(node);
        index.insert(node_schema.id.clone(), idx);
    }

    for edge_schema in &schema.edges {
        let source_idx = *index.get(&edge_schema.source).ok_or_else(|| {
            CompileError::DanglingEdge {
                edge_id: edge_schema.id.clone(),
                node_id: edge_schema.source.clone(),
            }
        })?;
        let target_idx = *index.get(&edge_schema.target).ok_or_else(|| {
            CompileError::DanglingEdge {
                edge_id: edge_schema.id.clone(),
                node_id: edge_schema.target.clone(),
            }
        })?;

        let edge = DiagramEdge {
            id: if edge_schema.id.is_empty() {
                format!(
                    "{}:{}->{}:{}",
                    edge_schema.source,
                    edge_schema.source_handle.as_deref().unwrap_or("default"),
                    edge_schema.target,
                    edge_schema.target_handle.as_deref().unwrap_or("default"),
                )
            } else {
                edge_schema.id.clone()
            },
            source: edge_schema.source.clone(),
            target: edge_schema.target.clone(),
            source_handle: edge_schema.source_handle.clone(),
            target_handle: edge_schema
                .target_handle
                .clone()
                .unwrap_or_else(|| "default".to_string()),
            kind: EdgeKind::from_source_handle(&edge_schema.source_handle),
            content_hint: edge_schema.content_hint,
            priority: edge_schema.priority,
            transform: edge_schema
                .transform
                .clone()
                .unwrap_or(TransformRule::PassThrough),
        };

        graph.add_edge(source_idx, target_idx, edge);
    }

    let mut start_nodes = schema
        .nodes
        .iter()
        .filter(|n| n.node_type == NODE_TYPE_START);
    let start_node_id = match (start_nodes.next(), start_nodes.next()) {
        (Some(start), None) => start.id.clone(),
        (None, _) => return Err(CompileError::NoStartNode),
        (Some(_), Some(_)) => return Err(CompileError::MultipleStartNodes),
    };

    let (scc_of, cyclic_sccs) = analyze_sccs(&graph);
    let loop_edge_ids = classify_loop_edges(&graph, &scc_of, &cyclic_sccs);

    let diagram = CompiledDiagram {
        id: schema
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        name: schema.name.clone().unwrap_or_else(|| "diagram".to_string()),
        graph,
        index,
        start_node_id,
        scc_of,
        cyclic_sccs,
        loop_edge_ids,
        variables: schema.variables.clone(),
    };

    validator::validate(&diagram)?;

    Ok(diagram)
}

/// Tarjan over the compiled graph: records each node's SCC id and which SCCs
/// are cyclic (more than one member, or a self-loop).
fn analyze_sccs(
    graph: &StableDiGraph<DiagramNode, DiagramEdge>,
) -> (HashMap<String, usize>, HashSet<usize>) {
    let sccs = petgraph::algo::tarjan_scc(graph);
    let mut scc_of = HashMap::new();
    let mut cyclic = HashSet::new();

    for (scc_id, members) in sccs.iter().enumerate() {
        let has_self_loop = members.len() == 1
            && graph.edges(members[0]).any(|e| e.target() == members[0]);
        if members.len() > 1 || has_self_loop {
            cyclic.insert(scc_id);
        }
        for idx in members {
            if let Some(node) = graph.node_weight(*idx) {
                scc_of.insert(node.id.clone(), scc_id);
            }
        }
    }

    (scc_of, cyclic)
}

/// Classify intra-SCC back edges by DFS from each cyclic SCC's entry nodes
/// (members fed from outside the SCC). Back edges are the ones that close the
/// loop; everything else stays a normal requirement edge.
fn classify_loop_edges(
    graph: &StableDiGraph<DiagramNode, DiagramEdge>,
    scc_of: &HashMap<String, usize>,
    cyclic_sccs: &HashSet<usize>,
) -> HashSet<String> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut loop_edges = HashSet::new();

    for scc_id in cyclic_sccs {
        let mut members: Vec<NodeIndex> = graph
            .node_indices()
            .filter(|idx| {
                graph
                    .node_weight(*idx)
                    .is_some_and(|n| scc_of.get(&n.id) == Some(scc_id))
            })
            .collect();
        members.sort_by_key(|idx| idx.index());

        let in_scc = |idx: NodeIndex| -> bool {
            graph
                .node_weight(idx)
                .is_some_and(|n| scc_of.get(&n.id) == Some(scc_id))
        };

        let mut entries: Vec<NodeIndex> = members
            .iter()
            .copied()
            .filter(|idx| {
                graph
                    .edges_directed(*idx, Direction::Incoming)
                    .any(|e| !in_scc(e.source()))
            })
            .collect();
        if entries.is_empty() {
            entries.push(members[0]);
        }

        let mut color: HashMap<NodeIndex, Color> =
            members.iter().map(|idx| (*idx, Color::White)).collect();

        // Iterative DFS; an intra-SCC edge into a Gray node closes a cycle.
        for entry in entries {
            if color[&entry] != Color::White {
                continue;
            }
            let mut stack: Vec<(NodeIndex, Vec<(NodeIndex, String)>)> = Vec::new();
            let successors = |idx: NodeIndex| -> Vec<(NodeIndex, String)> {
                let mut out: Vec<(NodeIndex, String)> = graph
                    .edges_directed(idx, Direction::Outgoing)
                    .filter(|e| in_scc(e.target()))
                    .map(|e| (e.target(), e.weight().id.clone()))
                    .collect();
                out.sort_by(|a, b| a.1.cmp(&b.1));
                out
            };

            color.insert(entry, Color::Gray);
            stack.push((entry, successors(entry)));

            loop {
                let Some((_, pending)) = stack.last_mut() else {
                    break;
                };
                if let Some((target, edge_id)) = pending.pop() {
                    match color[&target] {
                        Color::Gray => {
                            loop_edges.insert(edge_id);
                        }
                        Color::White => {
                            color.insert(target, Color::Gray);
                            stack.push((target, successors(target)));
                        }
                        Color::Black => {}
                    }
                } else {
                    let (done, _) = stack.pop().expect("stack non-empty");
                    color.insert(done, Color::Black);
                }
            }
        }
    }

    loop_edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> HandlerRegistry {
        HandlerRegistry::new()
    }

    fn linear_schema() -> DiagramSchema {
        serde_json::from_value(json!({
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "a", "type": "template_job", "config": {"template": "x"}},
                {"id": "end", "type": "endpoint"}
            ],
            "edges": [
                {"source": "start", "target": "a"},
                {"source": "a", "target": "end"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_compile_linear() {
        let diagram = compile(&linear_schema(), &registry()).unwrap();
        assert_eq!(diagram.start_node_id(), "start");
        assert_eq!(diagram.node_count(), 3);
        assert_eq!(diagram.incoming_edges("a").len(), 1);
        assert_eq!(diagram.outgoing_edges("a")[0].target, "end");
        assert!(!diagram.in_cycle("a"));
        assert!(!diagram.has_loop_input("a"));
    }

    #[test]
    fn test_unknown_type_fails_at_compile() {
        let schema: DiagramSchema = serde_json::from_value(json!({
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "x", "type": "no-such-type"}
            ],
            "edges": [{"source": "start", "target": "x"}]
        }))
        .unwrap();
        let err = compile(&schema, &registry()).unwrap_err();
        assert!(matches!(err, CompileError::UnknownNodeType { .. }));
    }

    #[test]
    fn test_dangling_edge() {
        let schema: DiagramSchema = serde_json::from_value(json!({
            "nodes": [{"id": "start", "type": "start"}],
            "edges": [{"source": "start", "target": "ghost"}]
        }))
        .unwrap();
        let err = compile(&schema, &registry()).unwrap_err();
        assert!(matches!(err, CompileError::DanglingEdge { .. }));
    }

    #[test]
    fn test_duplicate_node_id() {
        let schema: DiagramSchema = serde_json::from_value(json!({
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "start", "type": "endpoint"}
            ]
        }))
        .unwrap();
        let err = compile(&schema, &registry()).unwrap_err();
        assert!(matches!(err, CompileError::DuplicateNodeId(_)));
    }

    #[test]
    fn test_missing_start() {
        let schema: DiagramSchema = serde_json::from_value(json!({
            "nodes": [{"id": "end", "type": "endpoint"}]
        }))
        .unwrap();
        assert!(matches!(
            compile(&schema, &registry()),
            Err(CompileError::NoStartNode)
        ));
    }

    #[test]
    fn test_conditional_cycle_is_legal() {
        // start -> a -> cond; cond true loops back to a, false exits to end.
        let schema: DiagramSchema = serde_json::from_value(json!({
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "a", "type": "template_job", "config": {"template": "x"}},
                {"id": "cond", "type": "condition",
                 "config": {"conditions": [{"operand": "default", "operator": "not_empty"}]}},
                {"id": "end", "type": "endpoint"}
            ],
            "edges": [
                {"source": "start", "target": "a"},
                {"source": "a", "target": "cond"},
                {"source": "cond", "target": "a", "source_handle": "true"},
                {"source": "cond", "target": "end", "source_handle": "false"}
            ]
        }))
        .unwrap();
        let diagram = compile(&schema, &registry()).unwrap();
        assert!(diagram.in_cycle("a"));
        assert!(diagram.in_cycle("cond"));
        assert!(diagram.in_same_cycle("a", "cond"));
        assert!(!diagram.in_cycle("end"));

        // The branch edge closing the loop is the back edge; the forward
        // data edge a -> cond is a normal requirement.
        assert!(diagram.has_loop_input("a"));
        assert!(!diagram.has_loop_input("cond"));
        let back = diagram
            .incoming_edges("a")
            .into_iter()
            .find(|e| e.source == "cond")
            .unwrap();
        assert!(diagram.is_loop_edge(back));
    }

    #[test]
    fn test_unconditional_cycle_rejected() {
        let schema: DiagramSchema = serde_json::from_value(json!({
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "a", "type": "template_job", "config": {"template": "x"}},
                {"id": "b", "type": "template_job", "config": {"template": "y"}}
            ],
            "edges": [
                {"source": "start", "target": "a"},
                {"source": "a", "target": "b"},
                {"source": "b", "target": "a"}
            ]
        }))
        .unwrap();
        let err = compile(&schema, &registry()).unwrap_err();
        assert!(matches!(err, CompileError::CyclicDependency { .. }));
    }
}
