//! Dynamic order calculation.
//!
//! The [`OrderCalculator`] answers one question for the orchestrator: given
//! the diagram and the current execution context, which nodes form the next
//! ready batch? It also owns the state transitions that follow from
//! completions and failures — branch arming, skip propagation, loop
//! re-arming, and terminal detection. It never dispatches anything itself.
//!
//! Node state machine: NotReady (Pending) → Ready → Running →
//! {Completed | Failed | Skipped}.

use crate::graph::{CompiledDiagram, DiagramEdge, EdgeKind};

use super::context::{ExecutionContext, ExecutionStatus, NodeStatus};

/// Disposition of one requirement edge against the current context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeDisposition {
    /// The producer completed and the edge's arming condition holds.
    Satisfied,
    /// The edge can never carry a value in this run (source skipped or
    /// failed, branch not taken, error branch without an error).
    Dead,
    /// The producer has not finished yet.
    Open,
}

pub struct OrderCalculator<'d> {
    diagram: &'d CompiledDiagram,
}

impl<'d> OrderCalculator<'d> {
    pub fn new(diagram: &'d CompiledDiagram) -> Self {
        OrderCalculator { diagram }
    }

    /// All simultaneously ready nodes, as one batch of parallel dispatch
    /// candidates. Ordering is declared edge priority (descending), then
    /// diagram insertion order — deterministic logging only, never implying
    /// serialization.
    pub fn ready_batch(&self, ctx: &ExecutionContext) -> Vec<String> {
        let mut batch: Vec<(i32, String)> = self
            .diagram
            .nodes()
            .filter(|node| self.is_ready(&node.id, ctx))
            .map(|node| (self.batch_priority(&node.id, ctx), node.id.clone()))
            .collect();
        batch.sort_by(|a, b| b.0.cmp(&a.0));
        batch.into_iter().map(|(_, id)| id).collect()
    }

    fn batch_priority(&self, node_id: &str, ctx: &ExecutionContext) -> i32 {
        self.diagram
            .incoming_edges(node_id)
            .iter()
            .filter(|e| self.disposition(e, ctx) == EdgeDisposition::Satisfied)
            .map(|e| e.priority)
            .max()
            .unwrap_or(0)
    }

    /// Node readiness per the dependency rules:
    /// - Pending, and under its iteration bound if loop-capable.
    /// - Every requirement edge (incoming minus loop-back edges) is either
    ///   Satisfied or Dead, with at least one Satisfied.
    /// - A node fed only by loop-back edges is ready once any of them is
    ///   Satisfied.
    pub fn is_ready(&self, node_id: &str, ctx: &ExecutionContext) -> bool {
        if ctx.status_of(node_id) != NodeStatus::Pending {
            return false;
        }
        if let Some(node) = self.diagram.node(node_id) {
            if let Some(max) = node.max_iterations {
                if ctx.exec_count(node_id) >= max {
                    return false;
                }
            }
        }

        let incoming = self.diagram.incoming_edges(node_id);
        if incoming.is_empty() {
            return true;
        }

        let (loop_edges, requirements): (Vec<&&DiagramEdge>, Vec<&&DiagramEdge>) = incoming
            .iter()
            .partition(|e| self.diagram.is_loop_edge(e));

        if requirements.is_empty() {
            return loop_edges
                .iter()
                .any(|e| self.disposition(e, ctx) == EdgeDisposition::Satisfied);
        }

        let mut any_satisfied = false;
        for edge in requirements {
            match self.disposition(edge, ctx) {
                EdgeDisposition::Satisfied => any_satisfied = true,
                EdgeDisposition::Dead => {}
                EdgeDisposition::Open => return false,
            }
        }
        any_satisfied
    }

    fn disposition(&self, edge: &DiagramEdge, ctx: &ExecutionContext) -> EdgeDisposition {
        match ctx.status_of(&edge.source) {
            NodeStatus::Skipped | NodeStatus::Failed => EdgeDisposition::Dead,
            NodeStatus::Pending | NodeStatus::Running => EdgeDisposition::Open,
            NodeStatus::Completed => {
                let is_error = ctx.output(&edge.source).is_some_and(|env| env.is_error());
                match edge.kind {
                    EdgeKind::Data => {
                        if is_error {
                            EdgeDisposition::Dead
                        } else {
                            EdgeDisposition::Satisfied
                        }
                    }
                    EdgeKind::ErrorBranch => {
                        if is_error {
                            EdgeDisposition::Satisfied
                        } else {
                            EdgeDisposition::Dead
                        }
                    }
                    EdgeKind::TrueBranch | EdgeKind::FalseBranch => {
                        let wanted = if edge.kind == EdgeKind::TrueBranch {
                            "true"
                        } else {
                            "false"
                        };
                        if ctx.branch_taken(&edge.source) == Some(wanted) {
                            EdgeDisposition::Satisfied
                        } else if self.may_redecide(&edge.source, ctx) {
                            // A looping condition can still take this branch
                            // on a later iteration; its targets must not be
                            // skipped yet.
                            EdgeDisposition::Open
                        } else {
                            EdgeDisposition::Dead
                        }
                    }
                }
            }
        }
    }

    /// Whether a completed condition may still be dispatched again and pick
    /// a different branch: it sits in a cycle and is under its iteration
    /// bound.
    fn may_redecide(&self, node_id: &str, ctx: &ExecutionContext) -> bool {
        self.diagram.in_cycle(node_id)
            && self
                .diagram
                .node(node_id)
                .and_then(|n| n.max_iterations)
                .is_none_or(|max| ctx.exec_count(node_id) < max)
    }

    /// After a node completes: re-arm loop iterations. Any live outgoing edge
    /// whose target sits in the same cyclic SCC and has already completed
    /// resets that target to Pending for a fresh dispatch — bounded by the
    /// target's own iteration limit. Returns the reset node ids.
    pub fn apply_completion(&self, ctx: &mut ExecutionContext, node_id: &str) -> Vec<String> {
        let mut reset = Vec::new();
        let targets: Vec<String> = self
            .diagram
            .outgoing_edges(node_id)
            .into_iter()
            .filter(|e| self.disposition(e, ctx) == EdgeDisposition::Satisfied)
            .filter(|e| self.diagram.in_same_cycle(&e.source, &e.target))
            .filter(|e| ctx.status_of(&e.target) == NodeStatus::Completed)
            .map(|e| e.target.clone())
            .collect();

        for target in targets {
            let under_bound = self
                .diagram
                .node(&target)
                .and_then(|n| n.max_iterations)
                .is_none_or(|max| ctx.exec_count(&target) < max);
            if under_bound && !reset.contains(&target) {
                ctx.reset_for_iteration(&target);
                reset.push(target);
            }
        }
        reset
    }

    /// Skip propagation to fixpoint: a Pending node all of whose incoming
    /// edges are dead can never run — transition it (and, transitively, its
    /// exclusively-dependent downstream) to Skipped. Nodes still reachable
    /// via another armed path keep an Open or Satisfied edge and survive.
    /// Returns the newly skipped node ids.
    pub fn propagate_skips(&self, ctx: &mut ExecutionContext, now: i64) -> Vec<String> {
        let mut skipped = Vec::new();
        loop {
            let next: Vec<String> = self
                .diagram
                .nodes()
                .filter(|node| ctx.status_of(&node.id) == NodeStatus::Pending)
                .filter(|node| {
                    let incoming = self.diagram.incoming_edges(&node.id);
                    !incoming.is_empty()
                        && incoming
                            .iter()
                            .all(|e| self.disposition(e, ctx) == EdgeDisposition::Dead)
                })
                .map(|node| node.id.clone())
                .collect();

            if next.is_empty() {
                break;
            }
            for node_id in next {
                ctx.mark_skipped(&node_id, now);
                skipped.push(node_id);
            }
        }
        skipped
    }

    /// The branch label that routes flow out of a condition's cycle, used to
    /// force the exit once the iteration bound is reached. `None` when the
    /// condition is not in a cycle.
    pub fn exit_branch(&self, node_id: &str) -> Option<String> {
        if !self.diagram.in_cycle(node_id) {
            return None;
        }
        self.diagram
            .outgoing_edges(node_id)
            .into_iter()
            .find(|e| {
                e.kind.is_branch() && !self.diagram.in_same_cycle(node_id, &e.target)
            })
            .and_then(|e| match e.kind {
                EdgeKind::TrueBranch => Some("true".to_string()),
                EdgeKind::FalseBranch => Some("false".to_string()),
                _ => None,
            })
    }

    /// Whether the run has reached quiescence: nothing ready, nothing
    /// running.
    pub fn is_quiescent(&self, ctx: &ExecutionContext) -> bool {
        !ctx.has_running_nodes() && self.ready_batch(ctx).is_empty()
    }

    /// Terminal classification at quiescence. Any node still Pending at that
    /// point (e.g. gated out by its iteration bound) is folded into Skipped
    /// first, so the completed-iff-every-reachable-non-skipped-node-completed
    /// invariant holds.
    pub fn terminal_status(&self, ctx: &mut ExecutionContext, now: i64) -> Option<ExecutionStatus> {
        if !self.is_quiescent(ctx) {
            return None;
        }
        let pending: Vec<String> = ctx
            .nodes_with_status(NodeStatus::Pending)
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        for node_id in pending {
            ctx.mark_skipped(&node_id, now);
        }

        let failed = !ctx.nodes_with_status(NodeStatus::Failed).is_empty();
        Some(if failed {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        })
    }
}
