use crate::error::CompileError;
use crate::nodes::{NODE_TYPE_CONDITION, NODE_TYPE_ENDPOINT, NODE_TYPE_START};

use super::builder::CompiledDiagram;

/// Structural validation beyond what [`compile`](super::compile) checks while
/// building: cycle legality and isolated nodes.
pub fn validate(diagram: &CompiledDiagram) -> Result<(), CompileError> {
    validate_cycles(diagram)?;
    validate_connectivity(diagram)?;
    Ok(())
}

/// A cycle is legal only if it contains a condition node with an edge leaving
/// the cycle — the exit branch that makes the loop breakable.
fn validate_cycles(diagram: &CompiledDiagram) -> Result<(), CompileError> {
    let mut checked: std::collections::HashSet<Vec<String>> = std::collections::HashSet::new();

    for node in diagram.nodes() {
        if !diagram.in_cycle(&node.id) {
            continue;
        }

        let mut members: Vec<String> = diagram
            .node_ids()
            .filter(|other| diagram.in_same_cycle(&node.id, other))
            .map(|id| id.to_string())
            .collect();
        members.sort();
        if !checked.insert(members.clone()) {
            continue;
        }

        let has_exit_condition = members.iter().any(|member| {
            let is_condition = diagram
                .node(member)
                .is_some_and(|n| n.node_type == NODE_TYPE_CONDITION);
            is_condition
                && diagram
                    .outgoing_edges(member)
                    .iter()
                    .any(|e| !diagram.in_same_cycle(member, &e.target))
        });

        if !has_exit_condition {
            return Err(CompileError::CyclicDependency { nodes: members });
        }
    }

    Ok(())
}

/// Reject nodes with no edges at all; an unreachable island would sit Pending
/// forever and the run would never reach its terminal state.
fn validate_connectivity(diagram: &CompiledDiagram) -> Result<(), CompileError> {
    if diagram.node_count() == 1 {
        // A lone start node is a legal (if pointless) diagram.
        return Ok(());
    }
    for node in diagram.nodes() {
        if node.node_type == NODE_TYPE_START || node.node_type == NODE_TYPE_ENDPOINT {
            continue;
        }
        if diagram.incoming_edges(&node.id).is_empty()
            && diagram.outgoing_edges(&node.id).is_empty()
        {
            return Err(CompileError::SchemaViolation(format!(
                "isolated node: {}",
                node.id
            )));
        }
    }
    Ok(())
}
