//! Depth-first orderings.

use crate::utils::graph::{NodeId, Successors};

/// Computes the postorder of all nodes reachable from `start`.
///
/// Successors are visited in the order the graph yields them. The traversal is iterative so
/// deeply nested loop bodies do not exhaust the stack.
///
/// # Arguments
///
/// * `graph` - The graph to traverse.
/// * `start` - The node to start from.
///
/// # Returns
///
/// Reachable nodes, each appearing after all nodes first reached through it.
pub fn postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let node_count = graph.node_count();
    if start.index() >= node_count {
        return Vec::new();
    }

    let mut visited = vec![false; node_count];
    let mut order = Vec::with_capacity(node_count);
    let mut stack: Vec<(NodeId, Vec<NodeId>)> = Vec::new();

    visited[start.index()] = true;
    stack.push((start, graph.successors(start).collect()));

    while let Some((node, pending)) = stack.last_mut() {
        // Successors are consumed front to back.
        if pending.is_empty() {
            order.push(*node);
            stack.pop();
            continue;
        }

        let next = pending.remove(0);
        if next.index() < node_count && !visited[next.index()] {
            visited[next.index()] = true;
            let successors = graph.successors(next).collect();
            stack.push((next, successors));
        }
    }

    order
}

/// Computes the reverse postorder of all nodes reachable from `start`.
///
/// In reverse postorder every node precedes its successors except along back edges, which
/// makes it the natural iteration order for forward data-flow problems.
pub fn reverse_postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let mut order = postorder(graph, start);
    order.reverse();
    order
}
