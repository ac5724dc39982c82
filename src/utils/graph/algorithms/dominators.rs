//! Dominator tree computation.
//!
//! A node `d` **dominates** a node `n` if every path from the entry node to `n` must pass
//! through `d`. The **immediate dominator** of `n` is the unique node that strictly dominates
//! `n` but does not strictly dominate any other dominator of `n`.
//!
//! # Algorithm
//!
//! The iterative scheme of Cooper, Harvey and Kennedy: immediate dominators are refined in
//! reverse postorder by intersecting the dominator chains of already processed predecessors
//! until nothing changes. Function bodies are small and structured, so this converges in two
//! or three sweeps.

use crate::utils::graph::{
    algorithms::traversal::reverse_postorder, NodeId, Predecessors, RootedGraph, Successors,
};

/// Result of dominator tree computation.
///
/// Nodes unreachable from the entry have no dominator information; every query involving
/// them answers `false` / `None`.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    /// The entry (root) node of the dominator tree
    entry: NodeId,
    /// Immediate dominator for each node, `None` for the entry and unreachable nodes
    idom: Vec<Option<NodeId>>,
    /// Whether the node is reachable from the entry
    reachable: Vec<bool>,
}

impl DominatorTree {
    /// Returns the entry (root) node of the dominator tree.
    #[inline]
    #[must_use]
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    /// Returns the immediate dominator of a node, or `None` for the entry node and nodes
    /// that cannot be reached.
    #[must_use]
    pub fn immediate_dominator(&self, node: NodeId) -> Option<NodeId> {
        self.idom.get(node.index()).copied().flatten()
    }

    /// Returns `true` if `node` is reachable from the entry.
    #[must_use]
    pub fn is_reachable(&self, node: NodeId) -> bool {
        self.reachable.get(node.index()).copied().unwrap_or(false)
    }

    /// Checks if node `a` dominates node `b`.
    ///
    /// A reachable node dominates itself.
    #[must_use]
    pub fn dominates(&self, a: NodeId, b: NodeId) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }

        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.immediate_dominator(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Checks if node `a` strictly dominates node `b`.
    #[inline]
    #[must_use]
    pub fn strictly_dominates(&self, a: NodeId, b: NodeId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Returns the number of nodes covered by this tree.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.idom.len()
    }
}

/// Computes the dominator tree of `graph` rooted at `entry`.
///
/// # Arguments
///
/// * `graph` - The graph to analyze.
/// * `entry` - The root node.
///
/// # Returns
///
/// The [`DominatorTree`] of all nodes reachable from `entry`.
pub fn compute_dominators<G>(graph: &G, entry: NodeId) -> DominatorTree
where
    G: Successors + Predecessors,
{
    let node_count = graph.node_count();
    let mut idom: Vec<Option<NodeId>> = vec![None; node_count];
    let mut reachable = vec![false; node_count];

    if entry.index() >= node_count {
        return DominatorTree {
            entry,
            idom,
            reachable,
        };
    }

    let order = reverse_postorder(graph, entry);
    let mut rpo_number = vec![usize::MAX; node_count];
    for (position, node) in order.iter().enumerate() {
        rpo_number[node.index()] = position;
        reachable[node.index()] = true;
    }

    // The entry temporarily dominates itself so chain intersection terminates.
    idom[entry.index()] = Some(entry);

    let mut changed = true;
    while changed {
        changed = false;
        for &node in order.iter().skip(1) {
            let mut new_idom: Option<NodeId> = None;
            for pred in graph.predecessors(node) {
                if pred.index() >= node_count || idom[pred.index()].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => pred,
                    Some(current) => intersect(&idom, &rpo_number, pred, current),
                });
            }

            if new_idom.is_some() && idom[node.index()] != new_idom {
                idom[node.index()] = new_idom;
                changed = true;
            }
        }
    }

    idom[entry.index()] = None;

    DominatorTree {
        entry,
        idom,
        reachable,
    }
}

/// Convenience function to compute dominators for a [`RootedGraph`].
pub fn compute_dominators_rooted<G>(graph: &G) -> DominatorTree
where
    G: RootedGraph,
{
    compute_dominators(graph, graph.entry())
}

fn intersect(idom: &[Option<NodeId>], rpo: &[usize], a: NodeId, b: NodeId) -> NodeId {
    let mut finger1 = a;
    let mut finger2 = b;
    while finger1 != finger2 {
        while rpo[finger1.index()] > rpo[finger2.index()] {
            match idom[finger1.index()] {
                Some(parent) => finger1 = parent,
                None => return finger2,
            }
        }
        while rpo[finger2.index()] > rpo[finger1.index()] {
            match idom[finger2.index()] {
                Some(parent) => finger2 = parent,
                None => return finger1,
            }
        }
    }
    finger1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::tests::TestGraph;

    #[test]
    fn test_diamond() {
        let graph = TestGraph::new(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let tree = compute_dominators_rooted(&graph);
        assert_eq!(tree.immediate_dominator(NodeId::new(3)), Some(NodeId::new(0)));
        assert!(tree.dominates(NodeId::new(0), NodeId::new(3)));
        assert!(!tree.dominates(NodeId::new(1), NodeId::new(3)));
        assert!(tree.dominates(NodeId::new(2), NodeId::new(2)));
        assert!(!tree.strictly_dominates(NodeId::new(2), NodeId::new(2)));
    }

    #[test]
    fn test_loop() {
        // 0 -> 1, 1 -> 2, 2 -> 1, 1 -> 3
        let graph = TestGraph::new(4, &[(0, 1), (1, 2), (2, 1), (1, 3)]);
        let tree = compute_dominators(&graph, NodeId::new(0));
        assert_eq!(tree.immediate_dominator(NodeId::new(2)), Some(NodeId::new(1)));
        assert_eq!(tree.immediate_dominator(NodeId::new(3)), Some(NodeId::new(1)));
        assert_eq!(tree.immediate_dominator(NodeId::new(0)), None);
    }

    #[test]
    fn test_unreachable() {
        let graph = TestGraph::new(3, &[(0, 1), (2, 1)]);
        let tree = compute_dominators(&graph, NodeId::new(0));
        assert!(!tree.is_reachable(NodeId::new(2)));
        assert!(!tree.dominates(NodeId::new(2), NodeId::new(1)));
        assert_eq!(tree.immediate_dominator(NodeId::new(1)), Some(NodeId::new(0)));
    }
}
