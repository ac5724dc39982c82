//! Generic graph abstractions used by the control-flow analyses.
//!
//! Graphs are described through a small set of traits rather than a concrete container, so
//! the structured CFG view of a function body can be handed directly to the algorithms in
//! [`algorithms`] without first copying it into an adjacency structure.
//!
//! - [`GraphBase`] - node count and node enumeration
//! - [`Successors`] / [`Predecessors`] - edge queries
//! - [`RootedGraph`] - graphs with a distinguished entry node

pub mod algorithms;

use std::fmt;

/// Identifier of a node within a graph.
///
/// For control-flow graphs the index is the block id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Creates a new `NodeId` from a raw index value.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        NodeId(index)
    }

    /// Returns the raw index value of this node identifier.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<usize> for NodeId {
    fn from(index: usize) -> Self {
        NodeId(index)
    }
}

/// Basic information about a graph's node set.
pub trait GraphBase {
    /// Returns the number of nodes in the graph.
    fn node_count(&self) -> usize;

    /// Returns an iterator over all node identifiers.
    fn node_ids(&self) -> impl Iterator<Item = NodeId>;
}

/// Graphs that can enumerate the outgoing edges of a node.
pub trait Successors: GraphBase {
    /// Returns the successors of `node`.
    ///
    /// # Arguments
    ///
    /// * `node` - The node whose successors are requested.
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// Graphs that can enumerate the incoming edges of a node.
pub trait Predecessors: GraphBase {
    /// Returns the predecessors of `node`.
    ///
    /// # Arguments
    ///
    /// * `node` - The node whose predecessors are requested.
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// A graph with a single distinguished entry node.
pub trait RootedGraph: Successors + Predecessors {
    /// Returns the entry node.
    fn entry(&self) -> NodeId;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Adjacency-list graph used by the algorithm tests.
    pub(crate) struct TestGraph {
        successors: Vec<Vec<NodeId>>,
        predecessors: Vec<Vec<NodeId>>,
    }

    impl TestGraph {
        pub(crate) fn new(node_count: usize, edges: &[(usize, usize)]) -> Self {
            let mut successors = vec![Vec::new(); node_count];
            let mut predecessors = vec![Vec::new(); node_count];
            for &(from, to) in edges {
                successors[from].push(NodeId::new(to));
                predecessors[to].push(NodeId::new(from));
            }
            Self {
                successors,
                predecessors,
            }
        }
    }

    impl GraphBase for TestGraph {
        fn node_count(&self) -> usize {
            self.successors.len()
        }

        fn node_ids(&self) -> impl Iterator<Item = NodeId> {
            (0..self.successors.len()).map(NodeId::new)
        }
    }

    impl Successors for TestGraph {
        fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
            self.successors[node.index()].iter().copied()
        }
    }

    impl Predecessors for TestGraph {
        fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
            self.predecessors[node.index()].iter().copied()
        }
    }

    impl RootedGraph for TestGraph {
        fn entry(&self) -> NodeId {
            NodeId::new(0)
        }
    }

    #[test]
    fn test_node_id_display() {
        assert_eq!(NodeId::new(3).to_string(), "#3");
        assert_eq!(NodeId::from(7).index(), 7);
    }

    #[test]
    fn test_graph_edges() {
        let graph = TestGraph::new(3, &[(0, 1), (0, 2), (1, 2)]);
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.successors(NodeId::new(0)).count(), 2);
        let preds: Vec<_> = graph.predecessors(NodeId::new(2)).collect();
        assert_eq!(preds, vec![NodeId::new(0), NodeId::new(1)]);
        assert_eq!(graph.entry(), NodeId::new(0));
    }
}
