//! Structured control-flow graph view of a function body.
//!
//! Function bodies never contain arbitrary jumps: control flow is implied by the structured
//! `branch` and `for` instructions. [`SsaCfg`] materializes the implied edges so that generic
//! graph algorithms (dominators, traversal orders) can run on a body.
//!
//! # Edges
//!
//! | Instruction ending block `b`        | Edges                                               |
//! |--------------------------------------|-----------------------------------------------------|
//! | `branch c, #t, #e, #j`               | `b -> t`, `b -> e`; arms continue at `j`            |
//! | `for s, i, e, #l, #a`                | `b -> l`, `b -> a`; the body continues at `l`, `a`  |
//! | `break`                              | `b -> a` of the innermost loop                      |
//! | `continue`                           | `b -> l`, `b -> a` of the innermost loop            |
//! | nothing                              | to the continuation of the enclosing structure      |
//!
//! A block that falls off the end of the function has no successors.

use crate::{
    analysis::ssa::{
        function::FunctionBody,
        instruction::{BlockId, SsaInstruction},
    },
    utils::graph::{GraphBase, NodeId, Predecessors, RootedGraph, Successors},
};

/// Where control goes when a block has no terminator.
#[derive(Clone)]
struct Continuation {
    /// Blocks reached by falling through.
    fallthrough: Vec<BlockId>,
    /// Header and exit block of the innermost enclosing loop.
    innermost_loop: Option<(BlockId, BlockId)>,
}

/// A control-flow graph over the blocks of a [`FunctionBody`].
#[derive(Debug, Clone)]
pub struct SsaCfg {
    successors: Vec<Vec<NodeId>>,
    predecessors: Vec<Vec<NodeId>>,
    /// Innermost enclosing loop header of each visited block
    loop_header: Vec<Option<BlockId>>,
}

impl SsaCfg {
    /// Builds the structured control-flow graph of `body`.
    ///
    /// Targets that do not name an existing block are ignored.
    #[must_use]
    pub fn from_body(body: &FunctionBody) -> Self {
        let count = body.block_count();
        let mut cfg = Self {
            successors: vec![Vec::new(); count],
            predecessors: vec![Vec::new(); count],
            loop_header: vec![None; count],
        };
        if count == 0 {
            return cfg;
        }

        let mut visited = vec![false; count];
        let top = Continuation {
            fallthrough: Vec::new(),
            innermost_loop: None,
        };

        // (block, continuation) work list; structure is a tree so each block is visited once.
        let mut work = vec![(0usize, top)];
        while let Some((block_id, continuation)) = work.pop() {
            if block_id >= count || visited[block_id] {
                continue;
            }
            visited[block_id] = true;
            cfg.loop_header[block_id] = continuation.innermost_loop.map(|(header, _)| header);

            let ending = body
                .block(block_id)
                .and_then(|block| block.ending_instruction());

            match ending {
                Some(SsaInstruction::Branch {
                    then_block,
                    else_block,
                    end_block,
                    ..
                }) => {
                    cfg.add_edge(block_id, *then_block);
                    cfg.add_edge(block_id, *else_block);
                    let arm = Continuation {
                        fallthrough: vec![*end_block],
                        innermost_loop: continuation.innermost_loop,
                    };
                    work.push((*end_block, continuation));
                    work.push((*else_block, arm.clone()));
                    work.push((*then_block, arm));
                }
                Some(SsaInstruction::For {
                    loop_block,
                    end_block,
                    ..
                }) => {
                    cfg.add_edge(block_id, *loop_block);
                    cfg.add_edge(block_id, *end_block);
                    let body_continuation = Continuation {
                        fallthrough: vec![*loop_block, *end_block],
                        innermost_loop: Some((*loop_block, *end_block)),
                    };
                    work.push((*end_block, continuation));
                    work.push((*loop_block, body_continuation));
                }
                Some(SsaInstruction::Break) => {
                    if let Some((_, exit)) = continuation.innermost_loop {
                        cfg.add_edge(block_id, exit);
                    }
                }
                Some(SsaInstruction::Continue) => {
                    if let Some((header, exit)) = continuation.innermost_loop {
                        cfg.add_edge(block_id, header);
                        cfg.add_edge(block_id, exit);
                    }
                }
                _ => {
                    for target in continuation.fallthrough {
                        cfg.add_edge(block_id, target);
                    }
                }
            }
        }

        cfg
    }

    fn add_edge(&mut self, from: BlockId, to: BlockId) {
        let count = self.successors.len();
        if from >= count || to >= count {
            return;
        }
        let to_node = NodeId::new(to);
        let from_node = NodeId::new(from);
        if !self.successors[from].contains(&to_node) {
            self.successors[from].push(to_node);
            self.predecessors[to].push(from_node);
        }
    }

    /// Returns the predecessor block ids of `block`.
    #[must_use]
    pub fn block_predecessors(&self, block: BlockId) -> Vec<BlockId> {
        self.predecessors
            .get(block)
            .map(|preds| preds.iter().map(|n| n.index()).collect())
            .unwrap_or_default()
    }

    /// Returns the successor block ids of `block`.
    #[must_use]
    pub fn block_successors(&self, block: BlockId) -> Vec<BlockId> {
        self.successors
            .get(block)
            .map(|succs| succs.iter().map(|n| n.index()).collect())
            .unwrap_or_default()
    }

    /// Returns the header (body entry block) of the innermost loop containing `block`.
    #[must_use]
    pub fn innermost_loop(&self, block: BlockId) -> Option<BlockId> {
        self.loop_header.get(block).copied().flatten()
    }
}

impl GraphBase for SsaCfg {
    fn node_count(&self) -> usize {
        self.successors.len()
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.successors.len()).map(NodeId::new)
    }
}

impl Successors for SsaCfg {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.successors
            .get(node.index())
            .into_iter()
            .flat_map(|succs| succs.iter().copied())
    }
}

impl Predecessors for SsaCfg {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.predecessors
            .get(node.index())
            .into_iter()
            .flat_map(|preds| preds.iter().copied())
    }
}

impl RootedGraph for SsaCfg {
    fn entry(&self) -> NodeId {
        NodeId::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ssa::builder::FunctionBuilder;

    #[test]
    fn test_branch_edges() {
        let instance = FunctionBuilder::new("f").build_with(|f| {
            f.logical("c$1");
            f.block(0, |b| {
                b.argument("c$1", 0);
                b.branch("c$1", 1, 2, 3);
            });
            f.block(1, |_| {});
            f.block(2, |_| {});
            f.block(3, |_| {});
        });
        let cfg = SsaCfg::from_body(&instance.body);
        assert_eq!(cfg.block_successors(0), vec![1, 2]);
        assert_eq!(cfg.block_predecessors(3), vec![1, 2]);
    }

    #[test]
    fn test_loop_edges() {
        let instance = FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["s$1", "e$1"]);
            f.block(0, |b| {
                b.number("s$1", 1.0);
                b.number("e$1", 10.0);
                b.for_loop("s$1", "s$1", "e$1", 1, 2);
            });
            f.block(1, |_| {});
            f.block(2, |_| {});
        });
        let cfg = SsaCfg::from_body(&instance.body);
        assert_eq!(cfg.block_successors(0), vec![1, 2]);
        assert_eq!(cfg.block_successors(1), vec![1, 2]);
        assert_eq!(cfg.block_predecessors(1), vec![0, 1]);
        assert_eq!(cfg.block_predecessors(2), vec![0, 1]);
        assert_eq!(cfg.innermost_loop(1), Some(1));
        assert_eq!(cfg.innermost_loop(2), None);
    }
}
