//! Block reordering.
//!
//! Renumbers blocks into structured control-flow order: a block, then the blocks of its arms
//! or loop body, then its join or after-loop block. Blocks not reached from block 0 are
//! dropped, along with phi sources flowing in from them. Every target and phi source is
//! rewritten through the same map so the body never holds a mix of old and new ids.

use std::collections::HashMap;

use crate::{
    analysis::{BlockId, FunctionBody, FunctionInstance, SsaBlock, SsaInstruction},
    compiler::{
        context::CompilerContext,
        events::{EventKind, EventLog},
        pass::SsaPass,
        passes::utils::commit,
    },
    Result,
};

/// Renumbers blocks densely in structured order.
pub struct BlockReorderingPass;

impl Default for BlockReorderingPass {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockReorderingPass {
    /// Creates a new block reordering pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Returns the reachable blocks in structured pre-order.
    fn structured_order(body: &FunctionBody) -> Vec<BlockId> {
        let count = body.block_count();
        let mut visited = vec![false; count];
        let mut order = Vec::with_capacity(count);
        let mut work = vec![0usize];

        while let Some(block_id) = work.pop() {
            if block_id >= count || visited[block_id] {
                continue;
            }
            visited[block_id] = true;
            order.push(block_id);

            match body.block(block_id).and_then(SsaBlock::ending_instruction) {
                Some(SsaInstruction::Branch {
                    then_block,
                    else_block,
                    end_block,
                    ..
                }) => {
                    work.push(*end_block);
                    work.push(*else_block);
                    work.push(*then_block);
                }
                Some(SsaInstruction::For {
                    loop_block,
                    end_block,
                    ..
                }) => {
                    work.push(*end_block);
                    work.push(*loop_block);
                }
                _ => {}
            }
        }

        order
    }

    fn drop_unreachable_sources(block: &mut SsaBlock, renumbering: &HashMap<BlockId, BlockId>) {
        for instruction in block.instructions_mut() {
            if let SsaInstruction::Phi { sources, .. } = instruction {
                sources.retain(|source| renumbering.contains_key(&source.block));
            }
        }
    }
}

impl SsaPass for BlockReorderingPass {
    fn name(&self) -> &'static str {
        "block-reordering"
    }

    fn description(&self) -> &'static str {
        "Drops unreachable blocks and renumbers the rest in control-flow order"
    }

    fn run_on_function(&self, instance: &mut FunctionInstance, ctx: &CompilerContext) -> Result<bool> {
        let order = Self::structured_order(&instance.body);
        let count = instance.body.block_count();
        if order.len() == count && order.iter().enumerate().all(|(new, old)| new == *old) {
            return Ok(false);
        }

        let renumbering: HashMap<BlockId, BlockId> = order
            .iter()
            .enumerate()
            .map(|(new, old)| (*old, new))
            .collect();

        let mut old_blocks: Vec<Option<SsaBlock>> = instance
            .body
            .blocks_mut()
            .iter_mut()
            .map(|block| Some(std::mem::take(block)))
            .collect();
        let mut blocks = Vec::with_capacity(order.len());
        for old in &order {
            let Some(mut block) = old_blocks.get_mut(*old).and_then(Option::take) else {
                return Err(malformed_error!("block #{} visited twice", old));
            };
            Self::drop_unreachable_sources(&mut block, &renumbering);
            for instruction in block.instructions_mut() {
                instruction.rename_blocks(|id| renumbering.get(&id).copied().unwrap_or(id));
            }
            blocks.push(block);
        }
        instance.body.set_blocks(blocks);

        let changes = EventLog::new();
        changes
            .record(EventKind::BlocksReordered)
            .at(instance.name(), 0)
            .message(format!(
                "{} block(s) kept, {} dropped",
                order.len(),
                count - order.len()
            ));
        Ok(commit(&changes, &ctx.events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{validate, FunctionBuilder};

    fn run(instance: &mut FunctionInstance) -> (bool, CompilerContext) {
        let ctx = CompilerContext::with_builtins();
        let changed = BlockReorderingPass::new()
            .run_on_function(instance, &ctx)
            .expect("pass");
        (changed, ctx)
    }

    fn rendered(instance: &FunctionInstance, block: BlockId) -> Vec<String> {
        instance.body.blocks()[block]
            .instructions()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn test_branch_renumbered_in_order() {
        let mut instance = FunctionBuilder::new("f").build_with(|f| {
            f.logical("c$1");
            f.scalars(&["x$1", "x$2", "x$3"]);
            f.outputs(&["x$3"]);
            f.block(0, |b| {
                b.argument("c$1", 0);
                b.branch("c$1", 3, 1, 2);
            });
            f.block(1, |b| b.number("x$2", 2.0));
            f.block(2, |b| b.phi("x$3", &[(3, "x$1"), (1, "x$2")]));
            f.block(3, |b| b.number("x$1", 1.0));
        });
        let (changed, ctx) = run(&mut instance);
        assert!(changed);
        validate(&instance.body).expect("valid");
        assert_eq!(rendered(&instance, 0)[1], "branch c$1, #1, #2, #3");
        assert_eq!(rendered(&instance, 1), vec!["x$1 = 1"]);
        assert_eq!(rendered(&instance, 2), vec!["x$2 = 2"]);
        assert_eq!(rendered(&instance, 3), vec!["x$3 = phi #1:x$1, #2:x$2"]);
        assert!(ctx.events.has(EventKind::BlocksReordered));
    }

    #[test]
    fn test_unreachable_blocks_dropped() {
        let mut instance = FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["n$1", "one$1", "i$1", "z$1"]);
            f.block(0, |b| {
                b.argument("n$1", 0);
                b.number("one$1", 1.0);
                b.for_loop("one$1", "one$1", "n$1", 3, 4);
            });
            f.block(2, |b| b.number("z$1", 0.0));
            f.block(3, |b| b.iter("i$1"));
            f.block(4, |_| {});
        });
        assert_eq!(instance.body.block_count(), 5);
        assert!(run(&mut instance).0);
        validate(&instance.body).expect("valid");
        assert_eq!(instance.body.block_count(), 3);
        assert_eq!(rendered(&instance, 0)[2], "for one$1, one$1, n$1, #1, #2");
        assert_eq!(rendered(&instance, 1), vec!["i$1 = iter"]);
        assert!(instance.body.blocks()[2].is_empty());
        assert!(!instance.body.to_string().contains("z$1"));
    }

    #[test]
    fn test_ordered_body_unchanged() {
        let mut instance = FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["n$1", "one$1", "i$1"]);
            f.block(0, |b| {
                b.argument("n$1", 0);
                b.number("one$1", 1.0);
                b.for_loop("one$1", "one$1", "n$1", 1, 2);
            });
            f.block(1, |b| b.iter("i$1"));
            f.block(2, |_| {});
        });
        let before = instance.clone();
        let (changed, ctx) = run(&mut instance);
        assert!(!changed);
        assert_eq!(instance, before);
        assert!(ctx.events.is_empty());
    }
}
