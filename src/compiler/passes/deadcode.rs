//! Dead code elimination.
//!
//! Removes instructions whose results nobody observes. An instruction is kept when it is a
//! terminator, a runtime check, metadata, an argument binding, has side effects, or defines
//! a function output; everything it reads is kept in turn. The rest is deleted, unused phis
//! and loop-carried cycles of otherwise dead values included.

use std::collections::{HashSet, VecDeque};

use crate::{
    analysis::{BlockId, DefUseIndex, FunctionBody, FunctionInstance, InstructionFlags, SsaInstruction},
    compiler::{
        context::CompilerContext,
        events::{EventKind, EventLog},
        pass::SsaPass,
        passes::utils::commit,
    },
    Result,
};

/// Removes instructions without observable effect.
pub struct DeadCodeEliminationPass;

impl Default for DeadCodeEliminationPass {
    fn default() -> Self {
        Self::new()
    }
}

impl DeadCodeEliminationPass {
    /// Creates a new dead code elimination pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn is_root(body: &FunctionBody, instruction: &SsaInstruction) -> bool {
        let pinned = InstructionFlags::TERMINATOR
            | InstructionFlags::SIDE_EFFECT
            | InstructionFlags::VALIDATION
            | InstructionFlags::METADATA;
        instruction.flags().intersects(pinned)
            || matches!(instruction, SsaInstruction::Argument { .. })
            || instruction.outputs().iter().any(|output| body.is_output(output))
    }

    /// Returns the positions of every live instruction.
    fn live_instructions(body: &FunctionBody) -> HashSet<(BlockId, usize)> {
        let index = DefUseIndex::build(body);
        let mut live = HashSet::new();
        let mut worklist = VecDeque::new();

        for (block, position, instruction) in body.instructions() {
            if Self::is_root(body, instruction) {
                live.insert((block, position));
                worklist.push_back(instruction);
            }
        }

        while let Some(instruction) = worklist.pop_front() {
            for input in instruction.inputs() {
                let Some(location) = index.definition(input) else {
                    continue;
                };
                let key: (BlockId, usize) = location.into();
                if !live.insert(key) {
                    continue;
                }
                if let Some(definition) = index.def_instruction(body, input) {
                    worklist.push_back(definition);
                }
            }
        }

        live
    }
}

impl SsaPass for DeadCodeEliminationPass {
    fn name(&self) -> &'static str {
        "dead-code-elimination"
    }

    fn description(&self) -> &'static str {
        "Removes instructions and phis whose results are never used"
    }

    fn run_on_function(&self, instance: &mut FunctionInstance, ctx: &CompilerContext) -> Result<bool> {
        let changes = EventLog::new();
        let name = instance.name().to_string();
        let live = Self::live_instructions(&instance.body);

        for (block_id, block) in instance.body.blocks_mut().iter_mut().enumerate() {
            if (0..block.len()).all(|position| live.contains(&(block_id, position))) {
                continue;
            }
            let (kept, removed): (Vec<_>, Vec<_>) = block
                .take_instructions()
                .into_iter()
                .enumerate()
                .partition(|(position, _)| live.contains(&(block_id, *position)));
            block.set_instructions(kept.into_iter().map(|(_, instruction)| instruction).collect());

            for (_, instruction) in removed {
                changes
                    .record(EventKind::InstructionRemoved)
                    .at(name.as_str(), block_id)
                    .message(instruction.to_string());
            }
        }

        Ok(commit(&changes, &ctx.events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::validate;

    fn run(instance: &mut FunctionInstance) -> (bool, CompilerContext) {
        let ctx = CompilerContext::with_builtins();
        let changed = DeadCodeEliminationPass::new()
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
    fn test_unused_chain_removed() {
        let mut instance = crate::analysis::FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["a$1", "t$1", "t$2", "y$1"]);
            f.outputs(&["y$1"]);
            f.block(0, |b| {
                b.argument("a$1", 0);
                b.call("plus", &["t$1"], &["a$1", "a$1"]);
                b.call("times", &["t$2"], &["t$1", "t$1"]);
                b.call("minus", &["y$1"], &["a$1", "a$1"]);
            });
        });
        let (changed, ctx) = run(&mut instance);
        assert!(changed);
        validate(&instance.body).expect("valid");
        assert_eq!(rendered(&instance, 0), vec!["a$1 = arg 0", "y$1 = minus a$1, a$1"]);
        assert_eq!(ctx.events.count_kind(EventKind::InstructionRemoved), 2);
    }

    #[test]
    fn test_effects_and_metadata_kept() {
        let mut instance = crate::analysis::FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["a$1", "b$1", "u$1"]);
            f.block(0, |b| {
                b.argument("a$1", 0);
                b.argument("b$1", 1);
                b.line(3);
                b.effect_call("disp", &[], &["a$1"]);
                b.validate_equal("a$1", "b$1");
                b.argument("u$1", 2);
            });
        });
        let before = instance.clone();
        let (changed, _) = run(&mut instance);
        assert!(!changed);
        assert_eq!(instance, before);
    }

    #[test]
    fn test_dead_loop_carried_cycle_removed() {
        let mut instance = crate::analysis::FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["n$1", "one$1", "x$1", "x$2", "x$3", "x$4", "i$1"]);
            f.block(0, |b| {
                b.argument("n$1", 0);
                b.number("one$1", 1.0);
                b.number("x$1", 0.0);
                b.for_loop("one$1", "one$1", "n$1", 1, 2);
            });
            f.block(1, |b| {
                b.phi("x$2", &[(0, "x$1"), (1, "x$3")]);
                b.iter("i$1");
                b.call("plus", &["x$3"], &["x$2", "i$1"]);
            });
            f.block(2, |b| {
                b.phi("x$4", &[(0, "x$1"), (1, "x$3")]);
            });
        });
        assert!(run(&mut instance).0);
        validate(&instance.body).expect("valid");
        assert_eq!(
            rendered(&instance, 0),
            vec!["n$1 = arg 0", "one$1 = 1", "for one$1, one$1, n$1, #1, #2"]
        );
        assert!(instance.body.blocks()[1].is_empty());
        assert!(instance.body.blocks()[2].is_empty());
    }

    #[test]
    fn test_idempotent() {
        let mut instance = crate::analysis::FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["a$1", "t$1"]);
            f.block(0, |b| {
                b.argument("a$1", 0);
                b.call("plus", &["t$1"], &["a$1", "a$1"]);
            });
        });
        assert!(run(&mut instance).0);
        let once = instance.clone();
        assert!(!run(&mut instance).0);
        assert_eq!(instance, once);
    }
}
