//! Constant branch elimination.
//!
//! A `branch` whose condition is a known constant always takes the same arm. The taken arm is
//! inlined into the block holding the `branch`, the join block follows it with its phis resolved
//! to the values of the taken arm, and the other arm is dropped:
//!
//! ```text
//! block #0: c = 1                         block #0: c = 1
//!           branch c, #1, #2, #3                    x = 2
//! block #1: x = 2                    ==>            y = x
//! block #2: z = 3
//! block #3: y = phi #1:x, #2:z
//! ```
//!
//! Any non-zero value is true. Blocks emptied by the rewrite stay in the arena until block
//! reordering drops them.

use crate::{
    analysis::{
        is_simple_section, section_blocks, BlockId, FunctionInstance, ScalarValueInfo,
        SsaInstruction,
    },
    compiler::{
        context::CompilerContext,
        events::{EventKind, EventLog},
        pass::SsaPass,
        passes::utils::{commit, Declines},
    },
    Result,
};

/// Maximum number of branches removed per run.
const MAX_ITERATIONS: usize = 100;

/// A branch with a known outcome.
#[derive(Debug, Clone, Copy)]
struct Plan {
    container: BlockId,
    taken: BlockId,
    discarded: BlockId,
    join: BlockId,
    outcome: bool,
}

/// Removes branches on constant conditions.
pub struct ConstantBranchEliminationPass;

impl Default for ConstantBranchEliminationPass {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantBranchEliminationPass {
    /// Creates a new constant branch elimination pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn find_candidate(
        instance: &FunctionInstance,
        declines: &mut Declines,
        changes: &EventLog,
    ) -> Option<Plan> {
        let info = ScalarValueInfo::new(instance);
        for (container, block) in instance.body.blocks().iter().enumerate() {
            let Some(SsaInstruction::Branch {
                condition,
                then_block,
                else_block,
                end_block,
            }) = block.ending_instruction()
            else {
                continue;
            };
            let Some(value) = info.constant(condition) else {
                continue;
            };
            let outcome = value != 0.0;
            let (taken, discarded) = if outcome {
                (*then_block, *else_block)
            } else {
                (*else_block, *then_block)
            };

            let key = format!("branch #{container}");
            if declines.contains(&key) {
                continue;
            }
            if !is_simple_section(&instance.body, discarded) {
                declines.record(changes, container, &key, "discarded arm contains break or continue");
                continue;
            }
            return Some(Plan {
                container,
                taken,
                discarded,
                join: *end_block,
                outcome,
            });
        }
        None
    }

    fn take_block(instance: &mut FunctionInstance, block: BlockId) -> Result<Vec<SsaInstruction>> {
        instance
            .body
            .block_mut(block)
            .map(|b| b.take_instructions())
            .ok_or_else(|| malformed_error!("block #{} does not exist", block))
    }

    fn append(instance: &mut FunctionInstance, block: BlockId, instructions: Vec<SsaInstruction>) -> Result<()> {
        instance
            .body
            .block_mut(block)
            .ok_or_else(|| malformed_error!("block #{} does not exist", block))?
            .instructions_mut()
            .extend(instructions);
        Ok(())
    }

    /// Turns a join phi into a copy of the value arriving from `from`.
    fn resolve_phi(phi: SsaInstruction, from: BlockId) -> Result<SsaInstruction> {
        let SsaInstruction::Phi { output, sources } = phi else {
            return Ok(phi);
        };
        let source = sources
            .into_iter()
            .find(|s| s.block == from)
            .ok_or_else(|| malformed_error!("phi {} has no source from block #{}", output, from))?;
        Ok(SsaInstruction::copy(output, source.variable))
    }

    fn remove(instance: &mut FunctionInstance, plan: Plan) -> Result<()> {
        let Plan {
            container,
            taken,
            discarded,
            join,
            ..
        } = plan;
        let taken_end = instance.body.block_end(taken);
        let discarded_blocks = section_blocks(&instance.body, discarded);

        if let Some(block) = instance.body.block_mut(container) {
            block.pop_ending_instruction();
        }
        let inlined = Self::take_block(instance, taken)?;
        Self::append(instance, container, inlined)?;

        let target = if taken_end == taken { container } else { taken_end };
        let merged = Self::take_block(instance, join)?
            .into_iter()
            .map(|instruction| Self::resolve_phi(instruction, taken_end))
            .collect::<Result<Vec<_>>>()?;
        Self::append(instance, target, merged)?;

        for block in discarded_blocks {
            Self::take_block(instance, block)?;
        }

        instance.body.rename_blocks(|b| {
            if b == join {
                target
            } else if b == taken {
                container
            } else {
                b
            }
        });
        Ok(())
    }
}

impl SsaPass for ConstantBranchEliminationPass {
    fn name(&self) -> &'static str {
        "constant-branch-elimination"
    }

    fn description(&self) -> &'static str {
        "Inlines the taken arm of branches on constant conditions"
    }

    fn run_on_function(&self, instance: &mut FunctionInstance, ctx: &CompilerContext) -> Result<bool> {
        let changes = EventLog::new();
        let name = instance.name().to_string();
        let mut declines = Declines::new(self.name(), &name);

        for _ in 0..MAX_ITERATIONS {
            let Some(plan) = Self::find_candidate(instance, &mut declines, &changes) else {
                break;
            };
            Self::remove(instance, plan)?;
            changes
                .record(EventKind::BranchRemoved)
                .at(name.as_str(), plan.container)
                .message(format!("always {}, arm #{} dropped", plan.outcome, plan.discarded));
        }

        Ok(commit(&changes, &ctx.events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{validate, FunctionBuilder};

    /// `if c, x = 2; else z = 3; end; y = phi(x, z)` with `c` the given constant.
    fn fixture(condition: f64) -> FunctionInstance {
        FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["y$1"]);
            f.outputs(&["y$1"]);
            f.block(0, |b| {
                b.number("c$1", condition);
                b.branch("c$1", 1, 2, 3);
            });
            f.block(1, |b| b.number("x$1", 2.0));
            f.block(2, |b| b.number("z$1", 3.0));
            f.block(3, |b| b.phi("y$1", &[(1, "x$1"), (2, "z$1")]));
        })
    }

    fn run(instance: &mut FunctionInstance) -> (bool, CompilerContext) {
        let ctx = CompilerContext::with_builtins();
        let changed = ConstantBranchEliminationPass::new()
            .run_on_function(instance, &ctx)
            .expect("pass");
        (changed, ctx)
    }

    fn rendered(instance: &FunctionInstance, block: BlockId) -> Vec<String> {
        instance
            .body
            .block(block)
            .map(|b| b.instructions().iter().map(ToString::to_string).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_true_condition_keeps_then_arm() {
        let mut instance = fixture(1.0);
        let (changed, ctx) = run(&mut instance);
        assert!(changed);
        validate(&instance.body).expect("valid");
        assert_eq!(rendered(&instance, 0), vec!["c$1 = 1", "x$1 = 2", "y$1 = x$1"]);
        assert!((1..=3).all(|b| rendered(&instance, b).is_empty()));
        assert!(ctx.events.has(EventKind::BranchRemoved));
    }

    #[test]
    fn test_zero_condition_keeps_else_arm() {
        let mut instance = fixture(0.0);
        assert!(run(&mut instance).0);
        validate(&instance.body).expect("valid");
        assert_eq!(rendered(&instance, 0), vec!["c$1 = 0", "z$1 = 3", "y$1 = z$1"]);
    }

    #[test]
    fn test_unknown_condition_kept() {
        let mut instance = FunctionBuilder::new("f").build_with(|f| {
            f.logical("c$1");
            f.scalars(&["y$1"]);
            f.outputs(&["y$1"]);
            f.block(0, |b| {
                b.argument("c$1", 0);
                b.branch("c$1", 1, 2, 3);
            });
            f.block(1, |b| b.number("x$1", 2.0));
            f.block(2, |b| b.number("z$1", 3.0));
            f.block(3, |b| b.phi("y$1", &[(1, "x$1"), (2, "z$1")]));
        });
        let before = instance.clone();
        assert!(!run(&mut instance).0);
        assert_eq!(instance, before);
    }

    #[test]
    fn test_nested_taken_arm_continues_in_its_end() {
        let mut instance = FunctionBuilder::new("f").build_with(|f| {
            f.logical("d$1");
            f.scalars(&["w$1", "y$1"]);
            f.outputs(&["y$1"]);
            f.block(0, |b| {
                b.argument("d$1", 0);
                b.number("c$1", 1.0);
                b.branch("c$1", 1, 5, 6);
            });
            f.block(1, |b| b.branch("d$1", 2, 3, 4));
            f.block(2, |b| b.number("u$1", 1.0));
            f.block(3, |b| b.number("v$1", 2.0));
            f.block(4, |b| b.phi("w$1", &[(2, "u$1"), (3, "v$1")]));
            f.block(5, |b| b.number("z$1", 3.0));
            f.block(6, |b| b.phi("y$1", &[(4, "w$1"), (5, "z$1")]));
        });
        assert!(run(&mut instance).0);
        validate(&instance.body).expect("valid");
        assert_eq!(
            rendered(&instance, 0),
            vec!["d$1 = arg 0", "c$1 = 1", "branch d$1, #2, #3, #4"]
        );
        assert_eq!(rendered(&instance, 4), vec!["w$1 = phi #2:u$1, #3:v$1", "y$1 = w$1"]);
        assert!(rendered(&instance, 5).is_empty());
        assert!(rendered(&instance, 6).is_empty());
    }

    #[test]
    fn test_discarded_break_declined() {
        let mut instance = FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["x$2", "x$3"]);
            f.outputs(&["x$3"]);
            f.block(0, |b| {
                b.number("one$1", 1.0);
                b.number("n$1", 4.0);
                b.number("x$1", 0.0);
                b.for_loop("one$1", "one$1", "n$1", 1, 5);
            });
            f.block(1, |b| {
                b.phi("x$2", &[(0, "x$1"), (4, "x$2")]);
                b.iter("i$1");
                b.number("c$1", 0.0);
                b.branch("c$1", 2, 3, 4);
            });
            f.block(2, |b| b.brk());
            f.block(3, |_| {});
            f.block(4, |_| {});
            f.block(5, |b| b.phi("x$3", &[(0, "x$1"), (2, "x$2"), (4, "x$2")]));
        });
        let before = instance.clone();
        let (changed, ctx) = run(&mut instance);
        assert!(!changed);
        assert_eq!(instance, before);
        assert_eq!(ctx.events.count_kind(EventKind::PatternDeclined), 1);
    }
}
