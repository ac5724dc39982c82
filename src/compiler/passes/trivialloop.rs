//! Trivial loop elimination.
//!
//! Loops whose trip count is statically 0 or 1 are removed:
//!
//! - an empty range (`1:0:1`, `2:1:1`, `1:-1:2`) deletes the loop; after-loop phis take the
//!   value flowing in from before the loop;
//! - a single iteration (`k:s:k` with `s` a known non-zero constant) inlines the body into the
//!   block holding the `for`.
//!
//! Blocks emptied by either rewrite stay in the arena until block reordering drops them.

use std::collections::HashMap;

use crate::{
    analysis::{
        is_simple_section, section_blocks, BlockId, ForLoop, FunctionInstance, ScalarValueInfo,
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

/// Maximum number of loops removed per run.
const MAX_ITERATIONS: usize = 100;

/// Statically known trip count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TripCount {
    Zero,
    One,
}

/// Removes loops that run zero times or exactly once.
pub struct TrivialLoopEliminationPass;

impl Default for TrivialLoopEliminationPass {
    fn default() -> Self {
        Self::new()
    }
}

impl TrivialLoopEliminationPass {
    /// Creates a new trivial loop elimination pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn trip_count(info: &ScalarValueInfo<'_>, for_loop: &ForLoop) -> Option<TripCount> {
        let interval = info.constant(&for_loop.interval)?;
        if interval == 0.0 {
            return Some(TripCount::Zero);
        }
        if let (Some(start), Some(end)) = (info.constant(&for_loop.start), info.constant(&for_loop.end)) {
            if (interval > 0.0 && start > end) || (interval < 0.0 && start < end) {
                return Some(TripCount::Zero);
            }
        }
        info.are_same_value(&for_loop.start, &for_loop.end)
            .then_some(TripCount::One)
    }

    fn find_candidate(
        instance: &FunctionInstance,
        declines: &mut Declines,
        changes: &EventLog,
    ) -> Option<(ForLoop, TripCount)> {
        let info = ScalarValueInfo::new(instance);
        for block in 0..instance.body.block_count() {
            let Some(for_loop) = ForLoop::at(&instance.body, block) else {
                continue;
            };
            let Some(trip_count) = Self::trip_count(&info, &for_loop) else {
                continue;
            };
            if trip_count == TripCount::One && !is_simple_section(&instance.body, for_loop.loop_block) {
                declines.record(
                    changes,
                    block,
                    &format!("loop #{block}"),
                    "single iteration loop contains break or continue",
                );
                continue;
            }
            return Some((for_loop, trip_count));
        }
        None
    }

    /// Returns the source of `phi` arriving from `block` as a copy into the phi output.
    fn resolve_phi(phi: &SsaInstruction, block: BlockId) -> Result<SsaInstruction> {
        let SsaInstruction::Phi { output, sources } = phi else {
            return Err(malformed_error!("expected a phi, found '{}'", phi));
        };
        let source = sources
            .iter()
            .find(|s| s.block == block)
            .ok_or_else(|| malformed_error!("'{}' has no source from block #{}", phi, block))?;
        Ok(SsaInstruction::copy(output.clone(), source.variable.clone()))
    }

    fn take_block(instance: &mut FunctionInstance, block: BlockId) -> Result<Vec<SsaInstruction>> {
        instance
            .body
            .block_mut(block)
            .map(|b| b.take_instructions())
            .ok_or_else(|| malformed_error!("block #{} does not exist", block))
    }

    fn append(instance: &mut FunctionInstance, block: BlockId, instructions: Vec<SsaInstruction>) -> Result<()> {
        let target = instance
            .body
            .block_mut(block)
            .ok_or_else(|| malformed_error!("block #{} does not exist", block))?;
        target.instructions_mut().extend(instructions);
        Ok(())
    }

    /// Moves the after-loop block into `target`, resolving its phis to the values from `from`.
    fn merge_after_loop(
        instance: &mut FunctionInstance,
        for_loop: &ForLoop,
        target: BlockId,
        from: BlockId,
    ) -> Result<()> {
        let mut merged = Vec::new();
        for instruction in Self::take_block(instance, for_loop.end_block)? {
            if instruction.is_phi() {
                merged.push(Self::resolve_phi(&instruction, from)?);
            } else {
                merged.push(instruction);
            }
        }
        Self::append(instance, target, merged)
    }

    fn remove_empty(instance: &mut FunctionInstance, for_loop: &ForLoop) -> Result<()> {
        let container = for_loop.container;
        if let Some(block) = instance.body.block_mut(container) {
            block.pop_ending_instruction();
        }
        Self::merge_after_loop(instance, for_loop, container, container)?;
        for block in for_loop.body_blocks(&instance.body) {
            Self::take_block(instance, block)?;
        }

        let after = for_loop.end_block;
        instance
            .body
            .rename_blocks(|b| if b == after { container } else { b });
        Ok(())
    }

    fn inline_single(instance: &mut FunctionInstance, for_loop: &ForLoop) -> Result<()> {
        let container = for_loop.container;
        if let Some(block) = instance.body.block_mut(container) {
            block.pop_ending_instruction();
        }

        let mut renames = HashMap::new();
        let mut inlined = Vec::new();
        for instruction in Self::take_block(instance, for_loop.loop_block)? {
            match instruction {
                SsaInstruction::Phi { .. } => {
                    inlined.push(Self::resolve_phi(&instruction, container)?);
                }
                SsaInstruction::Iter { output } => {
                    if instance.types.get(&output) == instance.types.get(&for_loop.start) {
                        renames.insert(output, for_loop.start.clone());
                    } else {
                        inlined.push(SsaInstruction::copy(output, for_loop.start.clone()));
                    }
                }
                other => inlined.push(other),
            }
        }
        Self::append(instance, container, inlined)?;

        let target = if for_loop.is_single_block() {
            container
        } else {
            for_loop.body_end
        };
        Self::merge_after_loop(instance, for_loop, target, for_loop.body_end)?;

        let (loop_block, after) = (for_loop.loop_block, for_loop.end_block);
        instance.body.rename_blocks(|b| {
            if b == after {
                target
            } else if b == loop_block {
                container
            } else {
                b
            }
        });
        if !renames.is_empty() {
            for block in instance.body.blocks_mut() {
                for instruction in block.instructions_mut() {
                    instruction.rename_variables(&renames);
                }
            }
        }
        Ok(())
    }
}

impl SsaPass for TrivialLoopEliminationPass {
    fn name(&self) -> &'static str {
        "trivial-loop-elimination"
    }

    fn description(&self) -> &'static str {
        "Removes loops with an empty range and inlines loops running exactly once"
    }

    fn run_on_function(&self, instance: &mut FunctionInstance, ctx: &CompilerContext) -> Result<bool> {
        let changes = EventLog::new();
        let name = instance.name().to_string();
        let mut declines = Declines::new(self.name(), &name);

        for _ in 0..MAX_ITERATIONS {
            let Some((for_loop, trip_count)) = Self::find_candidate(instance, &mut declines, &changes)
            else {
                break;
            };
            let range = format!("{}:{}:{}", for_loop.start, for_loop.interval, for_loop.end);
            match trip_count {
                TripCount::Zero => {
                    let removed = section_blocks(&instance.body, for_loop.loop_block).len();
                    Self::remove_empty(instance, &for_loop)?;
                    changes
                        .record(EventKind::LoopRemoved)
                        .at(name.as_str(), for_loop.container)
                        .message(format!("empty range {range}, {removed} body block(s) dropped"));
                }
                TripCount::One => {
                    Self::inline_single(instance, &for_loop)?;
                    changes
                        .record(EventKind::LoopCollapsed)
                        .at(name.as_str(), for_loop.container)
                        .message(format!("single iteration {range}"));
                }
            }
        }

        Ok(commit(&changes, &ctx.events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{validate, FunctionBuilder};

    fn accumulate(start: f64, interval: f64, end: f64) -> FunctionInstance {
        FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["x$2", "x$3", "x$4"]);
            f.outputs(&["x$4"]);
            f.block(0, |b| {
                b.number("s$1", start);
                b.number("k$1", interval);
                b.number("e$1", end);
                b.number("x$1", 0.0);
                b.for_loop("s$1", "k$1", "e$1", 1, 2);
            });
            f.block(1, |b| {
                b.phi("x$2", &[(0, "x$1"), (1, "x$3")]);
                b.iter("i$1");
                b.call("plus", &["x$3"], &["x$2", "i$1"]);
            });
            f.block(2, |b| {
                b.phi("x$4", &[(0, "x$1"), (1, "x$3")]);
                b.call("times", &["y$1"], &["x$4", "x$4"]);
            });
        })
    }

    fn run(instance: &mut FunctionInstance) -> (bool, CompilerContext) {
        let ctx = CompilerContext::with_builtins();
        let changed = TrivialLoopEliminationPass::new()
            .run_on_function(instance, &ctx)
            .expect("pass");
        (changed, ctx)
    }

    fn definition(instance: &FunctionInstance, variable: &str) -> Option<String> {
        instance
            .body
            .defining_instruction(variable)
            .map(ToString::to_string)
    }

    #[test]
    fn test_zero_interval_loop_deleted() {
        let mut instance = accumulate(1.0, 0.0, 1.0);
        let (changed, ctx) = run(&mut instance);
        assert!(changed);
        validate(&instance.body).expect("valid");

        assert_eq!(definition(&instance, "x$4"), Some("x$4 = x$1".to_string()));
        assert_eq!(instance.body.definition("y$1"), Some((0, 5)));
        assert!(instance.body.definition("x$3").is_none());
        assert!(instance.body.block(1).is_some_and(|b| b.is_empty()));
        assert!(instance.body.block(2).is_some_and(|b| b.is_empty()));
        assert!(ctx.events.has(EventKind::LoopRemoved));
    }

    #[test]
    fn test_descending_range_with_positive_step_deleted() {
        let mut instance = accumulate(2.0, 1.0, 1.0);
        assert!(run(&mut instance).0);
        validate(&instance.body).expect("valid");
        assert_eq!(definition(&instance, "x$4"), Some("x$4 = x$1".to_string()));
    }

    #[test]
    fn test_two_iterations_kept() {
        let mut instance = accumulate(1.0, 1.0, 2.0);
        let before = instance.clone();
        assert!(!run(&mut instance).0);
        assert_eq!(instance, before);
    }

    #[test]
    fn test_single_iteration_inlined() {
        let mut instance = accumulate(1.0, 1.0, 1.0);
        let (changed, ctx) = run(&mut instance);
        assert!(changed);
        validate(&instance.body).expect("valid");

        let entry: Vec<String> = instance
            .body
            .block(0)
            .map(|b| b.instructions().iter().map(ToString::to_string).collect())
            .unwrap_or_default();
        assert_eq!(
            entry,
            vec![
                "s$1 = 1",
                "k$1 = 1",
                "e$1 = 1",
                "x$1 = 0",
                "x$2 = x$1",
                "i$1 = s$1",
                "x$3 = plus x$2, i$1",
                "x$4 = x$3",
                "y$1 = times x$4, x$4",
            ]
        );
        assert!(ctx.events.has(EventKind::LoopCollapsed));
    }

    #[test]
    fn test_single_iteration_with_break_declined() {
        let mut instance = FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["n$1"]);
            f.block(0, |b| {
                b.argument("n$1", 0);
                b.number("one$1", 1.0);
                b.for_loop("n$1", "one$1", "n$1", 1, 2);
            });
            f.block(1, |b| b.brk());
            f.block(2, |_| {});
        });
        let before = instance.clone();
        let (changed, ctx) = run(&mut instance);
        assert!(!changed);
        assert_eq!(instance, before);
        assert_eq!(ctx.events.count_kind(EventKind::PatternDeclined), 1);
    }

    #[test]
    fn test_idempotent() {
        let mut instance = accumulate(3.0, -1.0, 4.0);
        assert!(run(&mut instance).0);
        let once = instance.clone();
        assert!(!run(&mut instance).0);
        assert_eq!(instance, once);
    }
}
