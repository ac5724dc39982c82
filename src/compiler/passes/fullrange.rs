//! Full range elimination pass.
//!
//! Replaces every `:` axis of a range access by the explicit range `1:end`, so later stages
//! only ever see partial ranges and scalar indices.
//!
//! # Example
//!
//! Before:
//! ```text
//! y = range_get A(:, j)
//! ```
//!
//! After:
//! ```text
//! $one = 1
//! $end = end A, 0, 2
//! y = range_get A($one:$end, j)
//! ```

use crate::{
    analysis::{FunctionInstance, RangeIndex, SsaInstruction},
    compiler::{
        context::CompilerContext,
        editor::BlockEditor,
        events::{EventKind, EventLog},
        pass::SsaPass,
        passes::utils::{commit, shape_of, Declines},
    },
    Result,
};

/// Maximum number of accesses rewritten per run.
const MAX_ITERATIONS: usize = 100;

/// Full range elimination pass.
///
/// The base matrix must have a statically known rank. An axis at or past the rank has a
/// constant extent of 1 and gets the literal `1` as its end.
pub struct FullRangeEliminationPass;

impl Default for FullRangeEliminationPass {
    fn default() -> Self {
        Self::new()
    }
}

impl FullRangeEliminationPass {
    /// Creates a new full range elimination pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn full_range_base(instruction: &SsaInstruction) -> Option<&str> {
        match instruction {
            SsaInstruction::RangeGet { base, indices, .. }
            | SsaInstruction::RangeSet { base, indices, .. }
                if indices.contains(&RangeIndex::FullRange) =>
            {
                Some(base.as_str())
            }
            _ => None,
        }
    }

    /// Finds the next access with a known-rank base, declining the others.
    fn find_candidate(
        instance: &FunctionInstance,
        declines: &mut Declines,
        changes: &EventLog,
    ) -> Option<(usize, usize)> {
        for (block, index, instruction) in instance.body.instructions() {
            let Some(base) = Self::full_range_base(instruction) else {
                continue;
            };
            let key = instruction.outputs().first().map_or_else(String::new, ToString::to_string);
            if declines.contains(&key) {
                continue;
            }
            if shape_of(instance, base).and_then(|s| s.rank()).is_some() {
                return Some((block, index));
            }
            declines.record(changes, block, &key, "base matrix rank is unknown");
        }
        None
    }

    fn rewrite(
        instance: &mut FunctionInstance,
        ctx: &CompilerContext,
        block: usize,
        index: usize,
    ) -> Result<String> {
        let (mut editor, mut instruction) =
            BlockEditor::split_at(instance, ctx.registry(), block, index)?;

        let (base, axis_count) = match &instruction {
            SsaInstruction::RangeGet { base, indices, .. }
            | SsaInstruction::RangeSet { base, indices, .. } => (base.clone(), indices.len()),
            _ => return Err(malformed_error!("expected a range access")),
        };

        let one = editor.add_number("one", 1.0)?;
        let mut ends = Vec::new();
        if let SsaInstruction::RangeGet { indices, .. } | SsaInstruction::RangeSet { indices, .. } =
            &instruction
        {
            for (axis, range) in indices.iter().enumerate() {
                if *range == RangeIndex::FullRange {
                    ends.push((axis, editor.add_make_end(&base, axis, axis_count)?));
                }
            }
        }

        if let SsaInstruction::RangeGet { indices, .. } | SsaInstruction::RangeSet { indices, .. } =
            &mut instruction
        {
            for (axis, end) in ends {
                indices[axis] = RangeIndex::PartialRange {
                    start: one.clone(),
                    end,
                };
            }
        }

        let rendered = instruction.to_string();
        editor.add(instruction)?;
        editor.finish()?;
        Ok(rendered)
    }
}

impl SsaPass for FullRangeEliminationPass {
    fn name(&self) -> &'static str {
        "full-range-elimination"
    }

    fn description(&self) -> &'static str {
        "Replaces full-axis ranges by explicit 1:end ranges"
    }

    fn run_on_function(&self, instance: &mut FunctionInstance, ctx: &CompilerContext) -> Result<bool> {
        let changes = EventLog::new();
        let name = instance.name().to_string();
        let mut declines = Declines::new(self.name(), &name);

        for _ in 0..MAX_ITERATIONS {
            let Some((block, index)) = Self::find_candidate(instance, &mut declines, &changes) else {
                break;
            };
            let rendered = Self::rewrite(instance, ctx, block, index)?;
            changes
                .record(EventKind::InstructionRewritten)
                .at(name.as_str(), block)
                .message(rendered);
        }

        Ok(commit(&changes, &ctx.events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{validate, FunctionBuilder, Shape, VarType};

    fn run(instance: &mut FunctionInstance) -> (bool, CompilerContext) {
        let ctx = CompilerContext::with_builtins();
        let changed = FullRangeEliminationPass::new()
            .run_on_function(instance, &ctx)
            .expect("pass");
        (changed, ctx)
    }

    fn fixture(shape: Shape) -> FunctionInstance {
        FunctionBuilder::new("f").build_with(|f| {
            f.matrix("A$1", shape);
            f.matrix("y$1", Shape::with_rank(2));
            f.scalars(&["j$1"]);
            f.outputs(&["y$1"]);
            f.block(0, |b| {
                b.argument("A$1", 0);
                b.argument("j$1", 1);
                b.range_get(
                    "y$1",
                    "A$1",
                    vec![RangeIndex::FullRange, RangeIndex::Variable("j$1".to_string())],
                );
            });
        })
    }

    #[test]
    fn test_full_range_becomes_one_to_end() {
        let mut instance = fixture(Shape::with_rank(2));
        let (changed, _) = run(&mut instance);
        assert!(changed);
        validate(&instance.body).expect("valid");
        assert_eq!(
            instance.body.to_string(),
            "Function f -> y$1\nblock #0:\n  A$1 = arg 0\n  j$1 = arg 1\n  $one$1 = 1\n  \
             $end$1 = end A$1, 0, 2\n  y$1 = range_get A$1($one$1:$end$1, j$1)\n"
        );
        assert_eq!(instance.types.get("$end$1"), Some(&VarType::double()));
    }

    #[test]
    fn test_axis_past_rank_is_constant() {
        let mut instance = FunctionBuilder::new("f").build_with(|f| {
            f.matrix("A$1", Shape::with_rank(2));
            f.matrix("y$1", Shape::with_rank(2));
            f.scalars(&["i$1", "j$1"]);
            f.outputs(&["y$1"]);
            f.block(0, |b| {
                b.argument("A$1", 0);
                b.argument("i$1", 1);
                b.argument("j$1", 2);
                b.range_get(
                    "y$1",
                    "A$1",
                    vec![
                        RangeIndex::Variable("i$1".to_string()),
                        RangeIndex::Variable("j$1".to_string()),
                        RangeIndex::FullRange,
                    ],
                );
            });
        });
        let (changed, _) = run(&mut instance);
        assert!(changed);
        assert_eq!(
            instance.body.defining_instruction("y$1").map(ToString::to_string),
            Some("y$1 = range_get A$1(i$1, j$1, $one$1:$one$2)".to_string())
        );
    }

    #[test]
    fn test_unknown_rank_declined() {
        let mut instance = fixture(Shape::unknown());
        let before = instance.clone();
        let (changed, ctx) = run(&mut instance);
        assert!(!changed);
        assert_eq!(instance, before);
        assert_eq!(ctx.events.count_kind(EventKind::PatternDeclined), 1);
    }

    #[test]
    fn test_idempotent() {
        let mut instance = fixture(Shape::with_rank(3));
        assert!(run(&mut instance).0);
        let once = instance.clone();
        assert!(!run(&mut instance).0);
        assert_eq!(instance, once);
    }
}
