//! Colon elimination pass.
//!
//! Rewrites multi-index accesses whose indices come from `colon(lo, hi)` calls into range
//! accesses, so the backend can address the sub-matrix directly instead of materializing the
//! index vectors.
//!
//! # Example
//!
//! Before:
//! ```text
//! e = end A, 0, 2
//! r = colon one, e
//! c = colon lo, hi
//! y = get A(r, c)
//! ```
//!
//! After:
//! ```text
//! e = end A, 0, 2
//! r = colon one, e
//! c = colon lo, hi
//! y = range_get A(:, lo:hi)
//! ```
//!
//! The `colon` calls are left in place; dead-code elimination removes them once unused.

use std::collections::HashMap;

use crate::{
    analysis::{FunctionInstance, RangeIndex, SsaInstruction},
    compiler::{
        context::CompilerContext,
        events::{EventKind, EventLog},
        pass::SsaPass,
        passes::utils::{commit, constant_of, single_call},
    },
    Result,
};

/// `end` instruction operands: base, axis, axis count.
type EndSite = (String, usize, usize);

/// Colon elimination pass.
///
/// An index becomes:
///
/// - `:` when it is `colon(1, end)` with the `end` of the same base, position and index count,
/// - a single `Variable` when both colon bounds are the same known constant,
/// - `lo:hi` for any other two-argument colon.
///
/// Accesses with a single index are left alone; linear indexing has different semantics.
pub struct ColonEliminationPass;

impl Default for ColonEliminationPass {
    fn default() -> Self {
        Self::new()
    }
}

impl ColonEliminationPass {
    /// Creates a new colon elimination pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn convert(
        instance: &FunctionInstance,
        colons: &HashMap<String, (String, String)>,
        ends: &HashMap<String, EndSite>,
        base: &str,
        indices: &[String],
    ) -> Option<Vec<RangeIndex>> {
        if indices.len() < 2 {
            return None;
        }

        let mut converted = 0usize;
        let mut ranges = Vec::with_capacity(indices.len());
        for (axis, index) in indices.iter().enumerate() {
            let Some((lo, hi)) = colons.get(index) else {
                ranges.push(RangeIndex::Variable(index.clone()));
                continue;
            };
            converted += 1;

            let lo_value = constant_of(instance, lo);
            let is_full = lo_value == Some(1.0)
                && ends.get(hi).is_some_and(|(end_base, end_axis, end_count)| {
                    end_base == base && *end_axis == axis && *end_count == indices.len()
                });

            if is_full {
                ranges.push(RangeIndex::FullRange);
            } else if lo_value.is_some() && lo_value == constant_of(instance, hi) {
                ranges.push(RangeIndex::Variable(lo.clone()));
            } else {
                ranges.push(RangeIndex::PartialRange {
                    start: lo.clone(),
                    end: hi.clone(),
                });
            }
        }

        (converted > 0).then_some(ranges)
    }
}

impl SsaPass for ColonEliminationPass {
    fn name(&self) -> &'static str {
        "colon-elimination"
    }

    fn description(&self) -> &'static str {
        "Converts colon-indexed accesses into range accesses"
    }

    fn run_on_function(&self, instance: &mut FunctionInstance, ctx: &CompilerContext) -> Result<bool> {
        let mut colons = HashMap::new();
        let mut ends = HashMap::new();
        for (_, _, instruction) in instance.body.instructions() {
            if let Some((output, [lo, hi])) = single_call(instruction, "colon") {
                colons.insert(output.to_string(), (lo.clone(), hi.clone()));
            }
            if let SsaInstruction::End {
                output,
                base,
                axis,
                axis_count,
            } = instruction
            {
                ends.insert(output.clone(), (base.clone(), *axis, *axis_count));
            }
        }
        if colons.is_empty() {
            return Ok(false);
        }

        let mut rewrites = Vec::new();
        for (block, index, instruction) in instance.body.instructions() {
            let replacement = match instruction {
                SsaInstruction::MatrixGet {
                    output,
                    base,
                    indices,
                } => Self::convert(instance, &colons, &ends, base, indices).map(|ranges| {
                    SsaInstruction::RangeGet {
                        output: output.clone(),
                        base: base.clone(),
                        indices: ranges,
                    }
                }),
                SsaInstruction::MatrixSet {
                    output,
                    base,
                    indices,
                    value,
                } => Self::convert(instance, &colons, &ends, base, indices).map(|ranges| {
                    SsaInstruction::RangeSet {
                        output: output.clone(),
                        base: base.clone(),
                        indices: ranges,
                        value: value.clone(),
                    }
                }),
                _ => None,
            };
            if let Some(replacement) = replacement {
                rewrites.push((block, index, replacement));
            }
        }

        let changes = EventLog::new();
        let name = instance.name().to_string();
        for (block, index, replacement) in rewrites {
            if let Some(slot) = instance
                .body
                .block_mut(block)
                .and_then(|b| b.instructions_mut().get_mut(index))
            {
                changes
                    .record(EventKind::InstructionRewritten)
                    .at(name.as_str(), block)
                    .message(format!("{replacement}"));
                *slot = replacement;
            }
        }

        Ok(commit(&changes, &ctx.events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{ElementKind, FunctionBuilder, Shape, VarType};

    fn run(instance: &mut FunctionInstance) -> bool {
        let ctx = CompilerContext::with_builtins();
        ColonEliminationPass::new()
            .run_on_function(instance, &ctx)
            .expect("pass")
    }

    fn fixture(lo_value: Option<f64>, axis_count_of_end: usize) -> FunctionInstance {
        FunctionBuilder::new("f").build_with(|f| {
            f.matrix("A$1", Shape::with_rank(2));
            f.scalars(&["j$1", "e$1", "hi$1"]);
            f.matrix("r$1", Shape::row(None));
            f.matrix("y$1", Shape::with_rank(2));
            if let Some(value) = lo_value {
                f.var("lo$1", VarType::constant(ElementKind::Double, value));
            } else {
                f.scalars(&["lo$1"]);
            }
            f.outputs(&["y$1"]);
            f.block(0, |b| {
                b.argument("A$1", 0);
                b.argument("j$1", 1);
                if let Some(value) = lo_value {
                    b.number("lo$1", value);
                } else {
                    b.argument("lo$1", 2);
                }
                b.end("e$1", "A$1", 0, axis_count_of_end);
                b.call("colon", &["r$1"], &["lo$1", "e$1"]);
                b.get("y$1", "A$1", &["r$1", "j$1"]);
            });
        })
    }

    fn rendered_access(instance: &FunctionInstance) -> String {
        instance
            .body
            .defining_instruction("y$1")
            .map(ToString::to_string)
            .unwrap_or_default()
    }

    #[test]
    fn test_full_range() {
        let mut instance = fixture(Some(1.0), 2);
        assert!(run(&mut instance));
        assert_eq!(rendered_access(&instance), "y$1 = range_get A$1(:, j$1)");
        // The colon call survives until dead-code elimination.
        assert!(instance.body.to_string().contains("colon"));
    }

    #[test]
    fn test_mismatched_end_is_partial() {
        let mut instance = fixture(Some(1.0), 3);
        assert!(run(&mut instance));
        assert_eq!(rendered_access(&instance), "y$1 = range_get A$1(lo$1:e$1, j$1)");
    }

    #[test]
    fn test_unknown_start_is_partial() {
        let mut instance = fixture(None, 2);
        assert!(run(&mut instance));
        assert_eq!(rendered_access(&instance), "y$1 = range_get A$1(lo$1:e$1, j$1)");
    }

    #[test]
    fn test_scalar_colon_becomes_variable() {
        let mut instance = FunctionBuilder::new("f").build_with(|f| {
            f.matrix("A$1", Shape::with_rank(2));
            f.matrix("c$1", Shape::known(&[1, 1]));
            f.matrix("B$1", Shape::with_rank(2));
            f.scalars(&["v$1", "i$1"]);
            f.outputs(&["B$1"]);
            f.block(0, |b| {
                b.argument("A$1", 0);
                b.argument("v$1", 1);
                b.argument("i$1", 2);
                b.number("k$1", 3.0);
                b.number("k$2", 3.0);
                b.call("colon", &["c$1"], &["k$1", "k$2"]);
                b.set("B$1", "A$1", &["i$1", "c$1"], "v$1");
            });
        });
        assert!(run(&mut instance));
        assert_eq!(
            instance
                .body
                .defining_instruction("B$1")
                .map(ToString::to_string),
            Some("B$1 = range_set A$1(i$1, k$1) = v$1".to_string())
        );
    }

    #[test]
    fn test_single_index_untouched() {
        let mut instance = FunctionBuilder::new("f").build_with(|f| {
            f.matrix("A$1", Shape::with_rank(2));
            f.matrix("r$1", Shape::row(None));
            f.matrix("y$1", Shape::row(None));
            f.scalars(&["n$1"]);
            f.outputs(&["y$1"]);
            f.block(0, |b| {
                b.argument("A$1", 0);
                b.argument("n$1", 1);
                b.number("one$1", 1.0);
                b.call("colon", &["r$1"], &["one$1", "n$1"]);
                b.get("y$1", "A$1", &["r$1"]);
            });
        });
        let before = instance.clone();
        assert!(!run(&mut instance));
        assert_eq!(instance, before);
    }

    #[test]
    fn test_idempotent() {
        let mut instance = fixture(Some(1.0), 2);
        assert!(run(&mut instance));
        let once = instance.clone();
        assert!(!run(&mut instance));
        assert_eq!(instance, once);
    }
}
