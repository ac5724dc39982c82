//! End elimination.
//!
//! `e = end A, axis, n` is the last valid index of `A` along `axis` in an access with `n`
//! indices. It is lowered to size queries:
//!
//! ```text
//! e = end A, 0, 1          ==>     e = numel A
//! e = end A, 0, 2          ==>     $dim = 1
//!                                  e = size A, $dim
//! e = end A, 1, 2          ==>     e = times size(A, 2), size(A, 3)      (A of rank 3)
//! ```
//!
//! The last index of an access covers every remaining dimension. When the rank of `A` is not
//! known, the remaining sizes are multiplied at runtime in a loop from `axis + 1` to `ndims(A)`.

use crate::{
    analysis::{AssignedValue, FunctionInstance, PhiSource, SsaInstruction, VarType},
    compiler::{
        context::CompilerContext,
        editor::BlockEditor,
        events::{EventKind, EventLog},
        pass::SsaPass,
        passes::utils::{commit, Declines},
    },
    Result,
};

/// Maximum number of `end` instructions lowered per run.
const MAX_ITERATIONS: usize = 100;

/// How one `end` is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lowering {
    /// `numel A`
    Numel,
    /// `size A, axis + 1`
    Size,
    /// The axis is past the rank.
    One,
    /// Product of the sizes from `axis + 1` to the given rank.
    Product(usize),
    /// Product of the sizes from `axis + 1` to `ndims A`, in a loop.
    Runtime,
}

/// 1-based dimension number of a 0-based axis.
#[allow(clippy::cast_precision_loss)]
fn dimension(axis: usize) -> f64 {
    (axis + 1) as f64
}

/// Lowers `end` instructions to `numel`/`size` computations.
pub struct EndEliminationPass;

impl Default for EndEliminationPass {
    fn default() -> Self {
        Self::new()
    }
}

impl EndEliminationPass {
    /// Creates a new end elimination pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn lowering(
        ty: Option<&VarType>,
        axis: usize,
        axis_count: usize,
    ) -> std::result::Result<Lowering, &'static str> {
        if axis >= axis_count {
            return Err("axis is outside of the access");
        }
        let rank = match ty {
            Some(VarType::Matrix { shape, .. }) => shape.rank(),
            Some(VarType::Scalar { .. }) => Some(2),
            Some(VarType::String) => return Err("indexed value is a string"),
            None => return Err("indexed value has no type"),
        };
        if axis_count == 1 {
            return Ok(Lowering::Numel);
        }
        if axis + 1 < axis_count {
            return Ok(Lowering::Size);
        }
        Ok(match rank {
            Some(rank) if axis >= rank => Lowering::One,
            Some(rank) if axis + 1 == rank => Lowering::Size,
            Some(rank) => Lowering::Product(rank),
            None => Lowering::Runtime,
        })
    }

    fn find_candidate(
        instance: &FunctionInstance,
        declines: &mut Declines,
        changes: &EventLog,
    ) -> Option<(usize, usize, Lowering)> {
        for (block, index, instruction) in instance.body.instructions() {
            let SsaInstruction::End {
                output,
                base,
                axis,
                axis_count,
            } = instruction
            else {
                continue;
            };
            if declines.contains(output) {
                continue;
            }
            match Self::lowering(instance.types.get(base), *axis, *axis_count) {
                Ok(lowering) => return Some((block, index, lowering)),
                Err(reason) => declines.record(changes, block, output, reason),
            }
        }
        None
    }

    /// Multiplies `sizes` into `output`.
    fn product_into(editor: &mut BlockEditor<'_>, output: &str, sizes: &[String]) -> Result<()> {
        let Some((first, rest)) = sizes.split_first() else {
            return Err(malformed_error!("empty size product"));
        };
        if rest.is_empty() {
            return editor.add_copy(output, first);
        }
        let mut current = first.clone();
        for (position, size) in rest.iter().enumerate() {
            if position + 1 == rest.len() {
                editor.add_call_into("times", &[output], &[current.as_str(), size.as_str()])?;
            } else {
                current = editor.add_call("partial_result", "times", &[current.as_str(), size.as_str()])?;
            }
        }
        Ok(())
    }

    /// Emits `size = 1; for d = axis+1:ndims(base), size = size * size(base, d)` into `output`.
    fn runtime_product(editor: &mut BlockEditor<'_>, output: &str, base: &str, axis: usize) -> Result<()> {
        let first = editor.add_number("dim", dimension(axis))?;
        let one = editor.add_number("one", 1.0)?;
        let rank = editor.add_call("ndims_result", "ndims", &[base])?;
        let initial = editor.add_number("size", 1.0)?;

        let blocks = editor.make_for_loop(&first, &one, &rank)?;
        let size_in = editor.temporary("size", VarType::double());
        let iter = editor.add_iter("iter")?;
        let extent = editor.add_call("size_result", "size", &[base, iter.as_str()])?;
        let size_out = editor.add_call("size", "times", &[size_in.as_str(), extent.as_str()])?;
        let body_end = editor.current_block();

        editor.insert_phi(
            blocks.loop_block,
            &size_in,
            vec![
                PhiSource::new(blocks.container, initial.as_str()),
                PhiSource::new(body_end, size_out.as_str()),
            ],
        )?;
        editor.set_current(blocks.end_block);
        editor.insert_phi(
            blocks.end_block,
            output,
            vec![
                PhiSource::new(blocks.container, initial),
                PhiSource::new(body_end, size_out),
            ],
        )
    }

    fn lower(
        instance: &mut FunctionInstance,
        ctx: &CompilerContext,
        block: usize,
        index: usize,
        lowering: Lowering,
    ) -> Result<String> {
        let (mut editor, removed) = BlockEditor::split_at(instance, ctx.registry(), block, index)?;
        let SsaInstruction::End {
            output, base, axis, ..
        } = removed
        else {
            return Err(malformed_error!("expected an end instruction"));
        };

        match lowering {
            Lowering::Numel => editor.add_call_into("numel", &[output.as_str()], &[base.as_str()])?,
            Lowering::Size => {
                let dim = editor.add_number("dim", dimension(axis))?;
                editor.add_call_into("size", &[output.as_str()], &[base.as_str(), dim.as_str()])?;
            }
            Lowering::One => editor.add(SsaInstruction::Assignment {
                output: output.clone(),
                value: AssignedValue::Number(1.0),
            })?,
            Lowering::Product(rank) => {
                let mut sizes = Vec::with_capacity(rank - axis);
                for remaining in axis..rank {
                    let dim = editor.add_number("dim", dimension(remaining))?;
                    sizes.push(editor.add_call("size_result", "size", &[base.as_str(), dim.as_str()])?);
                }
                Self::product_into(&mut editor, &output, &sizes)?;
            }
            Lowering::Runtime => Self::runtime_product(&mut editor, &output, &base, axis)?,
        }

        editor.finish()?;
        Ok(output)
    }
}

impl SsaPass for EndEliminationPass {
    fn name(&self) -> &'static str {
        "end-elimination"
    }

    fn description(&self) -> &'static str {
        "Lowers end instructions to numel and size queries"
    }

    fn run_on_function(&self, instance: &mut FunctionInstance, ctx: &CompilerContext) -> Result<bool> {
        let changes = EventLog::new();
        let name = instance.name().to_string();
        let mut declines = Declines::new(self.name(), &name);

        for _ in 0..MAX_ITERATIONS {
            let Some((block, index, lowering)) = Self::find_candidate(instance, &mut declines, &changes)
            else {
                break;
            };
            let output = Self::lower(instance, ctx, block, index, lowering)?;
            changes
                .record(EventKind::AccessLowered)
                .at(name.as_str(), block)
                .message(format!("{output} = end ({lowering:?})"));
        }

        Ok(commit(&changes, &ctx.events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{validate, FunctionBuilder, Shape};

    fn fixture(shape: Shape, axis: usize, axis_count: usize) -> FunctionInstance {
        FunctionBuilder::new("f").build_with(|f| {
            f.matrix("A$1", shape);
            f.scalars(&["e$1"]);
            f.outputs(&["e$1"]);
            f.block(0, |b| {
                b.argument("A$1", 0);
                b.end("e$1", "A$1", axis, axis_count);
            });
        })
    }

    fn run(instance: &mut FunctionInstance) -> (bool, CompilerContext) {
        let ctx = CompilerContext::with_builtins();
        let changed = EndEliminationPass::new()
            .run_on_function(instance, &ctx)
            .expect("pass");
        (changed, ctx)
    }

    fn rendered(instance: &FunctionInstance) -> Vec<String> {
        instance
            .body
            .block(0)
            .map(|b| b.instructions().iter().map(ToString::to_string).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_linear_end_is_numel() {
        let mut instance = fixture(Shape::with_rank(2), 0, 1);
        let (changed, ctx) = run(&mut instance);
        assert!(changed);
        validate(&instance.body).expect("valid");
        assert_eq!(rendered(&instance), vec!["A$1 = arg 0", "e$1 = numel A$1"]);
        assert!(ctx.events.has(EventKind::AccessLowered));
    }

    #[test]
    fn test_leading_axis_is_size() {
        let mut instance = fixture(Shape::unknown(), 0, 2);
        assert!(run(&mut instance).0);
        validate(&instance.body).expect("valid");
        assert_eq!(
            rendered(&instance),
            vec!["A$1 = arg 0", "$dim$1 = 1", "e$1 = size A$1, $dim$1"]
        );
    }

    #[test]
    fn test_last_axis_at_rank_is_size() {
        let mut instance = fixture(Shape::with_rank(2), 1, 2);
        assert!(run(&mut instance).0);
        assert_eq!(
            rendered(&instance),
            vec!["A$1 = arg 0", "$dim$1 = 2", "e$1 = size A$1, $dim$1"]
        );
    }

    #[test]
    fn test_last_axis_below_rank_multiplies_trailing_sizes() {
        let mut instance = fixture(Shape::with_rank(4), 1, 2);
        assert!(run(&mut instance).0);
        validate(&instance.body).expect("valid");
        assert_eq!(
            rendered(&instance),
            vec![
                "A$1 = arg 0",
                "$dim$1 = 2",
                "$size_result$1 = size A$1, $dim$1",
                "$dim$2 = 3",
                "$size_result$2 = size A$1, $dim$2",
                "$dim$3 = 4",
                "$size_result$3 = size A$1, $dim$3",
                "$partial_result$1 = times $size_result$1, $size_result$2",
                "e$1 = times $partial_result$1, $size_result$3",
            ]
        );
    }

    #[test]
    fn test_axis_past_rank_is_one() {
        let mut instance = fixture(Shape::with_rank(2), 2, 3);
        assert!(run(&mut instance).0);
        assert_eq!(rendered(&instance), vec!["A$1 = arg 0", "e$1 = 1"]);
    }

    #[test]
    fn test_unknown_rank_loops_over_ndims() {
        let mut instance = fixture(Shape::unknown(), 1, 2);
        assert!(run(&mut instance).0);
        validate(&instance.body).expect("valid");

        let text = instance.body.to_string();
        assert!(text.contains("$ndims_result$1 = ndims A$1"));
        assert!(text.contains("for $dim$1, $one$1, $ndims_result$1, #1, #2"));
        assert!(text.contains("$size_result$1 = size A$1, $iter$1"));
        assert_eq!(
            instance.body.defining_instruction("e$1").map(ToString::to_string),
            Some("e$1 = phi #0:$size$1, #1:$size$3".to_string())
        );
        assert!(!text.contains(" end "));
    }

    #[test]
    fn test_string_base_declined() {
        let mut instance = FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["e$1"]);
            f.outputs(&["e$1"]);
            f.block(0, |b| {
                b.string("s$1", "abc");
                b.end("e$1", "s$1", 0, 1);
            });
        });
        let before = instance.clone();
        let (changed, ctx) = run(&mut instance);
        assert!(!changed);
        assert_eq!(instance, before);
        assert_eq!(ctx.events.count_kind(EventKind::PatternDeclined), 1);
    }
}
