//! `min`/`max` along a dimension.
//!
//! `[m, i] = min(A, [], d)` becomes a loop nest over every dimension of `A`, outermost over the
//! last dimension. Each element is compared against the running extremum stored in `m`; the
//! first element along `d` always replaces it.
//!
//! ```text
//! m0 = matisse_new_array_from_dims size(A,1), .., min(1, size(A,d)), ..
//! i0 = matisse_new_array_from_dims (same)
//! for every dimension:
//!     x = simple_get A(iters)
//!     replace = iter_d == 1 ? true : x < simple_get m(flat)
//!     if replace:
//!         i = simple_set i(flat) = iter_d
//!         m = simple_set m(flat) = x
//! ```
//!
//! `flat` is the iteration tuple with the reduced dimension fixed to 1.

use crate::{
    analysis::{BlockId, FunctionInstance, PhiSource, SsaInstruction, VarType},
    compiler::{
        context::CompilerContext,
        editor::BlockEditor,
        events::{EventKind, EventLog},
        pass::SsaPass,
        passes::utils::{commit, shape_of, Declines},
    },
    Result,
};

/// Maximum number of reductions expanded per run.
const MAX_ITERATIONS: usize = 100;

/// One loop of the generated nest.
struct Level {
    container: BlockId,
    loop_block: BlockId,
    end_block: BlockId,
    value_outer: String,
    index_outer: String,
    value_in: String,
    index_in: String,
}

/// Expands `min`/`max` with an explicit dimension into a loop nest producing both outputs.
pub struct MinMaxReductionEliminationPass;

impl Default for MinMaxReductionEliminationPass {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::cast_precision_loss)]
fn count(value: usize) -> f64 {
    value as f64
}

impl MinMaxReductionEliminationPass {
    /// Creates a new min/max reduction elimination pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Returns the rank of `A` and the 0-based reduced dimension, or why the call is kept.
    fn check(
        instance: &FunctionInstance,
        outputs: &[String],
        inputs: &[String],
    ) -> std::result::Result<(usize, usize), &'static str> {
        let [matrix, empty, dim] = inputs else {
            return Err("only the three-argument form is expanded");
        };
        if outputs.len() != 2 {
            return Err("both value and index outputs are required");
        }
        let Some(rank) = shape_of(instance, matrix).and_then(|s| s.rank()) else {
            return Err("input rank is unknown");
        };
        if !instance.types.get(empty).is_some_and(VarType::is_known_empty) {
            return Err("second argument is not known to be empty");
        }
        let Some(dim) = instance.types.get(dim).and_then(VarType::integer_constant) else {
            return Err("dimension is not a constant");
        };
        let dim = usize::try_from(dim).unwrap_or(0);
        if dim < 1 || dim > rank {
            return Err("dimension is out of range");
        }
        if !outputs
            .iter()
            .all(|o| instance.types.get(o).is_some_and(VarType::is_matrix))
        {
            return Err("outputs are not typed as matrices");
        }
        Ok((rank, dim - 1))
    }

    fn find_candidate(
        instance: &FunctionInstance,
        declines: &mut Declines,
        changes: &EventLog,
    ) -> Option<(usize, usize, usize, usize)> {
        for (block, index, instruction) in instance.body.instructions() {
            let SsaInstruction::TypedCall {
                function,
                signature,
                outputs,
                inputs,
            } = instruction
            else {
                continue;
            };
            if (function != "min" && function != "max") || signature.side_effects {
                continue;
            }
            let Some(key) = outputs.first() else {
                continue;
            };
            if declines.contains(key) {
                continue;
            }
            match Self::check(instance, outputs, inputs) {
                Ok((rank, dim)) => return Some((block, index, rank, dim)),
                Err(reason) => declines.record(changes, block, key, reason),
            }
        }
        None
    }

    #[allow(clippy::too_many_lines)]
    fn expand(
        instance: &mut FunctionInstance,
        ctx: &CompilerContext,
        block: usize,
        index: usize,
        rank: usize,
        dim: usize,
    ) -> Result<String> {
        let (mut editor, removed) = BlockEditor::split_at(instance, ctx.registry(), block, index)?;
        let SsaInstruction::TypedCall {
            function,
            outputs,
            inputs,
            ..
        } = removed
        else {
            return Err(malformed_error!("expected a reduction call"));
        };
        let ([value_output, index_output], Some(matrix)) = (outputs.as_slice(), inputs.first())
        else {
            return Err(malformed_error!("malformed {} call", function));
        };
        let comparison = if function == "min" { "lt" } else { "gt" };
        let value_ty = editor.type_of(value_output)?;
        let index_ty = editor.type_of(index_output)?;

        let mut sizes = Vec::with_capacity(rank);
        for axis in 0..rank {
            let dim_value = editor.add_number("dim", count(axis + 1))?;
            sizes.push(editor.add_call("size", "size", &[matrix.as_str(), dim_value.as_str()])?);
        }
        let one = editor.add_number("one", 1.0)?;
        let reduced = editor.add_call("reduced", "min", &[one.as_str(), sizes[dim].as_str()])?;

        let mut dims: Vec<&str> = sizes.iter().map(String::as_str).collect();
        dims[dim] = reduced.as_str();
        let values = editor.temporary("result", value_ty.clone());
        editor.add_call_into("matisse_new_array_from_dims", &[values.as_str()], &dims)?;
        let indices = editor.temporary("indices", index_ty.clone());
        editor.add_call_into("matisse_new_array_from_dims", &[indices.as_str()], &dims)?;

        // Nest: outermost over the last dimension.
        let mut iters = vec![String::new(); rank];
        let mut levels = Vec::with_capacity(rank);
        let (mut value_outer, mut index_outer) = (values, indices);
        for axis in (0..rank).rev() {
            let blocks = editor.make_for_loop(&one, &one, &sizes[axis])?;
            let value_in = editor.temporary("result", value_ty.clone());
            let index_in = editor.temporary("indices", index_ty.clone());
            iters[axis] = editor.add_iter("iter")?;
            levels.push(Level {
                container: blocks.container,
                loop_block: blocks.loop_block,
                end_block: blocks.end_block,
                value_outer: value_outer.clone(),
                index_outer: index_outer.clone(),
                value_in: value_in.clone(),
                index_in: index_in.clone(),
            });
            value_outer = value_in;
            index_outer = index_in;
        }
        let (value_in, index_in) = (value_outer, index_outer);

        let all: Vec<&str> = iters.iter().map(String::as_str).collect();
        let mut flat = all.clone();
        flat[dim] = one.as_str();
        let along = iters[dim].as_str();

        let element = editor.add_simple_get("element", matrix, &all)?;
        let is_start = editor.add_call("is_start", "eq", &[along, one.as_str()])?;
        let replace = editor.add_branch_merge(
            &is_start,
            "replace",
            VarType::logical(),
            |_| Ok(is_start.clone()),
            |e| {
                let old = e.add_simple_get("old", &value_in, &flat)?;
                e.add_call("is_better", comparison, &[element.as_str(), old.as_str()])
            },
        )?;

        let branch = editor.make_branch(&replace)?;
        let index_new = editor.add_simple_set("indices", &index_in, &flat, along)?;
        let value_new = editor.add_simple_set("result", &value_in, &flat, &element)?;
        let then_end = editor.current_block();
        editor.set_current(branch.end_block);
        let mut value_out = editor.temporary("result", value_ty.clone());
        let mut index_out = editor.temporary("indices", index_ty.clone());
        for (merged, updated, kept) in [
            (&value_out, &value_new, &value_in),
            (&index_out, &index_new, &index_in),
        ] {
            editor.insert_phi(
                branch.end_block,
                merged,
                vec![
                    PhiSource::new(then_end, updated.as_str()),
                    PhiSource::new(branch.else_block, kept.as_str()),
                ],
            )?;
        }

        for (depth, level) in levels.iter().enumerate().rev() {
            let body_end = editor.current_block();
            for (inner, outer, next) in [
                (&level.value_in, &level.value_outer, &value_out),
                (&level.index_in, &level.index_outer, &index_out),
            ] {
                editor.insert_phi(
                    level.loop_block,
                    inner,
                    vec![
                        PhiSource::new(level.container, outer.as_str()),
                        PhiSource::new(body_end, next.as_str()),
                    ],
                )?;
            }
            editor.set_current(level.end_block);

            let (value_after, index_after) = if depth == 0 {
                (value_output.clone(), index_output.clone())
            } else {
                (
                    editor.temporary("result", value_ty.clone()),
                    editor.temporary("indices", index_ty.clone()),
                )
            };
            for (after, outer, next) in [
                (&value_after, &level.value_outer, &value_out),
                (&index_after, &level.index_outer, &index_out),
            ] {
                editor.insert_phi(
                    level.end_block,
                    after,
                    vec![
                        PhiSource::new(level.container, outer.as_str()),
                        PhiSource::new(body_end, next.as_str()),
                    ],
                )?;
            }
            value_out = value_after;
            index_out = index_after;
        }

        editor.finish()?;
        Ok(format!("[{value_output}, {index_output}] = {function}"))
    }
}

impl SsaPass for MinMaxReductionEliminationPass {
    fn name(&self) -> &'static str {
        "min-max-reduction-elimination"
    }

    fn description(&self) -> &'static str {
        "Expands min and max along a dimension into loop nests"
    }

    fn run_on_function(&self, instance: &mut FunctionInstance, ctx: &CompilerContext) -> Result<bool> {
        let changes = EventLog::new();
        let name = instance.name().to_string();
        let mut declines = Declines::new(self.name(), &name);

        for _ in 0..MAX_ITERATIONS {
            let Some((block, index, rank, dim)) =
                Self::find_candidate(instance, &mut declines, &changes)
            else {
                break;
            };
            let message = Self::expand(instance, ctx, block, index, rank, dim)?;
            changes
                .record(EventKind::ReductionExpanded)
                .at(name.as_str(), block)
                .message(message);
        }

        Ok(commit(&changes, &ctx.events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{validate, FunctionBuilder, Shape};

    fn fixture(function: &str, dim: f64, rank: Option<usize>) -> FunctionInstance {
        FunctionBuilder::new("f").build_with(|f| {
            f.matrix("A$1", rank.map_or_else(Shape::unknown, Shape::with_rank));
            f.matrix("E$1", Shape::known(&[0, 0]));
            f.matrix("m$1", Shape::with_rank(2));
            f.matrix("i$1", Shape::with_rank(2));
            f.outputs(&["m$1", "i$1"]);
            f.block(0, |b| {
                b.argument("A$1", 0);
                b.argument("E$1", 1);
                b.number("d$1", dim);
                b.call(function, &["m$1", "i$1"], &["A$1", "E$1", "d$1"]);
            });
        })
    }

    fn run(instance: &mut FunctionInstance) -> (bool, CompilerContext) {
        let ctx = CompilerContext::with_builtins();
        let changed = MinMaxReductionEliminationPass::new()
            .run_on_function(instance, &ctx)
            .expect("pass");
        (changed, ctx)
    }

    #[test]
    fn test_min_along_first_dimension() {
        let mut instance = fixture("min", 1.0, Some(2));
        let (changed, _) = run(&mut instance);
        assert!(changed);
        validate(&instance.body).expect("valid");

        let rendered = instance.body.to_string();
        assert!(rendered.contains("$size$1 = size A$1, $dim$1"));
        assert!(rendered.contains("$reduced$1 = min $one$1, $size$1"));
        assert!(rendered.contains("$result$1 = matisse_new_array_from_dims $reduced$1, $size$2"));
        assert!(rendered.contains("$indices$1 = matisse_new_array_from_dims $reduced$1, $size$2"));
        assert!(rendered.contains("for $one$1, $one$1, $size$2, #1, #2"));
        assert!(rendered.contains("for $one$1, $one$1, $size$1, #3, #4"));
        assert!(rendered.contains("$element$1 = simple_get A$1($iter$2, $iter$1)"));
        assert!(rendered.contains("$is_start$1 = eq $iter$2, $one$1"));
        assert!(rendered.contains("$is_better$1 = lt $element$1, $old$1"));
        assert!(rendered.contains("simple_set $indices$3($one$1, $iter$1) = $iter$2"));
        assert!(!rendered.contains("min A$1"));
        // Two loops, two branches.
        assert_eq!(instance.body.block_count(), 11);
    }

    #[test]
    fn test_max_compares_greater() {
        let mut instance = fixture("max", 2.0, Some(3));
        assert!(run(&mut instance).0);
        validate(&instance.body).expect("valid");
        let rendered = instance.body.to_string();
        assert!(rendered.contains(" = gt $element$1, $old$1"));
        assert!(rendered.contains("$reduced$1 = min $one$1, $size$2"));
        assert_eq!(instance.body.block_count(), 13);
    }

    #[test]
    fn test_out_of_range_dimension_declined() {
        let mut instance = fixture("min", 3.0, Some(2));
        let before = instance.clone();
        let (changed, ctx) = run(&mut instance);
        assert!(!changed);
        assert_eq!(instance, before);
        assert_eq!(ctx.events.count_kind(EventKind::PatternDeclined), 1);
    }

    #[test]
    fn test_unknown_rank_declined() {
        let mut instance = fixture("min", 1.0, None);
        let before = instance.clone();
        assert!(!run(&mut instance).0);
        assert_eq!(instance, before);
    }
}
