//! Multi-get elimination pass.
//!
//! Lowers `get` instructions the backend cannot address directly:
//!
//! - indices that are matrices gather elements with explicit loops,
//! - trailing constant `1` indices past the rank of the base are dropped,
//! - a last index standing for several trailing dimensions is split into one index per
//!   dimension.
//!
//! # Example
//!
//! Before:
//! ```text
//! y = get A(I)
//! ```
//!
//! After:
//! ```text
//! $size = access_size A(I)
//! $numel = numel I
//! $y = matisse_new_array $size
//! for $one, $one, $numel, #1, #2
//! block #1:
//!   $y_in = phi #0:$y, #1:$y_out
//!   $i = iter
//!   $index = simple_get I($i)
//!   $value = get A($index)
//!   $y_out = simple_set $y_in($i) = $value
//! block #2:
//!   y = phi #0:$y, #1:$y_out
//! ```

use crate::{
    analysis::{BlockId, ElementKind, FunctionInstance, PhiSource, Shape, SsaInstruction, VarType},
    compiler::{
        context::CompilerContext,
        editor::BlockEditor,
        events::{EventKind, EventLog},
        pass::SsaPass,
        passes::utils::{commit, constant_of, shape_of, Declines},
    },
    Result,
};

/// Maximum number of reads rewritten per run.
const MAX_ITERATIONS: usize = 100;

/// What to do with a `get`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Rewrite {
    /// Gather loops over the matrix indices at these positions.
    Gather(Vec<usize>),
    /// Keep only the first `n` indices.
    DropTrailing(usize),
    /// Split the last index over the dimensions from its position up to the rank.
    Delinearize { rank: usize },
}

/// One level of a gather loop nest.
struct GatherLevel {
    container: BlockId,
    loop_block: BlockId,
    end_block: BlockId,
    /// Result matrix entering the loop from the container
    matrix_outer: String,
    /// Result matrix at the top of the loop body
    matrix_in: String,
    counter: Option<(String, String)>,
}

/// Multi-get elimination pass.
pub struct MultiGetEliminationPass;

impl Default for MultiGetEliminationPass {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiGetEliminationPass {
    /// Creates a new multi-get elimination pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn classify(
        instance: &FunctionInstance,
        output: &str,
        base: &str,
        indices: &[String],
    ) -> std::result::Result<Option<Rewrite>, &'static str> {
        let matrix_positions: Vec<usize> = indices
            .iter()
            .enumerate()
            .filter(|(_, index)| instance.types.get(index).is_some_and(VarType::is_matrix))
            .map(|(position, _)| position)
            .collect();

        if !matrix_positions.is_empty() {
            if !instance.types.get(output).is_some_and(VarType::is_matrix) {
                return Err("gathered result is not typed as a matrix");
            }
            if !instance.types.get(base).is_some_and(VarType::is_matrix) {
                return Err("base is not a matrix");
            }
            return Ok(Some(Rewrite::Gather(matrix_positions)));
        }

        let Some(rank) = shape_of(instance, base).and_then(Shape::rank) else {
            return Ok(None);
        };

        if indices.len() > rank {
            let trailing_ones = indices[rank..]
                .iter()
                .all(|index| constant_of(instance, index) == Some(1.0));
            if trailing_ones {
                return Ok(Some(Rewrite::DropTrailing(rank)));
            }
            return Err("trailing indices past the rank are not constant 1");
        }

        if indices.len() >= 2 && indices.len() < rank {
            return Ok(Some(Rewrite::Delinearize { rank }));
        }
        Ok(None)
    }

    fn find_candidate(
        instance: &FunctionInstance,
        declines: &mut Declines,
        changes: &EventLog,
    ) -> Option<(usize, usize, Rewrite)> {
        for (block, index, instruction) in instance.body.instructions() {
            let SsaInstruction::MatrixGet {
                output,
                base,
                indices,
            } = instruction
            else {
                continue;
            };
            if declines.contains(output) {
                continue;
            }
            match Self::classify(instance, output, base, indices) {
                Ok(Some(rewrite)) => return Some((block, index, rewrite)),
                Ok(None) => {}
                Err(reason) => declines.record(changes, block, output, reason),
            }
        }
        None
    }

    fn rewrite(
        instance: &mut FunctionInstance,
        ctx: &CompilerContext,
        block: usize,
        index: usize,
        rewrite: &Rewrite,
    ) -> Result<()> {
        let (mut editor, removed) = BlockEditor::split_at(instance, ctx.registry(), block, index)?;
        let SsaInstruction::MatrixGet {
            output,
            base,
            indices,
        } = removed
        else {
            return Err(malformed_error!("expected a matrix get"));
        };

        match rewrite {
            Rewrite::Gather(_) if indices.len() == 1 => {
                Self::gather_linear(&mut editor, &output, &base, &indices[0])?;
            }
            Rewrite::Gather(positions) => {
                Self::gather_nested(&mut editor, &output, &base, &indices, positions)?;
            }
            Rewrite::DropTrailing(keep) => {
                let mut indices = indices;
                indices.truncate(*keep);
                editor.add(SsaInstruction::MatrixGet {
                    output,
                    base,
                    indices,
                })?;
            }
            Rewrite::Delinearize { rank } => {
                let indices = Self::delinearize(&mut editor, &base, indices, *rank)?;
                editor.add(SsaInstruction::MatrixGet {
                    output,
                    base,
                    indices,
                })?;
            }
        }

        editor.finish()?;
        Ok(())
    }

    /// `y = get A(I)` with a matrix `I`.
    fn gather_linear(
        editor: &mut BlockEditor<'_>,
        output: &str,
        base: &str,
        index: &str,
    ) -> Result<()> {
        let result_ty = editor.type_of(output)?;
        let size = editor.temporary("size", VarType::matrix(ElementKind::Double, Shape::row(None)));
        editor.add(SsaInstruction::AccessSize {
            output: size.clone(),
            base: base.to_string(),
            index: index.to_string(),
        })?;
        let count = editor.add_call("numel_result", "numel", &[index])?;
        let initial = editor.temporary("result", result_ty.clone());
        editor.add_call_into("matisse_new_array", &[initial.as_str()], &[size.as_str()])?;

        let one = editor.add_number("one", 1.0)?;
        let blocks = editor.make_for_loop(&one, &one, &count)?;
        let matrix_in = editor.temporary("result", result_ty.clone());
        let iter = editor.add_iter("i")?;
        let position = editor.add_simple_get("index", index, &[iter.as_str()])?;
        let value = editor.add_get("value", base, &[position.as_str()])?;
        let matrix_out = editor.add_simple_set("result", &matrix_in, &[iter.as_str()], &value)?;

        let body_end = editor.current_block();
        editor.insert_phi(
            blocks.loop_block,
            &matrix_in,
            vec![
                PhiSource::new(blocks.container, initial.as_str()),
                PhiSource::new(body_end, matrix_out.as_str()),
            ],
        )?;
        editor.set_current(blocks.end_block);
        editor.insert_phi(
            blocks.end_block,
            output,
            vec![
                PhiSource::new(blocks.container, initial),
                PhiSource::new(body_end, matrix_out),
            ],
        )
    }

    /// `y = get A(i1, .., in)` with at least one matrix index. The outermost loop runs over the
    /// last matrix index; the result is filled in column-major order.
    fn gather_nested(
        editor: &mut BlockEditor<'_>,
        output: &str,
        base: &str,
        indices: &[String],
        positions: &[usize],
    ) -> Result<()> {
        let result_ty = editor.type_of(output)?;
        let one = editor.add_number("one", 1.0)?;

        let mut counts = Vec::with_capacity(positions.len());
        for &position in positions {
            counts.push(editor.add_call("numel_result", "numel", &[indices[position].as_str()])?);
        }
        let dims: Vec<&str> = (0..indices.len())
            .map(|position| {
                positions
                    .iter()
                    .position(|&p| p == position)
                    .map_or(one.as_str(), |level| counts[level].as_str())
            })
            .collect();
        let initial = editor.temporary("result", result_ty.clone());
        editor.add_call_into("matisse_new_array_from_dims", &[initial.as_str()], &dims)?;

        let mut counter = if positions.len() > 1 {
            Some(editor.add_number("counter", 1.0)?)
        } else {
            None
        };

        let mut addressed: Vec<String> = indices.to_vec();
        let mut matrix = initial;
        let mut levels = Vec::with_capacity(positions.len());
        let mut last_iter = String::new();

        for (level, &position) in positions.iter().enumerate().rev() {
            let blocks = editor.make_for_loop(&one, &one, &counts[level])?;
            let matrix_in = editor.temporary("result", result_ty.clone());
            let counter_pair = match &counter {
                Some(outer) => Some((outer.clone(), editor.temporary("counter", VarType::double()))),
                None => None,
            };
            let iter = editor.add_iter("i")?;
            addressed[position] =
                editor.add_simple_get("index", &indices[position], &[iter.as_str()])?;

            levels.push(GatherLevel {
                container: blocks.container,
                loop_block: blocks.loop_block,
                end_block: blocks.end_block,
                matrix_outer: matrix.clone(),
                matrix_in: matrix_in.clone(),
                counter: counter_pair.clone(),
            });
            matrix = matrix_in;
            counter = counter_pair.map(|(_, inner)| inner);
            last_iter = iter;
        }

        let addressed: Vec<&str> = addressed.iter().map(String::as_str).collect();
        let value = editor.add_get("value", base, &addressed)?;
        let slot = counter.clone().unwrap_or(last_iter);
        let mut matrix_out = editor.add_simple_set("result", &matrix, &[slot.as_str()], &value)?;
        let mut counter_out = match &counter {
            Some(current) => Some(editor.add_call("counter", "plus", &[current.as_str(), one.as_str()])?),
            None => None,
        };

        for (depth, level) in levels.iter().enumerate().rev() {
            let body_end = editor.current_block();
            editor.insert_phi(
                level.loop_block,
                &level.matrix_in,
                vec![
                    PhiSource::new(level.container, level.matrix_outer.as_str()),
                    PhiSource::new(body_end, matrix_out.as_str()),
                ],
            )?;
            editor.set_current(level.end_block);

            let after = if depth == 0 {
                output.to_string()
            } else {
                editor.temporary("result", result_ty.clone())
            };
            editor.insert_phi(
                level.end_block,
                &after,
                vec![
                    PhiSource::new(level.container, level.matrix_outer.as_str()),
                    PhiSource::new(body_end, matrix_out.as_str()),
                ],
            )?;
            matrix_out = after;

            if let (Some((outer, inner)), Some(out)) = (&level.counter, &counter_out) {
                editor.insert_phi(
                    level.loop_block,
                    inner,
                    vec![
                        PhiSource::new(level.container, outer.as_str()),
                        PhiSource::new(body_end, out.as_str()),
                    ],
                )?;
                counter_out = if depth == 0 {
                    None
                } else {
                    let after = editor.temporary("counter", VarType::double());
                    editor.insert_phi(
                        level.end_block,
                        &after,
                        vec![
                            PhiSource::new(level.container, outer.as_str()),
                            PhiSource::new(body_end, out.as_str()),
                        ],
                    )?;
                    Some(after)
                };
            }
        }
        Ok(())
    }

    /// Splits the last of `indices` over the dimensions from its position to `rank`.
    fn delinearize(
        editor: &mut BlockEditor<'_>,
        base: &str,
        mut indices: Vec<String>,
        rank: usize,
    ) -> Result<Vec<String>> {
        let Some(last) = indices.pop() else {
            return Ok(indices);
        };
        let first_axis = indices.len();
        let one = editor.add_number("one", 1.0)?;
        let mut remainder = editor.add_call("offset", "minus", &[last.as_str(), one.as_str()])?;

        for axis in first_axis..rank - 1 {
            let dim = editor.add_number("dim", count(axis + 1))?;
            let extent = editor.add_call("size", "size", &[base, dim.as_str()])?;
            let offset = editor.add_call("offset", "mod", &[remainder.as_str(), extent.as_str()])?;
            indices.push(editor.add_call("index", "plus", &[offset.as_str(), one.as_str()])?);
            remainder = editor.add_call("offset", "idivide", &[remainder.as_str(), extent.as_str()])?;
        }
        indices.push(editor.add_call("index", "plus", &[remainder.as_str(), one.as_str()])?);
        Ok(indices)
    }
}

#[allow(clippy::cast_precision_loss)]
fn count(value: usize) -> f64 {
    value as f64
}

impl SsaPass for MultiGetEliminationPass {
    fn name(&self) -> &'static str {
        "multi-get-elimination"
    }

    fn description(&self) -> &'static str {
        "Lowers matrix-indexed reads and normalizes the index count of scalar reads"
    }

    fn run_on_function(&self, instance: &mut FunctionInstance, ctx: &CompilerContext) -> Result<bool> {
        let changes = EventLog::new();
        let name = instance.name().to_string();
        let mut declines = Declines::new(self.name(), &name);

        for _ in 0..MAX_ITERATIONS {
            let Some((block, index, rewrite)) =
                Self::find_candidate(instance, &mut declines, &changes)
            else {
                break;
            };
            Self::rewrite(instance, ctx, block, index, &rewrite)?;
            let kind = match rewrite {
                Rewrite::Gather(_) => EventKind::AccessLowered,
                _ => EventKind::InstructionRewritten,
            };
            changes
                .record(kind)
                .at(name.as_str(), block)
                .message(format!("{rewrite:?}"));
        }

        Ok(commit(&changes, &ctx.events))
    }
}
