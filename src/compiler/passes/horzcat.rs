//! Horzcat elimination pass.
//!
//! Expands `y = horzcat x1, .., xn` whose result is a known row into one pre-sized allocation
//! followed by element writes:
//!
//! ```text
//! $output_size$1 = 2
//! $one$1 = 1
//! $result$1 = matisse_new_array_from_dims $one$1, $output_size$1
//! $index$1 = 1
//! $result$2 = simple_set $result$1($index$1) = x1
//! $index$2 = 2
//! $result$3 = simple_set $result$2($index$2) = x2
//! y = $result$3
//! ```
//!
//! Scalar operands are written directly; row operands are copied with a loop. Before
//! expanding, operands that are themselves results of an expandable `horzcat` are spliced in,
//! so a chain of concatenations becomes a single allocation. The spliced inner calls are left
//! for dead-code elimination.

use std::collections::HashMap;

use crate::{
    analysis::{DefUseIndex, FunctionInstance, PhiSource, SsaInstruction, VarType},
    compiler::{
        context::CompilerContext,
        editor::BlockEditor,
        events::{EventKind, EventLog},
        pass::SsaPass,
        passes::utils::{commit, is_scalar, shape_of, single_call, Declines},
    },
    Result,
};

/// Maximum number of concatenations expanded per run.
const MAX_ITERATIONS: usize = 100;

/// Horzcat elimination pass.
pub struct HorzcatEliminationPass;

impl Default for HorzcatEliminationPass {
    fn default() -> Self {
        Self::new()
    }
}

/// Next write position into the result.
enum Position {
    Constant(usize),
    Variable(String),
}

#[allow(clippy::cast_precision_loss)]
fn count(value: usize) -> f64 {
    value as f64
}

impl HorzcatEliminationPass {
    /// Creates a new horzcat elimination pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn is_row(instance: &FunctionInstance, variable: &str) -> bool {
        shape_of(instance, variable).is_some_and(|s| s.is_known_row())
    }

    fn is_operand(instance: &FunctionInstance, variable: &str) -> bool {
        is_scalar(instance, variable) || Self::is_row(instance, variable)
    }

    /// Returns the reason `horzcat` into `output` cannot be expanded, if any.
    fn rejection(instance: &FunctionInstance, output: &str, inputs: &[String]) -> Option<&'static str> {
        if inputs.is_empty() {
            return Some("no operands");
        }
        if !Self::is_row(instance, output) {
            return Some("result is not a known row");
        }
        if !inputs.iter().all(|input| Self::is_operand(instance, input)) {
            return Some("operand is neither a scalar nor a known row");
        }
        None
    }

    fn splice(expandable: &HashMap<String, Vec<String>>, inputs: &[String]) -> Vec<String> {
        let mut spliced = Vec::with_capacity(inputs.len());
        for input in inputs {
            match expandable.get(input) {
                Some(inner) => spliced.extend(Self::splice(expandable, inner)),
                None => spliced.push(input.clone()),
            }
        }
        spliced
    }

    /// Splices nested expandable concatenations into their users.
    fn flatten(instance: &mut FunctionInstance, changes: &EventLog, function: &str) {
        let mut expandable = HashMap::new();
        for (_, _, instruction) in instance.body.instructions() {
            if let Some((output, inputs)) = single_call(instruction, "horzcat") {
                if Self::rejection(instance, output, inputs).is_none() {
                    expandable.insert(output.to_string(), inputs.to_vec());
                }
            }
        }

        let mut rewrites = Vec::new();
        for (block, index, instruction) in instance.body.instructions() {
            let Some((output, inputs)) = single_call(instruction, "horzcat") else {
                continue;
            };
            if !expandable.contains_key(output) {
                continue;
            }
            let spliced = Self::splice(&expandable, inputs);
            if spliced.as_slice() != inputs {
                let types: Vec<VarType> = spliced
                    .iter()
                    .filter_map(|v| instance.types.get(v).cloned())
                    .collect();
                rewrites.push((block, index, spliced, types));
            }
        }

        for (block, index, spliced, types) in rewrites {
            let Some(SsaInstruction::TypedCall {
                signature,
                outputs,
                inputs,
                ..
            }) = instance
                .body
                .block_mut(block)
                .and_then(|b| b.instructions_mut().get_mut(index))
            else {
                continue;
            };
            changes
                .record(EventKind::InstructionRewritten)
                .at(function, block)
                .message(format!("{} = horzcat {}", outputs.join(", "), spliced.join(", ")));
            signature.inputs = types;
            *inputs = spliced;
        }
    }

    fn find_candidate(
        instance: &FunctionInstance,
        declines: &mut Declines,
        changes: &EventLog,
    ) -> Option<(usize, usize)> {
        let index = DefUseIndex::build(&instance.body);
        for (block, position, instruction) in instance.body.instructions() {
            let Some((output, inputs)) = single_call(instruction, "horzcat") else {
                continue;
            };
            if declines.contains(output) {
                continue;
            }
            if let Some(reason) = Self::rejection(instance, output, inputs) {
                declines.record(changes, block, output, reason);
                continue;
            }
            if index.is_unused(output) && !instance.body.is_output(output) {
                continue;
            }
            return Some((block, position));
        }
        None
    }

    fn expand(
        instance: &mut FunctionInstance,
        ctx: &CompilerContext,
        block: usize,
        index: usize,
    ) -> Result<String> {
        let (mut editor, removed) = BlockEditor::split_at(instance, ctx.registry(), block, index)?;
        let SsaInstruction::TypedCall {
            outputs, inputs, ..
        } = removed
        else {
            return Err(malformed_error!("expected a horzcat call"));
        };
        let output = outputs
            .into_iter()
            .next()
            .ok_or_else(|| malformed_error!("horzcat without output"))?;
        let result_ty = editor.type_of(&output)?;

        // Widths: constant part plus `size(x, 2)` of rows of unknown width.
        let mut fixed = 0usize;
        let mut widths = HashMap::new();
        let mut two: Option<String> = None;
        for input in &inputs {
            let ty = editor.type_of(input)?;
            match ty.shape().map(|s| s.dim(1)) {
                None => fixed += 1,
                Some(Some(width)) => fixed += width,
                Some(None) => {
                    let dim = match &two {
                        Some(dim) => dim.clone(),
                        None => {
                            let dim = editor.add_number("dim", 2.0)?;
                            two = Some(dim.clone());
                            dim
                        }
                    };
                    let width = editor.add_call("width", "size", &[input.as_str(), dim.as_str()])?;
                    widths.insert(input.clone(), width);
                }
            }
        }
        let mut total = editor.add_number("output_size", count(fixed))?;
        for input in &inputs {
            if let Some(width) = widths.get(input) {
                total = editor.add_call("output_size", "plus", &[total.as_str(), width.as_str()])?;
            }
        }

        let one = editor.add_number("one", 1.0)?;
        let mut matrix = editor.temporary("result", result_ty.clone());
        editor.add_call_into(
            "matisse_new_array_from_dims",
            &[matrix.as_str()],
            &[one.as_str(), total.as_str()],
        )?;

        let mut position = Position::Constant(1);
        for (operand, input) in inputs.iter().enumerate() {
            let is_last = operand + 1 == inputs.len();
            let slot = match &position {
                Position::Constant(value) => editor.add_number("index", count(*value))?,
                Position::Variable(name) => name.clone(),
            };

            let ty = editor.type_of(input)?;
            let Some(shape) = ty.shape() else {
                matrix = editor.add_simple_set("result", &matrix, &[slot.as_str()], input)?;
                position = match position {
                    Position::Constant(value) => Position::Constant(value + 1),
                    Position::Variable(_) if is_last => Position::Variable(slot),
                    Position::Variable(_) => Position::Variable(editor.add_call(
                        "index",
                        "plus",
                        &[slot.as_str(), one.as_str()],
                    )?),
                };
                continue;
            };

            let loop_size = match (shape.dim(1), widths.get(input)) {
                (_, Some(width)) => width.clone(),
                (Some(width), None) => editor.add_number("loop_size", count(width))?,
                (None, None) => return Err(malformed_error!("row {} has no width", input)),
            };
            let blocks = editor.make_for_loop(&one, &one, &loop_size)?;
            let matrix_in = editor.temporary("result", result_ty.clone());
            let slot_in = editor.temporary("index", VarType::double());
            let iter = editor.add_iter("iter")?;
            let value = editor.add_simple_get("value", input, &[iter.as_str()])?;
            let matrix_next =
                editor.add_simple_set("result", &matrix_in, &[slot_in.as_str()], &value)?;
            let slot_next = editor.add_call("index", "plus", &[slot_in.as_str(), one.as_str()])?;
            let body_end = editor.current_block();

            for (inner, outer, next) in [
                (&matrix_in, &matrix, &matrix_next),
                (&slot_in, &slot, &slot_next),
            ] {
                editor.insert_phi(
                    blocks.loop_block,
                    inner,
                    vec![
                        PhiSource::new(blocks.container, outer.as_str()),
                        PhiSource::new(body_end, next.as_str()),
                    ],
                )?;
            }

            editor.set_current(blocks.end_block);
            let matrix_after = editor.temporary("result", result_ty.clone());
            editor.insert_phi(
                blocks.end_block,
                &matrix_after,
                vec![
                    PhiSource::new(blocks.container, matrix.as_str()),
                    PhiSource::new(body_end, matrix_next.as_str()),
                ],
            )?;
            matrix = matrix_after;

            if !is_last {
                let slot_after = editor.temporary("index", VarType::double());
                editor.insert_phi(
                    blocks.end_block,
                    &slot_after,
                    vec![
                        PhiSource::new(blocks.container, slot.as_str()),
                        PhiSource::new(body_end, slot_next.as_str()),
                    ],
                )?;
                position = Position::Variable(slot_after);
            }
        }

        editor.add_copy(&output, &matrix)?;
        editor.finish()?;
        Ok(output)
    }
}

impl SsaPass for HorzcatEliminationPass {
    fn name(&self) -> &'static str {
        "horzcat-elimination"
    }

    fn description(&self) -> &'static str {
        "Expands row concatenations into a pre-sized allocation and element writes"
    }

    fn run_on_function(&self, instance: &mut FunctionInstance, ctx: &CompilerContext) -> Result<bool> {
        let changes = EventLog::new();
        let name = instance.name().to_string();
        let mut declines = Declines::new(self.name(), &name);

        Self::flatten(instance, &changes, &name);

        for _ in 0..MAX_ITERATIONS {
            let Some((block, index)) = Self::find_candidate(instance, &mut declines, &changes) else {
                break;
            };
            let output = Self::expand(instance, ctx, block, index)?;
            changes
                .record(EventKind::ConcatenationExpanded)
                .at(name.as_str(), block)
                .message(output);
        }

        Ok(commit(&changes, &ctx.events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{validate, FunctionBuilder, Shape};

    fn run(instance: &mut FunctionInstance) -> (bool, CompilerContext) {
        let ctx = CompilerContext::with_builtins();
        let changed = HorzcatEliminationPass::new()
            .run_on_function(instance, &ctx)
            .expect("pass");
        (changed, ctx)
    }

    fn count_of(instance: &FunctionInstance, needle: &str) -> usize {
        instance.body.to_string().matches(needle).count()
    }

    #[test]
    fn test_two_scalars() {
        let mut instance = FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["a$1", "b$1"]);
            f.matrix("y$1", Shape::row(Some(2)));
            f.outputs(&["y$1"]);
            f.block(0, |b| {
                b.argument("a$1", 0);
                b.argument("b$1", 1);
                b.call("horzcat", &["y$1"], &["a$1", "b$1"]);
            });
        });
        let (changed, ctx) = run(&mut instance);
        assert!(changed);
        validate(&instance.body).expect("valid");
        assert_eq!(ctx.events.count_kind(EventKind::ConcatenationExpanded), 1);

        assert_eq!(
            instance.body.to_string(),
            "Function f -> y$1\nblock #0:\n  a$1 = arg 0\n  b$1 = arg 1\n  \
             $output_size$1 = 2\n  $one$1 = 1\n  \
             $result$1 = matisse_new_array_from_dims $one$1, $output_size$1\n  \
             $index$1 = 1\n  $result$2 = simple_set $result$1($index$1) = a$1\n  \
             $index$2 = 2\n  $result$3 = simple_set $result$2($index$2) = b$1\n  \
             y$1 = $result$3\n"
        );
        assert_eq!(instance.types.get("$result$1"), instance.types.get("y$1"));
    }

    #[test]
    fn test_nested_concatenation_is_flattened() {
        let mut instance = FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["x1$1", "x2$1", "a$1", "b$1"]);
            f.matrix("X3$1", Shape::row(Some(2)));
            f.matrix("y$1", Shape::row(Some(4)));
            f.outputs(&["y$1"]);
            f.block(0, |b| {
                b.argument("x1$1", 0);
                b.argument("x2$1", 1);
                b.argument("a$1", 2);
                b.argument("b$1", 3);
                b.call("horzcat", &["X3$1"], &["a$1", "b$1"]);
                b.call("horzcat", &["y$1"], &["x1$1", "X3$1", "x2$1"]);
            });
        });
        let (changed, _) = run(&mut instance);
        assert!(changed);
        validate(&instance.body).expect("valid");

        assert_eq!(count_of(&instance, "matisse_new_array_from_dims"), 1);
        assert_eq!(count_of(&instance, "simple_set"), 4);
        assert_eq!(
            instance.types.get("$output_size$1").and_then(VarType::constant_value),
            Some(4.0)
        );
        // The inner call is dead and left for dead-code elimination.
        assert!(instance.body.to_string().contains("X3$1 = horzcat a$1, b$1"));
    }

    #[test]
    fn test_row_operand_copied_by_loop() {
        let mut instance = FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["a$1"]);
            f.matrix("r$1", Shape::row(None));
            f.matrix("y$1", Shape::row(None));
            f.outputs(&["y$1"]);
            f.block(0, |b| {
                b.argument("a$1", 0);
                b.argument("r$1", 1);
                b.call("horzcat", &["y$1"], &["r$1", "a$1"]);
            });
        });
        let (changed, _) = run(&mut instance);
        assert!(changed);
        validate(&instance.body).expect("valid");

        let rendered = instance.body.to_string();
        assert!(rendered.contains("$width$1 = size r$1, $dim$1"));
        assert!(rendered.contains("$output_size$2 = plus $output_size$1, $width$1"));
        assert!(rendered.contains("for $one$1, $one$1, $width$1, #1, #2"));
        assert!(rendered.contains("$value$1 = simple_get r$1($iter$1)"));
        assert_eq!(instance.body.block_count(), 3);
        assert_eq!(count_of(&instance, "simple_set"), 2);
    }

    #[test]
    fn test_unknown_shape_keeps_call() {
        let mut instance = FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["a$1"]);
            f.matrix("m$1", Shape::with_rank(2));
            f.matrix("y$1", Shape::with_rank(2));
            f.outputs(&["y$1"]);
            f.block(0, |b| {
                b.argument("a$1", 0);
                b.argument("m$1", 1);
                b.call("horzcat", &["y$1"], &["a$1", "m$1"]);
            });
        });
        let before = instance.clone();
        let (changed, ctx) = run(&mut instance);
        assert!(!changed);
        assert_eq!(instance, before);
        assert!(ctx.events.has(EventKind::PatternDeclined));
    }

    #[test]
    fn test_idempotent() {
        let mut instance = FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["a$1", "b$1"]);
            f.matrix("y$1", Shape::row(Some(2)));
            f.outputs(&["y$1"]);
            f.block(0, |b| {
                b.argument("a$1", 0);
                b.argument("b$1", 1);
                b.call("horzcat", &["y$1"], &["a$1", "b$1"]);
            });
        });
        assert!(run(&mut instance).0);
        let once = instance.clone();
        assert!(!run(&mut instance).0);
        assert_eq!(instance, once);
    }
}
