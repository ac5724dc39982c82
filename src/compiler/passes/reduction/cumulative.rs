//! `sum` and `mean` elimination.

use crate::{
    analysis::{FunctionInstance, SsaInstruction},
    compiler::{
        context::CompilerContext,
        editor::BlockEditor,
        events::{EventKind, EventLog},
        pass::SsaPass,
        passes::{
            reduction::accumulate,
            utils::{any_single_call, commit, shape_of, Declines},
        },
    },
    Result,
};

/// Maximum number of reductions expanded per run.
const MAX_ITERATIONS: usize = 100;

/// Expands `sum(x)` and `mean(x)` of a known vector into an accumulator loop; `mean` divides
/// the sum by `numel(x)` afterwards.
pub struct CumulativeReductionEliminationPass;

impl Default for CumulativeReductionEliminationPass {
    fn default() -> Self {
        Self::new()
    }
}

impl CumulativeReductionEliminationPass {
    /// Creates a new cumulative reduction elimination pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn find_candidate(
        instance: &FunctionInstance,
        declines: &mut Declines,
        changes: &EventLog,
    ) -> Option<(usize, usize)> {
        for (block, index, instruction) in instance.body.instructions() {
            let Some((output, function, inputs)) = any_single_call(instruction) else {
                continue;
            };
            if function != "sum" && function != "mean" {
                continue;
            }
            if declines.contains(output) {
                continue;
            }
            let [input] = inputs else {
                declines.record(changes, block, output, "only the one-argument form is expanded");
                continue;
            };
            if !shape_of(instance, input).is_some_and(|s| s.is_known_1d()) {
                declines.record(changes, block, output, "input is not a known vector");
                continue;
            }
            return Some((block, index));
        }
        None
    }

    fn add_element(editor: &mut BlockEditor<'_>, input: &str, acc: &str, iter: &str) -> Result<String> {
        let value = editor.add_simple_get("value", input, &[iter])?;
        editor.add_call("acc", "plus", &[acc, value.as_str()])
    }

    fn expand(
        instance: &mut FunctionInstance,
        ctx: &CompilerContext,
        block: usize,
        index: usize,
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
        let (Some(output), [input]) = (outputs.first(), inputs.as_slice()) else {
            return Err(malformed_error!("malformed {} call", function));
        };

        let ty = editor.type_of(output)?.without_constant();
        let count = editor.add_call("numel_result", "numel", &[input.as_str()])?;

        if function == "mean" {
            let sum = accumulate(&mut editor, &count, 0.0, &ty, None, |e, acc, iter| {
                Self::add_element(e, input, acc, iter)
            })?;
            editor.add_call_into("rdivide", &[output.as_str()], &[sum.as_str(), count.as_str()])?;
        } else {
            accumulate(&mut editor, &count, 0.0, &ty, Some(output), |e, acc, iter| {
                Self::add_element(e, input, acc, iter)
            })?;
        }

        editor.finish()?;
        Ok(format!("{output} = {function}"))
    }
}

impl SsaPass for CumulativeReductionEliminationPass {
    fn name(&self) -> &'static str {
        "cumulative-reduction-elimination"
    }

    fn description(&self) -> &'static str {
        "Expands sums and means of vectors into accumulator loops"
    }

    fn run_on_function(&self, instance: &mut FunctionInstance, ctx: &CompilerContext) -> Result<bool> {
        let changes = EventLog::new();
        let name = instance.name().to_string();
        let mut declines = Declines::new(self.name(), &name);

        for _ in 0..MAX_ITERATIONS {
            let Some((block, index)) = Self::find_candidate(instance, &mut declines, &changes) else {
                break;
            };
            let message = Self::expand(instance, ctx, block, index)?;
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

    fn fixture(function: &str, shape: Shape) -> FunctionInstance {
        FunctionBuilder::new("f").build_with(|f| {
            f.matrix("x$1", shape);
            f.scalars(&["y$1"]);
            f.outputs(&["y$1"]);
            f.block(0, |b| {
                b.argument("x$1", 0);
                b.call(function, &["y$1"], &["x$1"]);
            });
        })
    }

    fn run(instance: &mut FunctionInstance) -> bool {
        let ctx = CompilerContext::with_builtins();
        CumulativeReductionEliminationPass::new()
            .run_on_function(instance, &ctx)
            .expect("pass")
    }

    #[test]
    fn test_sum_of_row() {
        let mut instance = fixture("sum", Shape::row(None));
        assert!(run(&mut instance));
        validate(&instance.body).expect("valid");

        let rendered = instance.body.to_string();
        assert!(rendered.contains("$value$1 = simple_get x$1($iter$1)"));
        assert!(rendered.contains("$acc$3 = plus $acc$2, $value$1"));
        assert_eq!(
            instance.body.defining_instruction("y$1").map(ToString::to_string),
            Some("y$1 = phi #0:$acc$1, #1:$acc$3".to_string())
        );
    }

    #[test]
    fn test_mean_divides_by_count() {
        let mut instance = fixture("mean", Shape::column(Some(8)));
        assert!(run(&mut instance));
        validate(&instance.body).expect("valid");
        assert_eq!(
            instance.body.defining_instruction("y$1").map(ToString::to_string),
            Some("y$1 = rdivide $acc$4, $numel_result$1".to_string())
        );
        assert!(instance.body.to_string().contains("$acc$4 = phi #0:$acc$1, #1:$acc$3"));
    }

    #[test]
    fn test_matrix_input_declined() {
        let mut instance = fixture("sum", Shape::with_rank(2));
        let before = instance.clone();
        assert!(!run(&mut instance));
        assert_eq!(instance, before);
    }
}
