//! Dot product elimination.

use crate::{
    analysis::{FunctionInstance, SsaInstruction},
    compiler::{
        context::CompilerContext,
        editor::BlockEditor,
        events::{EventKind, EventLog},
        pass::SsaPass,
        passes::{
            reduction::accumulate,
            utils::{commit, is_scalar, shape_of, single_call, Declines},
        },
    },
    Result,
};

/// Maximum number of products expanded per run.
const MAX_ITERATIONS: usize = 100;

/// Expands `y = dot(a, b)` of two known vectors into
///
/// ```text
/// validate_equal numel(a), numel(b)
/// acc = 0
/// for i = 1:numel(a): acc = plus(acc, times(a(i), b(i)))
/// y = acc
/// ```
pub struct DotReductionEliminationPass;

impl Default for DotReductionEliminationPass {
    fn default() -> Self {
        Self::new()
    }
}

impl DotReductionEliminationPass {
    /// Creates a new dot reduction elimination pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn is_vector(instance: &FunctionInstance, variable: &str) -> bool {
        shape_of(instance, variable).is_some_and(|s| s.is_known_1d())
    }

    fn find_candidate(
        instance: &FunctionInstance,
        declines: &mut Declines,
        changes: &EventLog,
    ) -> Option<(usize, usize)> {
        for (block, index, instruction) in instance.body.instructions() {
            let Some((output, inputs)) = single_call(instruction, "dot") else {
                continue;
            };
            if declines.contains(output) {
                continue;
            }
            let [a, b] = inputs else {
                declines.record(changes, block, output, "expected two operands");
                continue;
            };
            if !Self::is_vector(instance, a) || !Self::is_vector(instance, b) {
                declines.record(changes, block, output, "operands are not known vectors");
                continue;
            }
            if !is_scalar(instance, output) {
                declines.record(changes, block, output, "result is not a scalar");
                continue;
            }
            return Some((block, index));
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
            return Err(malformed_error!("expected a dot call"));
        };
        let (Some(output), [a, b]) = (outputs.first(), inputs.as_slice()) else {
            return Err(malformed_error!("malformed dot call"));
        };

        let ty = editor.type_of(output)?.without_constant();
        let count = editor.add_call("numel_result", "numel", &[a.as_str()])?;
        let other = editor.add_call("numel_result", "numel", &[b.as_str()])?;
        editor.add_validate_equal(&count, &other)?;

        accumulate(&mut editor, &count, 0.0, &ty, Some(output), |e, acc, iter| {
            let left = e.add_simple_get("left", a, &[iter])?;
            let right = e.add_simple_get("right", b, &[iter])?;
            let product = e.add_call("product", "times", &[left.as_str(), right.as_str()])?;
            e.add_call("acc", "plus", &[acc, product.as_str()])
        })?;

        editor.finish()?;
        Ok(output.clone())
    }
}

impl SsaPass for DotReductionEliminationPass {
    fn name(&self) -> &'static str {
        "dot-reduction-elimination"
    }

    fn description(&self) -> &'static str {
        "Expands dot products of vectors into accumulator loops"
    }

    fn run_on_function(&self, instance: &mut FunctionInstance, ctx: &CompilerContext) -> Result<bool> {
        let changes = EventLog::new();
        let name = instance.name().to_string();
        let mut declines = Declines::new(self.name(), &name);

        for _ in 0..MAX_ITERATIONS {
            let Some((block, index)) = Self::find_candidate(instance, &mut declines, &changes) else {
                break;
            };
            let output = Self::expand(instance, ctx, block, index)?;
            changes
                .record(EventKind::ReductionExpanded)
                .at(name.as_str(), block)
                .message(format!("{output} = dot"));
        }

        Ok(commit(&changes, &ctx.events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{validate, FunctionBuilder, Shape};

    fn fixture(b_shape: Shape) -> FunctionInstance {
        FunctionBuilder::new("f").build_with(|f| {
            f.matrix("a$1", Shape::row(None));
            f.matrix("b$1", b_shape);
            f.scalars(&["y$1"]);
            f.outputs(&["y$1"]);
            f.block(0, |b| {
                b.argument("a$1", 0);
                b.argument("b$1", 1);
                b.call("dot", &["y$1"], &["a$1", "b$1"]);
            });
        })
    }

    fn run(instance: &mut FunctionInstance) -> (bool, CompilerContext) {
        let ctx = CompilerContext::with_builtins();
        let changed = DotReductionEliminationPass::new()
            .run_on_function(instance, &ctx)
            .expect("pass");
        (changed, ctx)
    }

    #[test]
    fn test_dot_of_vectors() {
        let mut instance = fixture(Shape::column(None));
        let (changed, ctx) = run(&mut instance);
        assert!(changed);
        validate(&instance.body).expect("valid");
        assert!(ctx.events.has(EventKind::ReductionExpanded));

        let rendered = instance.body.to_string();
        assert!(rendered.contains("validate_equal $numel_result$1, $numel_result$2"));
        assert!(rendered.contains("for $one$1, $one$1, $numel_result$1, #1, #2"));
        assert!(rendered.contains("$product$1 = times $left$1, $right$1"));
        assert!(rendered.contains("$acc$3 = plus $acc$2, $product$1"));
        assert_eq!(
            instance.body.defining_instruction("y$1").map(ToString::to_string),
            Some("y$1 = phi #0:$acc$1, #1:$acc$3".to_string())
        );
    }

    #[test]
    fn test_matrix_operand_declined() {
        let mut instance = fixture(Shape::with_rank(2));
        let before = instance.clone();
        let (changed, ctx) = run(&mut instance);
        assert!(!changed);
        assert_eq!(instance, before);
        assert_eq!(ctx.events.count_kind(EventKind::PatternDeclined), 1);
    }
}
