//! Access size elimination pass.
//!
//! `s = access_size A(I)` is the size of the result of the linear access `A(I)`. The rule is:
//!
//! - a scalar `I` yields `[1 1]`,
//! - an `I` that is not a vector yields `size(I)`,
//! - a vector `I` into a row vector `A` yields `[1 numel(I)]`,
//! - a vector `I` into a column vector `A` yields `[numel(I) 1]`,
//! - every other vector `I` yields `size(I)`.
//!
//! Whatever the types settle is emitted directly; the rest is decided at runtime with
//! `ndims`/`size` comparisons, branches and phi merges.

use crate::{
    analysis::{FunctionInstance, Shape, SsaInstruction, VarType},
    compiler::{
        context::CompilerContext,
        editor::BlockEditor,
        events::{EventKind, EventLog},
        pass::SsaPass,
        passes::utils::{commit, Declines},
    },
    Result,
};

/// Maximum number of size queries lowered per run.
const MAX_ITERATIONS: usize = 100;

/// How a size query is lowered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lowering {
    /// `[1 1]`
    Ones,
    /// `size(I)`
    IndexSize,
    /// `[1 numel(I)]`
    Row,
    /// `[numel(I) 1]`
    Column,
    /// Runtime checks
    Runtime,
}

/// Operands of one `access_size` instruction.
struct Access {
    output: String,
    base: String,
    index: String,
    base_shape: Shape,
    index_shape: Shape,
    ty: VarType,
}

/// Access size elimination pass.
pub struct AccessSizeEliminationPass;

impl Default for AccessSizeEliminationPass {
    fn default() -> Self {
        Self::new()
    }
}

/// Shape of a value as seen by indexing; scalars are 1x1.
fn indexing_shape(ty: &VarType) -> Option<Shape> {
    match ty {
        VarType::Matrix { shape, .. } => Some(shape.clone()),
        VarType::Scalar { .. } => Some(Shape::known(&[1, 1])),
        VarType::String => None,
    }
}

fn is_known_wide_row(shape: &Shape) -> bool {
    shape.is_known_row() && shape.dim(1).is_some_and(|n| n != 1)
}

fn is_known_tall_column(shape: &Shape) -> bool {
    shape.is_known_column() && shape.dim(0).is_some_and(|n| n != 1)
}

impl AccessSizeEliminationPass {
    /// Creates a new access size elimination pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Decides the lowering of `access_size base(index)`, or `None` to leave it alone.
    fn classify(base: &Shape, index: &Shape, index_is_scalar: bool) -> Option<Lowering> {
        if index_is_scalar || index.is_known_scalar() {
            return Some(Lowering::Ones);
        }
        if index.is_known_not_1d() {
            return Some(Lowering::IndexSize);
        }
        if index.is_known_1d() {
            if base.is_known_not_1d() || base.is_known_scalar() {
                return Some(Lowering::IndexSize);
            }
            if is_known_wide_row(base) {
                return Some(Lowering::Row);
            }
            if is_known_tall_column(base) {
                return Some(Lowering::Column);
            }
        }
        if index.rank().is_none() && base.rank().is_none() {
            return None;
        }
        Some(Lowering::Runtime)
    }

    fn find_candidate(
        instance: &FunctionInstance,
        declines: &mut Declines,
        changes: &EventLog,
    ) -> Option<(usize, usize, Access, Lowering)> {
        for (block, index, instruction) in instance.body.instructions() {
            let SsaInstruction::AccessSize {
                output,
                base,
                index: index_var,
            } = instruction
            else {
                continue;
            };
            if declines.contains(output) {
                continue;
            }

            let (Some(base_ty), Some(index_ty), Some(ty)) = (
                instance.types.get(base),
                instance.types.get(index_var),
                instance.types.get(output),
            ) else {
                declines.record(changes, block, output, "operand types are missing");
                continue;
            };
            let (Some(base_shape), Some(index_shape)) =
                (indexing_shape(base_ty), indexing_shape(index_ty))
            else {
                declines.record(changes, block, output, "operand is a string");
                continue;
            };

            let Some(lowering) = Self::classify(&base_shape, &index_shape, index_ty.is_scalar())
            else {
                declines.record(changes, block, output, "neither operand rank is known");
                continue;
            };

            let access = Access {
                output: output.clone(),
                base: base.clone(),
                index: index_var.clone(),
                base_shape,
                index_shape,
                ty: ty.clone(),
            };
            return Some((block, index, access, lowering));
        }
        None
    }

    fn rewrite(
        instance: &mut FunctionInstance,
        ctx: &CompilerContext,
        block: usize,
        index: usize,
        access: &Access,
        lowering: Lowering,
    ) -> Result<()> {
        let (mut editor, _) = BlockEditor::split_at(instance, ctx.registry(), block, index)?;
        let output = access.output.as_str();
        let index_var = access.index.as_str();

        match lowering {
            Lowering::Ones => {
                let one = editor.add_number("one", 1.0)?;
                editor.add_call_into("horzcat", &[output], &[one.as_str(), one.as_str()])?;
            }
            Lowering::IndexSize => editor.add_call_into("size", &[output], &[index_var])?,
            Lowering::Row => {
                let one = editor.add_number("one", 1.0)?;
                let count = editor.add_call("numel_result", "numel", &[index_var])?;
                editor.add_call_into("horzcat", &[output], &[one.as_str(), count.as_str()])?;
            }
            Lowering::Column => {
                let one = editor.add_number("one", 1.0)?;
                let count = editor.add_call("numel_result", "numel", &[index_var])?;
                editor.add_call_into("horzcat", &[output], &[count.as_str(), one.as_str()])?;
            }
            Lowering::Runtime => {
                let value = Self::lower_runtime(&mut editor, access)?;
                editor.add_copy(output, &value)?;
            }
        }

        editor.finish()?;
        Ok(())
    }

    fn lower_runtime(editor: &mut BlockEditor<'_>, access: &Access) -> Result<String> {
        let index_size = editor.add_call("index_size", "size", &[access.index.as_str()])?;
        if access.index_shape.is_known_1d() {
            return Self::vector_index(editor, access, &index_size);
        }

        let is_vector = Self::is_vector(editor, &access.index, &access.index_shape)?;
        editor.add_branch_merge(
            &is_vector,
            "access_size",
            access.ty.clone(),
            |e| Self::vector_index(e, access, &index_size),
            |_| Ok(index_size.clone()),
        )
    }

    /// Emits a logical that is true when `variable` is a row or a column at runtime.
    fn is_vector(editor: &mut BlockEditor<'_>, variable: &str, shape: &Shape) -> Result<String> {
        if shape.rank() == Some(2) {
            return Self::is_vector_2d(editor, variable);
        }

        let dims = editor.add_call("ndims", "ndims", &[variable])?;
        let two = editor.add_number("two", 2.0)?;
        let is_2d = editor.add_call("is_2d", "eq", &[dims.as_str(), two.as_str()])?;
        // In the else arm `is_2d` is false, which is also the answer.
        let fallback = is_2d.clone();
        editor.add_branch_merge(
            &is_2d,
            "is_vector",
            VarType::logical(),
            |e| Self::is_vector_2d(e, variable),
            |_| Ok(fallback),
        )
    }

    fn is_vector_2d(editor: &mut BlockEditor<'_>, variable: &str) -> Result<String> {
        let sizes = editor.add_call_outputs(&["rows", "columns"], "size", &[variable])?;
        let one = editor.add_number("one", 1.0)?;
        let single_row = editor.add_call("single_row", "eq", &[sizes[0].as_str(), one.as_str()])?;
        let single_column =
            editor.add_call("single_column", "eq", &[sizes[1].as_str(), one.as_str()])?;
        editor.add_call(
            "is_vector",
            "or",
            &[single_row.as_str(), single_column.as_str()],
        )
    }

    /// Size of the access when the index is known to be a vector.
    fn vector_index(
        editor: &mut BlockEditor<'_>,
        access: &Access,
        index_size: &str,
    ) -> Result<String> {
        let base_shape = &access.base_shape;
        if base_shape.is_known_not_1d() || base_shape.is_known_scalar() {
            return Ok(index_size.to_string());
        }
        if base_shape.rank() == Some(2) {
            return Self::vector_index_2d(editor, access, index_size);
        }

        let dims = editor.add_call("ndims", "ndims", &[access.base.as_str()])?;
        let two = editor.add_number("two", 2.0)?;
        let is_2d = editor.add_call("is_2d", "eq", &[dims.as_str(), two.as_str()])?;
        editor.add_branch_merge(
            &is_2d,
            "access_size",
            access.ty.clone(),
            |e| Self::vector_index_2d(e, access, index_size),
            |_| Ok(index_size.to_string()),
        )
    }

    /// Size of the access when the index is a vector and the base is 2-D.
    fn vector_index_2d(
        editor: &mut BlockEditor<'_>,
        access: &Access,
        index_size: &str,
    ) -> Result<String> {
        if is_known_wide_row(&access.base_shape) {
            return Self::row_size(editor, &access.index);
        }
        if is_known_tall_column(&access.base_shape) {
            return Self::column_size(editor, &access.index);
        }

        let sizes = editor.add_call_outputs(&["rows", "columns"], "size", &[access.base.as_str()])?;
        let (rows, columns) = (sizes[0].as_str(), sizes[1].as_str());
        let one = editor.add_number("one", 1.0)?;
        let single_row = editor.add_call("single_row", "eq", &[rows, one.as_str()])?;
        let wide = editor.add_call("wide", "ne", &[columns, one.as_str()])?;
        let is_row = editor.add_call("is_row", "and", &[single_row.as_str(), wide.as_str()])?;
        let single_column = editor.add_call("single_column", "eq", &[columns, one.as_str()])?;
        let tall = editor.add_call("tall", "ne", &[rows, one.as_str()])?;
        let is_column =
            editor.add_call("is_column", "and", &[single_column.as_str(), tall.as_str()])?;

        editor.add_branch_merge(
            &is_row,
            "access_size",
            access.ty.clone(),
            |e| Self::row_size(e, &access.index),
            |e| {
                e.add_branch_merge(
                    &is_column,
                    "access_size",
                    access.ty.clone(),
                    |e| Self::column_size(e, &access.index),
                    |_| Ok(index_size.to_string()),
                )
            },
        )
    }

    fn row_size(editor: &mut BlockEditor<'_>, index: &str) -> Result<String> {
        let one = editor.add_number("one", 1.0)?;
        let count = editor.add_call("numel_result", "numel", &[index])?;
        editor.add_call("access_size", "horzcat", &[one.as_str(), count.as_str()])
    }

    fn column_size(editor: &mut BlockEditor<'_>, index: &str) -> Result<String> {
        let one = editor.add_number("one", 1.0)?;
        let count = editor.add_call("numel_result", "numel", &[index])?;
        editor.add_call("access_size", "horzcat", &[count.as_str(), one.as_str()])
    }
}

impl SsaPass for AccessSizeEliminationPass {
    fn name(&self) -> &'static str {
        "access-size-elimination"
    }

    fn description(&self) -> &'static str {
        "Computes the size of linear accesses from the operand sizes"
    }

    fn run_on_function(&self, instance: &mut FunctionInstance, ctx: &CompilerContext) -> Result<bool> {
        let changes = EventLog::new();
        let name = instance.name().to_string();
        let mut declines = Declines::new(self.name(), &name);

        for _ in 0..MAX_ITERATIONS {
            let Some((block, index, access, lowering)) =
                Self::find_candidate(instance, &mut declines, &changes)
            else {
                break;
            };
            Self::rewrite(instance, ctx, block, index, &access, lowering)?;
            changes
                .record(EventKind::AccessLowered)
                .at(name.as_str(), block)
                .message(format!("{}: {:?}", access.output, lowering));
        }

        Ok(commit(&changes, &ctx.events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{validate, FunctionBuilder};

    fn fixture(base: Shape, index: Option<Shape>) -> FunctionInstance {
        FunctionBuilder::new("f").build_with(|f| {
            f.matrix("A$1", base);
            match index {
                Some(shape) => f.matrix("I$1", shape),
                None => f.scalars(&["I$1"]),
            }
            f.matrix("s$1", Shape::row(None));
            f.outputs(&["s$1"]);
            f.block(0, |b| {
                b.argument("A$1", 0);
                b.argument("I$1", 1);
                b.access_size("s$1", "A$1", "I$1");
            });
        })
    }

    fn run(instance: &mut FunctionInstance) -> (bool, CompilerContext) {
        let ctx = CompilerContext::with_builtins();
        let changed = AccessSizeEliminationPass::new()
            .run_on_function(instance, &ctx)
            .expect("pass");
        (changed, ctx)
    }

    fn definition(instance: &FunctionInstance) -> String {
        instance
            .body
            .defining_instruction("s$1")
            .map(ToString::to_string)
            .unwrap_or_default()
    }

    #[test]
    fn test_scalar_index() {
        let mut instance = fixture(Shape::unknown(), None);
        assert!(run(&mut instance).0);
        assert_eq!(definition(&instance), "s$1 = horzcat $one$1, $one$1");
    }

    #[test]
    fn test_matrix_index_keeps_its_size() {
        let mut instance = fixture(Shape::row(None), Some(Shape::known(&[3, 4])));
        assert!(run(&mut instance).0);
        assert_eq!(definition(&instance), "s$1 = size I$1");
    }

    #[test]
    fn test_vector_into_row() {
        let mut instance = fixture(Shape::row(Some(5)), Some(Shape::column(None)));
        assert!(run(&mut instance).0);
        assert_eq!(definition(&instance), "s$1 = horzcat $one$1, $numel_result$1");
        assert_eq!(instance.body.block_count(), 1);
    }

    #[test]
    fn test_vector_into_column() {
        let mut instance = fixture(Shape::column(Some(5)), Some(Shape::row(None)));
        assert!(run(&mut instance).0);
        assert_eq!(definition(&instance), "s$1 = horzcat $numel_result$1, $one$1");
    }

    #[test]
    fn test_vector_into_matrix() {
        let mut instance = fixture(Shape::with_rank(3), Some(Shape::row(None)));
        assert!(run(&mut instance).0);
        assert_eq!(definition(&instance), "s$1 = size I$1");
    }

    #[test]
    fn test_runtime_checks() {
        let mut instance = fixture(Shape::with_rank(2), Some(Shape::row(None)));
        let (changed, _) = run(&mut instance);
        assert!(changed);
        validate(&instance.body).expect("valid");

        let rendered = instance.body.to_string();
        assert!(rendered.contains("[$rows$1, $columns$1] = size A$1"));
        assert!(rendered.contains("$is_row$1 = and $single_row$1, $wide$1"));
        assert!(rendered.contains("$is_column$1 = and $single_column$1, $tall$1"));
        assert!(!rendered.contains("access_size A$1"));
        assert!(definition(&instance).starts_with("s$1 = $access_size$"));
        // then/else/join for the row check and the nested column check
        assert_eq!(instance.body.block_count(), 7);
    }

    #[test]
    fn test_unknown_index_rank_checks_ndims() {
        let mut instance = fixture(Shape::row(Some(4)), Some(Shape::unknown()));
        assert!(run(&mut instance).0);
        validate(&instance.body).expect("valid");
        let rendered = instance.body.to_string();
        assert!(rendered.contains("$ndims$1 = ndims I$1"));
        assert!(rendered.contains("$is_vector$"));
    }

    #[test]
    fn test_both_ranks_unknown_declined() {
        let mut instance = fixture(Shape::unknown(), Some(Shape::unknown()));
        let before = instance.clone();
        let (changed, ctx) = run(&mut instance);
        assert!(!changed);
        assert_eq!(instance, before);
        assert_eq!(ctx.events.count_kind(EventKind::PatternDeclined), 1);
    }
}
