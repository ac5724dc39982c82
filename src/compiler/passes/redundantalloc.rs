//! Redundant allocation elimination.
//!
//! An allocation whose value is only ever asked for its size is never materialized: every
//! `numel`/`size` query is answered from the allocation arguments instead. A negative dimension
//! allocates nothing along its axis, so arguments not known to be non-negative are clamped:
//!
//! ```text
//! x = zeros n                 ==>     d = max n, 0
//! y = numel x                         y = times d, d
//! ```

use crate::{
    analysis::{AssignedValue, DefUseIndex, FunctionInstance, SsaInstruction, VarType},
    compiler::{
        context::CompilerContext,
        editor::BlockEditor,
        events::{EventKind, EventLog},
        pass::SsaPass,
        passes::utils::{any_single_call, commit, constant_of, Declines},
    },
    Result,
};

/// Maximum number of allocations removed per run.
const MAX_ITERATIONS: usize = 100;

/// Allocation functions whose scalar arguments are the result dimensions.
const DIMENSION_ALLOCATIONS: &[&str] = &["zeros", "ones", "matisse_new_array_from_dims"];

/// How the size of a removable allocation is known.
#[derive(Debug, Clone)]
enum Origin {
    /// Explicit dimensions; a single argument `n` means `n x n`.
    Dims(Vec<String>),
    /// Same shape as another matrix.
    CopyOf(String),
}

impl Origin {
    fn dims(&self) -> Option<Vec<String>> {
        match self {
            Origin::Dims(dims) if dims.len() == 1 => Some(vec![dims[0].clone(), dims[0].clone()]),
            Origin::Dims(dims) => Some(dims.clone()),
            Origin::CopyOf(_) => None,
        }
    }
}

/// Returns `true` if `dim` can never hold a negative value.
fn is_non_negative(instance: &FunctionInstance, dim: &str) -> bool {
    if let Some(value) = constant_of(instance, dim) {
        return value >= 0.0;
    }
    matches!(
        instance.body.defining_instruction(dim).and_then(any_single_call),
        Some((_, "numel" | "size", _))
    )
}

/// Replaces every dimension that may be negative by `max(dim, 0)`.
fn clamped(editor: &mut BlockEditor<'_>, dims: &[String]) -> Result<Vec<String>> {
    let mut zero: Option<String> = None;
    let mut seen: Vec<(&str, String)> = Vec::new();
    let mut result = Vec::with_capacity(dims.len());
    for dim in dims {
        if is_non_negative(editor.instance(), dim) {
            result.push(dim.clone());
        } else if let Some((_, known)) = seen.iter().find(|(original, _)| *original == dim.as_str()) {
            result.push(known.clone());
        } else {
            let zero = match zero.clone() {
                Some(existing) => existing,
                None => {
                    let created = editor.add_number("zero", 0.0)?;
                    zero = Some(created.clone());
                    created
                }
            };
            let dimension = editor.add_call("dimension", "max", &[dim.as_str(), zero.as_str()])?;
            seen.push((dim.as_str(), dimension.clone()));
            result.push(dimension);
        }
    }
    Ok(result)
}

fn first_use(instance: &FunctionInstance, variable: &str) -> Option<(usize, usize)> {
    instance
        .body
        .instructions()
        .find(|(_, _, instruction)| instruction.uses(variable))
        .map(|(block, index, _)| (block, index))
}

/// Removes allocations only queried for their size.
pub struct RedundantAllocationEliminationPass;

impl Default for RedundantAllocationEliminationPass {
    fn default() -> Self {
        Self::new()
    }
}

impl RedundantAllocationEliminationPass {
    /// Creates a new redundant allocation elimination pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn origin(instance: &FunctionInstance, function: &str, inputs: &[String]) -> Option<Origin> {
        if DIMENSION_ALLOCATIONS.contains(&function)
            && !inputs.is_empty()
            && inputs
                .iter()
                .all(|i| instance.types.get(i).is_some_and(VarType::is_scalar))
        {
            return Some(Origin::Dims(inputs.to_vec()));
        }
        match (function, inputs) {
            ("matisse_new_array_from_matrix", [source]) => Some(Origin::CopyOf(source.clone())),
            _ => None,
        }
    }

    /// Returns `true` if `instruction` only asks `matrix` for its size.
    fn is_size_query(instance: &FunctionInstance, instruction: &SsaInstruction, matrix: &str) -> bool {
        match any_single_call(instruction) {
            Some((_, "numel", [input])) => input == matrix,
            Some((_, "size", [input, dim])) => {
                input == matrix
                    && dim != matrix
                    && constant_of(instance, dim).is_some_and(|d| d >= 1.0 && d.fract() == 0.0)
            }
            _ => false,
        }
    }

    fn find_candidate(
        instance: &FunctionInstance,
        declines: &mut Declines,
        changes: &EventLog,
    ) -> Option<(String, Origin)> {
        let index = DefUseIndex::build(&instance.body);
        for (block, _, instruction) in instance.body.instructions() {
            let Some((output, function, inputs)) = any_single_call(instruction) else {
                continue;
            };
            let Some(origin) = Self::origin(instance, function, inputs) else {
                continue;
            };
            if declines.contains(output) || index.is_unused(output) {
                continue;
            }
            if instance.body.is_output(output) {
                declines.record(changes, block, output, "allocation is returned to the caller");
                continue;
            }
            let only_sizes = index
                .users(&instance.body, output)
                .into_iter()
                .all(|user| Self::is_size_query(instance, user, output));
            if !only_sizes {
                declines.record(changes, block, output, "allocation value is read");
                continue;
            }
            return Some((output.to_string(), origin));
        }
        None
    }

    /// Replaces the query at `block`/`index` by a computation from `origin`.
    fn rewrite_query(
        instance: &mut FunctionInstance,
        ctx: &CompilerContext,
        block: usize,
        index: usize,
        origin: &Origin,
    ) -> Result<()> {
        let (mut editor, removed) = BlockEditor::split_at(instance, ctx.registry(), block, index)?;
        let SsaInstruction::TypedCall {
            function,
            outputs,
            inputs,
            ..
        } = removed
        else {
            return Err(malformed_error!("expected a size query"));
        };
        let Some(output) = outputs.first() else {
            return Err(malformed_error!("size query without result"));
        };

        match (origin, function.as_str(), origin.dims()) {
            (Origin::CopyOf(source), _, _) => {
                let mut query: Vec<&str> = inputs.iter().map(String::as_str).collect();
                query[0] = source.as_str();
                editor.add_call_into(&function, &[output.as_str()], &query)?;
            }
            (_, "numel", Some(dims)) => {
                let dims = clamped(&mut editor, &dims)?;
                let Some((first, rest)) = dims.split_first() else {
                    return Err(malformed_error!("allocation without dimensions"));
                };
                let mut current = first.clone();
                for (position, dim) in rest.iter().enumerate() {
                    if position + 1 == rest.len() {
                        editor.add_call_into("times", &[output.as_str()], &[current.as_str(), dim.as_str()])?;
                    } else {
                        current = editor.add_call("partial_result", "times", &[current.as_str(), dim.as_str()])?;
                    }
                }
            }
            (_, _, Some(dims)) => {
                let axis = inputs
                    .get(1)
                    .and_then(|d| editor.instance().types.get(d))
                    .and_then(VarType::integer_constant)
                    .and_then(|d| usize::try_from(d).ok())
                    .and_then(|d| d.checked_sub(1))
                    .ok_or_else(|| malformed_error!("size query without constant dimension"))?;
                match dims.get(axis) {
                    Some(dim) => {
                        for dim in clamped(&mut editor, std::slice::from_ref(dim))? {
                            editor.add_copy(output, &dim)?;
                        }
                    }
                    None => editor.add(SsaInstruction::Assignment {
                        output: output.clone(),
                        value: AssignedValue::Number(1.0),
                    })?,
                }
            }
            (Origin::Dims(_), _, None) => return Err(malformed_error!("allocation without dimensions")),
        }

        editor.finish()?;
        Ok(())
    }

    fn eliminate(
        instance: &mut FunctionInstance,
        ctx: &CompilerContext,
        allocation: &str,
        origin: &Origin,
    ) -> Result<usize> {
        while let Some((block, index)) = first_use(instance, allocation) {
            Self::rewrite_query(instance, ctx, block, index, origin)?;
        }

        let (block, index) = instance
            .body
            .definition(allocation)
            .ok_or_else(|| malformed_error!("allocation {} has no definition", allocation))?;
        if let Some(target) = instance.body.block_mut(block) {
            target.instructions_mut().remove(index);
        }
        Ok(block)
    }
}

impl SsaPass for RedundantAllocationEliminationPass {
    fn name(&self) -> &'static str {
        "redundant-allocation-elimination"
    }

    fn description(&self) -> &'static str {
        "Answers size queries from allocation arguments and removes the allocation"
    }

    fn run_on_function(&self, instance: &mut FunctionInstance, ctx: &CompilerContext) -> Result<bool> {
        let changes = EventLog::new();
        let name = instance.name().to_string();
        let mut declines = Declines::new(self.name(), &name);

        for _ in 0..MAX_ITERATIONS {
            let Some((allocation, origin)) = Self::find_candidate(instance, &mut declines, &changes)
            else {
                break;
            };
            let block = Self::eliminate(instance, ctx, &allocation, &origin)?;
            changes
                .record(EventKind::AllocationRemoved)
                .at(name.as_str(), block)
                .message(allocation);
        }

        Ok(commit(&changes, &ctx.events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{validate, FunctionBuilder, Shape};

    fn fixture(allocation: &str, dims: &[&str], query: &[&str]) -> FunctionInstance {
        FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["n$1", "m$1", "p$1", "y$1"]);
            f.matrix("A$1", Shape::with_rank(2));
            f.matrix("x$1", Shape::unknown());
            f.outputs(&["y$1"]);
            f.block(0, |b| {
                b.argument("n$1", 0);
                b.argument("m$1", 1);
                b.argument("p$1", 2);
                b.argument("A$1", 3);
                b.number("k$1", 2.0);
                b.number("k$2", 3.0);
                b.number("k$3", -2.0);
                b.call(allocation, &["x$1"], dims);
                b.call(query[0], &["y$1"], &query[1..]);
            });
        })
    }

    fn run(instance: &mut FunctionInstance) -> (bool, CompilerContext) {
        let ctx = CompilerContext::with_builtins();
        let changed = RedundantAllocationEliminationPass::new()
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
    fn test_numel_of_square_allocation() {
        let mut instance = fixture("zeros", &["n$1"], &["numel", "x$1"]);
        let (changed, ctx) = run(&mut instance);
        assert!(changed);
        validate(&instance.body).expect("valid");
        assert_eq!(
            definition(&instance, "$dimension$1"),
            Some("$dimension$1 = max n$1, $zero$1".to_string())
        );
        assert_eq!(
            definition(&instance, "y$1"),
            Some("y$1 = times $dimension$1, $dimension$1".to_string())
        );
        assert!(!instance.body.to_string().contains("zeros"));
        assert!(ctx.events.has(EventKind::AllocationRemoved));
    }

    #[test]
    fn test_numel_chains_products() {
        let mut instance = fixture("ones", &["n$1", "m$1", "p$1"], &["numel", "x$1"]);
        assert!(run(&mut instance).0);
        validate(&instance.body).expect("valid");
        assert_eq!(
            definition(&instance, "$partial_result$1"),
            Some("$partial_result$1 = times $dimension$1, $dimension$2".to_string())
        );
        assert_eq!(
            definition(&instance, "y$1"),
            Some("y$1 = times $partial_result$1, $dimension$3".to_string())
        );
        assert_eq!(instance.body.to_string().matches("= 0\n").count(), 1);
    }

    #[test]
    fn test_size_queries_use_dimensions() {
        let mut instance = fixture("zeros", &["n$1", "m$1"], &["size", "x$1", "k$1"]);
        assert!(run(&mut instance).0);
        assert_eq!(definition(&instance, "y$1"), Some("y$1 = $dimension$1".to_string()));
        assert_eq!(
            definition(&instance, "$dimension$1"),
            Some("$dimension$1 = max m$1, $zero$1".to_string())
        );

        let mut instance = fixture("zeros", &["n$1", "m$1"], &["size", "x$1", "k$2"]);
        assert!(run(&mut instance).0);
        assert_eq!(definition(&instance, "y$1"), Some("y$1 = 1".to_string()));
    }

    #[test]
    fn test_known_non_negative_dimensions_used_directly() {
        let mut instance = fixture("zeros", &["k$1", "k$2"], &["numel", "x$1"]);
        assert!(run(&mut instance).0);
        validate(&instance.body).expect("valid");
        assert_eq!(definition(&instance, "y$1"), Some("y$1 = times k$1, k$2".to_string()));
        assert!(!instance.body.to_string().contains("max"));
    }

    #[test]
    fn test_negative_dimension_counts_as_empty() {
        let mut instance = fixture("zeros", &["k$3"], &["numel", "x$1"]);
        assert!(run(&mut instance).0);
        validate(&instance.body).expect("valid");
        assert_eq!(
            definition(&instance, "$dimension$1"),
            Some("$dimension$1 = max k$3, $zero$1".to_string())
        );
        assert_eq!(
            definition(&instance, "y$1"),
            Some("y$1 = times $dimension$1, $dimension$1".to_string())
        );
    }

    #[test]
    fn test_unregistered_allocation_kept() {
        let mut instance = fixture("eye", &["n$1"], &["numel", "x$1"]);
        let before = instance.clone();
        assert!(!run(&mut instance).0);
        assert_eq!(instance, before);
    }

    #[test]
    fn test_matrix_copy_queries_source() {
        let mut instance = fixture("matisse_new_array_from_matrix", &["A$1"], &["numel", "x$1"]);
        assert!(run(&mut instance).0);
        validate(&instance.body).expect("valid");
        assert_eq!(definition(&instance, "y$1"), Some("y$1 = numel A$1".to_string()));
    }

    #[test]
    fn test_read_allocation_kept() {
        let mut instance = fixture("zeros", &["n$1"], &["plus", "x$1", "x$1"]);
        let before = instance.clone();
        let (changed, ctx) = run(&mut instance);
        assert!(!changed);
        assert_eq!(instance, before);
        assert_eq!(ctx.events.count_kind(EventKind::PatternDeclined), 1);
    }
}
