//! Allocation simplification.
//!
//! Allocations shaped after another allocation (`zeros(size(X))`, `matisse_new_array(size(X))`,
//! `matisse_new_array_from_matrix(X)`) are rewritten to reuse the arguments `X` was allocated
//! with, so later passes see the dimensions directly:
//!
//! ```text
//! X = zeros n, m                       X = zeros n, m
//! s = size X             ==>           s = size X
//! Y = ones s                           Y = ones n, m
//! ```

use std::collections::HashMap;

use crate::{
    analysis::{FunctionInstance, VarType},
    compiler::{
        context::CompilerContext,
        editor::BlockEditor,
        events::{EventKind, EventLog},
        pass::SsaPass,
        passes::utils::{any_single_call, commit, Declines},
    },
    Result,
};

/// Maximum number of allocations rewritten per run.
const MAX_ITERATIONS: usize = 100;

/// Allocation functions taking dimensions (or one size vector) as arguments.
const DIMENSION_ALLOCATIONS: &[&str] = &["zeros", "ones", "matisse_new_array_from_dims"];

/// A call an allocation is rewritten to.
#[derive(Debug, Clone, PartialEq)]
struct Rewrite {
    function: &'static str,
    inputs: Vec<String>,
}

/// Reuses the arguments of the allocation a size came from.
pub struct AllocationSimplifierPass;

impl Default for AllocationSimplifierPass {
    fn default() -> Self {
        Self::new()
    }
}

impl AllocationSimplifierPass {
    /// Creates a new allocation simplifier pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn is_allocation(function: &str, inputs: &[String]) -> bool {
        DIMENSION_ALLOCATIONS.contains(&function)
            || function == "matisse_new_array"
            || (function == "matisse_new_array_from_matrix" && inputs.len() == 1)
    }

    /// Builds the call replacing an allocation shaped after `origin`.
    fn shaped_after(
        instance: &FunctionInstance,
        origin_function: &str,
        origin_inputs: &[String],
    ) -> Option<Rewrite> {
        let inputs = origin_inputs.to_vec();
        if origin_function == "matisse_new_array_from_matrix" {
            return Some(Rewrite {
                function: "matisse_new_array_from_matrix",
                inputs,
            });
        }
        let single_matrix = matches!(origin_inputs, [only] if instance.types.get(only).is_some_and(VarType::is_matrix));
        if origin_function == "matisse_new_array" || (DIMENSION_ALLOCATIONS.contains(&origin_function) && single_matrix) {
            return Some(Rewrite {
                function: "matisse_new_array",
                inputs,
            });
        }
        if DIMENSION_ALLOCATIONS.contains(&origin_function) {
            return Some(Rewrite {
                function: "matisse_new_array_from_dims",
                inputs,
            });
        }
        None
    }

    fn find_candidate(
        instance: &FunctionInstance,
        declines: &mut Declines,
        changes: &EventLog,
    ) -> Option<(usize, usize, Rewrite)> {
        let mut sizes: HashMap<&str, &str> = HashMap::new();
        let mut allocations: HashMap<&str, (&str, &[String])> = HashMap::new();
        for (_, _, instruction) in instance.body.instructions() {
            let Some((output, function, inputs)) = any_single_call(instruction) else {
                continue;
            };
            if function == "size" {
                if let [matrix] = inputs {
                    sizes.insert(output, matrix.as_str());
                }
            } else if Self::is_allocation(function, inputs) {
                allocations.insert(output, (function, inputs));
            }
        }

        for (block, index, instruction) in instance.body.instructions() {
            let Some((output, function, inputs)) = any_single_call(instruction) else {
                continue;
            };
            let [input] = inputs else {
                continue;
            };
            if declines.contains(output) {
                continue;
            }

            let rewrite = if DIMENSION_ALLOCATIONS.contains(&function) {
                let Some(&(origin, origin_inputs)) = sizes
                    .get(input.as_str())
                    .and_then(|matrix| allocations.get(matrix))
                else {
                    continue;
                };
                if origin == "matisse_new_array_from_matrix" {
                    declines.record(changes, block, output, "size source is a copy of another matrix");
                    continue;
                }
                Rewrite {
                    function: DIMENSION_ALLOCATIONS
                        .iter()
                        .copied()
                        .find(|f| *f == function)?,
                    inputs: origin_inputs.to_vec(),
                }
            } else if function == "matisse_new_array" || function == "matisse_new_array_from_matrix" {
                let source = if function == "matisse_new_array" {
                    sizes.get(input.as_str()).copied()
                } else {
                    Some(input.as_str())
                };
                let Some(&(origin, origin_inputs)) = source.and_then(|m| allocations.get(m)) else {
                    continue;
                };
                let Some(rewrite) = Self::shaped_after(instance, origin, origin_inputs) else {
                    declines.record(changes, block, output, "source allocation has no reusable arguments");
                    continue;
                };
                rewrite
            } else {
                continue;
            };

            if rewrite.function == function && rewrite.inputs == inputs {
                continue;
            }
            return Some((block, index, rewrite));
        }
        None
    }

    fn rewrite(
        instance: &mut FunctionInstance,
        ctx: &CompilerContext,
        block: usize,
        index: usize,
        rewrite: &Rewrite,
    ) -> Result<String> {
        let (mut editor, removed) = BlockEditor::split_at(instance, ctx.registry(), block, index)?;
        let outputs: Vec<&str> = removed.outputs();
        let inputs: Vec<&str> = rewrite.inputs.iter().map(String::as_str).collect();
        editor.add_call_into(rewrite.function, &outputs, &inputs)?;
        editor.finish()?;
        Ok(format!("{removed} -> {} {}", rewrite.function, inputs.join(", ")))
    }
}

impl SsaPass for AllocationSimplifierPass {
    fn name(&self) -> &'static str {
        "allocation-simplifier"
    }

    fn description(&self) -> &'static str {
        "Reuses the arguments of the allocation a size vector came from"
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
            let message = Self::rewrite(instance, ctx, block, index, &rewrite)?;
            changes
                .record(EventKind::AllocationSimplified)
                .at(name.as_str(), block)
                .message(message);
        }

        Ok(commit(&changes, &ctx.events))
    }
}
