//! Allocation value elimination.
//!
//! `zeros` and `ones` initialize every element. When a loop overwrites every element before
//! anything reads the matrix, the initialization is wasted and the allocation becomes an
//! uninitialized `matisse_new_array_from_dims`:
//!
//! ```text
//! X0 = zeros n, m                             X0 = matisse_new_array_from_dims n, m
//! for 1, 1, size(X0, 1):                      ...
//!     for 1, 1, m:                  ==>
//!         X = simple_set X(i, j) = v
//! ```
//!
//! The loop nest must start at 1 with step 1, write through `simple_set` indexed by the
//! iteration variables, and cover each dimension: the loop driving index `k` ends at
//! `size(X, k)`, and the loop driving the last index ends at the product of the remaining
//! sizes. Size queries may read the allocation anywhere.

use std::collections::{HashMap, HashSet};

use crate::{
    analysis::{
        conventional_loop_variables, AssignedValue, DefUseIndex, ForLoop, FunctionInstance,
        LoopVariable, ScalarValueInfo, SsaInstruction, VarType,
    },
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

/// Allocations whose fill can be dropped.
const FILLING_ALLOCATIONS: &[&str] = &["zeros", "ones"];

/// Calls that read the shape of a matrix but never its elements.
const SIZE_QUERIES: &[&str] = &["numel", "size", "ndims", "length"];

/// A `zeros`/`ones` call that may lose its fill.
struct Allocation {
    block: usize,
    index: usize,
    inputs: Vec<String>,
}

/// Read-only view answering whether a loop nest fills a matrix completely.
struct Coverage<'a> {
    instance: &'a FunctionInstance,
    index: DefUseIndex,
    info: ScalarValueInfo<'a>,
    aliases: HashMap<&'a str, &'a str>,
}

impl<'a> Coverage<'a> {
    fn new(instance: &'a FunctionInstance) -> Self {
        let mut aliases = HashMap::new();
        for (_, _, instruction) in instance.body.instructions() {
            if let SsaInstruction::Assignment {
                output,
                value: AssignedValue::Variable(source),
            } = instruction
            {
                aliases.insert(output.as_str(), source.as_str());
            }
        }
        Self {
            instance,
            index: DefUseIndex::build(&instance.body),
            info: ScalarValueInfo::new(instance),
            aliases,
        }
    }

    fn is_size_query(instruction: &SsaInstruction) -> bool {
        any_single_call(instruction).is_some_and(|(_, function, _)| SIZE_QUERIES.contains(&function))
    }

    /// Number of uses of `variable` that are not size queries.
    fn value_uses(&self, variable: &str) -> usize {
        self.index
            .users(&self.instance.body, variable)
            .into_iter()
            .filter(|user| !Self::is_size_query(user))
            .count()
    }

    fn phi_uses(&self, variable: &str) -> usize {
        self.index
            .users(&self.instance.body, variable)
            .into_iter()
            .filter(|user| user.is_phi())
            .count()
    }

    fn is_one(&self, variable: &str) -> bool {
        self.info.constant(variable) == Some(1.0)
    }

    fn is_unit_loop(&self, for_loop: &ForLoop) -> bool {
        self.is_one(&for_loop.start) && self.is_one(&for_loop.interval)
    }

    fn loop_iter(&self, loop_block: usize) -> Option<&'a str> {
        self.instance
            .body
            .block(loop_block)?
            .instructions()
            .iter()
            .find_map(|instruction| match instruction {
                SsaInstruction::Iter { output } => Some(output.as_str()),
                _ => None,
            })
    }

    fn unaliased<'b>(&'b self, variable: &'b str) -> &'b str {
        self.aliases.get(variable).copied().unwrap_or(variable)
    }

    /// Checks that `variable` is completely overwritten by the loop nest whose iteration
    /// variables and bounds, outermost first, are `iters` and `ends`.
    fn fills(
        &self,
        variable: &LoopVariable,
        mut iters: Vec<&'a str>,
        mut ends: Vec<String>,
    ) -> std::result::Result<(), &'static str> {
        if self.value_uses(&variable.loop_end) != 2 {
            return Err("updated matrix escapes the loop");
        }
        let body = &self.instance.body;
        match self.index.def_instruction(body, &variable.loop_end) {
            Some(SsaInstruction::SimpleSet { base, indices, .. }) => {
                if self.value_uses(&variable.loop_start) != 1 {
                    return Err("matrix is read inside the loop");
                }
                if *base != variable.loop_start {
                    return Err("write does not update the loop-carried matrix");
                }
                let mut used = HashSet::new();
                for (axis, index) in indices.iter().enumerate() {
                    let iter = self.unaliased(index);
                    let Some(position) = iters.iter().position(|i| *i == iter) else {
                        return Err("write index is not an iteration variable");
                    };
                    if !used.insert(position) {
                        return Err("iteration variable indexes twice");
                    }
                    let end = &ends[position];
                    let covered = if axis + 1 == indices.len() {
                        self.info.is_size_from_of(end, &variable.loop_start, axis)
                    } else {
                        self.info.is_size_of(end, &variable.loop_start, axis)
                    };
                    if !covered {
                        return Err("loop bound does not match the matrix size");
                    }
                }
                Ok(())
            }
            Some(SsaInstruction::Phi { sources, .. }) => {
                if self.value_uses(&variable.loop_start) != 2 || sources.len() != 2 {
                    return Err("matrix is read inside the loop");
                }
                let Some(source) = sources.iter().find(|s| s.variable == variable.loop_start) else {
                    return Err("after-loop value does not come from the loop start value");
                };
                let Some(nested) = ForLoop::at(body, source.block) else {
                    return Err("matrix is not built by a nested loop");
                };
                if !self.is_unit_loop(&nested) {
                    return Err("nested loop does not start at 1 with step 1");
                }
                let Some(iter) = self.loop_iter(nested.loop_block) else {
                    return Err("nested loop has no iteration variable");
                };
                let inner = conventional_loop_variables(body, &nested)
                    .and_then(|variables| {
                        variables.into_iter().find(|v| {
                            v.after_loop.as_deref() == Some(variable.loop_end.as_str())
                                && v.before_loop == variable.loop_start
                        })
                    })
                    .ok_or("nested loop variable not in conventional form")?;
                iters.push(iter);
                ends.push(nested.end.clone());
                self.fills(&inner, iters, ends)
            }
            _ => Err("matrix is not built by element writes"),
        }
    }
}

/// Replaces `zeros`/`ones` by uninitialized allocations when a loop overwrites every element.
pub struct AllocationValueEliminationPass;

impl Default for AllocationValueEliminationPass {
    fn default() -> Self {
        Self::new()
    }
}

impl AllocationValueEliminationPass {
    /// Creates a new allocation value elimination pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Collects fill allocations read only by size queries and exactly two phis.
    fn allocations(instance: &FunctionInstance, coverage: &Coverage<'_>) -> HashMap<String, Allocation> {
        let mut allocations = HashMap::new();
        for (block, index, instruction) in instance.body.instructions() {
            let Some((output, function, inputs)) = any_single_call(instruction) else {
                continue;
            };
            if !FILLING_ALLOCATIONS.contains(&function) {
                continue;
            }
            let phis = coverage.phi_uses(output);
            if phis == 2 && coverage.value_uses(output) == phis {
                allocations.insert(
                    output.to_string(),
                    Allocation {
                        block,
                        index,
                        inputs: inputs.to_vec(),
                    },
                );
            }
        }
        allocations
    }

    /// Returns the uninitialized allocation replacing a fill allocation.
    fn replacement(instance: &FunctionInstance, inputs: &[String]) -> Option<(&'static str, Vec<String>)> {
        let is = |variable: &String, check: fn(&VarType) -> bool| instance.types.get(variable).is_some_and(check);
        match inputs {
            [only] if is(only, VarType::is_matrix) => Some(("matisse_new_array", inputs.to_vec())),
            [only] if is(only, VarType::is_scalar) => {
                Some(("matisse_new_array_from_dims", vec![only.clone(), only.clone()]))
            }
            [_, _, ..] if inputs.iter().all(|i| is(i, VarType::is_scalar)) => {
                Some(("matisse_new_array_from_dims", inputs.to_vec()))
            }
            _ => None,
        }
    }

    fn find_candidate(
        instance: &FunctionInstance,
        declines: &mut Declines,
        changes: &EventLog,
    ) -> Option<(usize, usize, &'static str, Vec<String>)> {
        let coverage = Coverage::new(instance);
        let allocations = Self::allocations(instance, &coverage);
        if allocations.is_empty() {
            return None;
        }

        for container in 0..instance.body.block_count() {
            let Some(for_loop) = ForLoop::at(&instance.body, container) else {
                continue;
            };
            if !coverage.is_unit_loop(&for_loop) {
                continue;
            }
            let Some(iter) = coverage.loop_iter(for_loop.loop_block) else {
                continue;
            };
            let Some(variables) = conventional_loop_variables(&instance.body, &for_loop) else {
                continue;
            };

            for variable in variables.iter().filter(|v| v.after_loop.is_some()) {
                let Some(allocation) = allocations.get(&variable.before_loop) else {
                    continue;
                };
                let key = variable.before_loop.as_str();
                if declines.contains(key) {
                    continue;
                }
                if let Err(reason) = coverage.fills(variable, vec![iter], vec![for_loop.end.clone()]) {
                    declines.record(changes, allocation.block, key, reason);
                    continue;
                }
                let Some((function, inputs)) = Self::replacement(instance, &allocation.inputs) else {
                    declines.record(changes, allocation.block, key, "allocation arguments are not dimensions");
                    continue;
                };
                return Some((allocation.block, allocation.index, function, inputs));
            }
        }
        None
    }

    fn rewrite(
        instance: &mut FunctionInstance,
        ctx: &CompilerContext,
        block: usize,
        index: usize,
        function: &str,
        inputs: &[String],
    ) -> Result<String> {
        let (mut editor, removed) = BlockEditor::split_at(instance, ctx.registry(), block, index)?;
        let outputs = removed.outputs();
        let inputs: Vec<&str> = inputs.iter().map(String::as_str).collect();
        editor.add_call_into(function, &outputs, &inputs)?;
        editor.finish()?;
        Ok(format!("{removed} -> {function}"))
    }
}

impl SsaPass for AllocationValueEliminationPass {
    fn name(&self) -> &'static str {
        "allocation-value-elimination"
    }

    fn description(&self) -> &'static str {
        "Drops the fill of allocations a loop overwrites completely"
    }

    fn run_on_function(&self, instance: &mut FunctionInstance, ctx: &CompilerContext) -> Result<bool> {
        let changes = EventLog::new();
        let name = instance.name().to_string();
        let mut declines = Declines::new(self.name(), &name);

        for _ in 0..MAX_ITERATIONS {
            let Some((block, index, function, inputs)) =
                Self::find_candidate(instance, &mut declines, &changes)
            else {
                break;
            };
            let message = Self::rewrite(instance, ctx, block, index, function, &inputs)?;
            changes
                .record(EventKind::AllocationSimplified)
                .at(name.as_str(), block)
                .message(message);
        }

        Ok(commit(&changes, &ctx.events))
    }
}
