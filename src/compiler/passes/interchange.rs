//! Loop interchange.
//!
//! Matrices are stored column-major, so the innermost loop should walk the first index. A
//! perfect two-level nest whose accesses consistently index the earlier dimension with the
//! outer iteration variable is swapped:
//!
//! ```text
//! for 1, 1, m, #1, #4           for 1, 1, n, #1, #4
//!   i = iter                      j = iter
//!   for 1, 1, n, #2, #3   ==>     for 1, 1, m, #2, #3
//!     j = iter                      i = iter
//!     a = simple_get A(i, j)        a = simple_get A(i, j)
//! ```
//!
//! Pure instructions of the outer body move into the inner body. Loop-carried scalars must be
//! `plus` accumulations and loop-carried matrices may only be updated by element writes that no
//! other instruction of the loop reads, so the new visiting order computes the same values.

use std::collections::{HashMap, HashSet};

use crate::{
    analysis::{
        conventional_loop_variables, BlockId, DefUseIndex, ForLoop, FunctionBody,
        FunctionInstance, LoopVariable, ScalarValueInfo, SsaInstruction,
    },
    compiler::{
        context::CompilerContext,
        events::{EventKind, EventLog},
        pass::SsaPass,
        passes::utils::{commit, iter_variable, Declines},
    },
    Result,
};

/// Maximum number of nests interchanged per run.
const MAX_ITERATIONS: usize = 100;

/// Iteration variable an index is computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Derived {
    Outer,
    Inner,
    Mixed,
}

/// A validated interchange.
#[derive(Debug)]
struct Plan {
    outer: ForLoop,
    inner: ForLoop,
    outer_iter: String,
    inner_iter: String,
}

fn access_indices(instruction: &SsaInstruction) -> Option<&[String]> {
    match instruction {
        SsaInstruction::SimpleGet { indices, .. }
        | SsaInstruction::SimpleSet { indices, .. }
        | SsaInstruction::MatrixGet { indices, .. }
        | SsaInstruction::MatrixSet { indices, .. } => Some(indices.as_slice()),
        _ => None,
    }
}

fn is_movable(instruction: &SsaInstruction) -> bool {
    !instruction.is_phi()
        && !instruction.is_metadata()
        && !instruction.is_terminator()
        && !matches!(instruction, SsaInstruction::Iter { .. })
}

/// Swaps a two-level nest so the inner loop walks the faster varying dimension.
pub struct LoopInterchangePass;

impl Default for LoopInterchangePass {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopInterchangePass {
    /// Creates a new loop interchange pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Recognizes a perfect nest: the outer body ends with the inner `for`, whose body is a
    /// single flat block and whose after-loop block is the end of the outer body.
    fn nest(body: &FunctionBody, container: BlockId) -> Option<(ForLoop, ForLoop)> {
        let outer = ForLoop::at(body, container)?;
        let inner = ForLoop::at(body, outer.loop_block)?;
        let flat = body
            .block(inner.loop_block)
            .is_some_and(|b| b.ending_instruction().is_none());
        (flat && inner.is_single_block() && outer.body_end == inner.end_block).then_some((outer, inner))
    }

    /// Returns `true` if the accesses of the nest ask for an interchange, `false` if they are
    /// already in order or say nothing.
    fn wants_interchange(
        body: &FunctionBody,
        outer: &ForLoop,
        inner: &ForLoop,
        outer_iter: &str,
        inner_iter: &str,
    ) -> std::result::Result<bool, &'static str> {
        let mut derived: HashMap<String, Derived> = HashMap::new();
        derived.insert(outer_iter.to_string(), Derived::Outer);
        derived.insert(inner_iter.to_string(), Derived::Inner);

        let instructions = [outer.loop_block, inner.loop_block]
            .into_iter()
            .filter_map(|id| body.block(id))
            .flat_map(|block| block.instructions());

        let (mut swap, mut keep) = (false, false);
        for instruction in instructions {
            if let Some(indices) = access_indices(instruction) {
                if indices.len() >= 2 {
                    let (mut outer_at, mut inner_at) = (None, None);
                    for (position, index) in indices.iter().enumerate() {
                        match derived.get(index) {
                            Some(Derived::Mixed) => {
                                return Err("an index depends on both iteration variables")
                            }
                            Some(Derived::Outer) => {
                                outer_at.get_or_insert(position);
                            }
                            Some(Derived::Inner) => {
                                inner_at.get_or_insert(position);
                            }
                            None => {}
                        }
                    }
                    if let (Some(o), Some(i)) = (outer_at, inner_at) {
                        if o < i {
                            swap = true;
                        } else {
                            keep = true;
                        }
                    }
                }
            }

            let mut origin = None;
            for source in instruction.inputs().into_iter().filter_map(|input| derived.get(input)) {
                origin = match origin {
                    None => Some(*source),
                    Some(current) if current == *source => Some(current),
                    Some(_) => Some(Derived::Mixed),
                };
            }
            let Some(origin) = origin else {
                continue;
            };
            for output in instruction.outputs() {
                derived.insert(output.to_string(), origin);
            }
        }

        if swap && keep {
            return Err("accesses disagree on the preferred loop order");
        }
        Ok(swap)
    }

    /// Checks that `variable` of the inner loop is carried in an order-independent way.
    ///
    /// A carried matrix must be threaded through a chain of element writes that nothing else
    /// in the loop reads, otherwise an iteration could observe a write of a later one.
    fn is_reorderable(
        instance: &FunctionInstance,
        index: &DefUseIndex,
        inner: &ForLoop,
        variable: &LoopVariable,
    ) -> bool {
        let body = &instance.body;
        let in_body = |name: &str| {
            body.definition(name)
                .is_some_and(|(block, _)| block == inner.loop_block)
        };
        let readers = |name: &str| -> Vec<&SsaInstruction> {
            index
                .users(body, name)
                .into_iter()
                .filter(|user| !user.is_phi())
                .collect()
        };
        let length = body.block(inner.loop_block).map_or(0, |b| b.len());
        match instance.types.get(&variable.loop_start) {
            Some(ty) if ty.is_matrix() => {
                if !readers(&variable.loop_end).is_empty() {
                    return false;
                }
                let mut current = variable.loop_end.as_str();
                for _ in 0..=length {
                    if current == variable.loop_start {
                        return true;
                    }
                    if !in_body(current) {
                        return false;
                    }
                    let Some(set) = body.defining_instruction(current) else {
                        return false;
                    };
                    let base = match set {
                        SsaInstruction::SimpleSet { base, .. } | SsaInstruction::MatrixSet { base, .. } => {
                            base.as_str()
                        }
                        _ => return false,
                    };
                    let only_as_base = set.inputs().into_iter().filter(|input| *input == base).count() == 1;
                    let users = readers(base);
                    if !only_as_base || users.len() != 1 || !std::ptr::eq(users[0], set) {
                        return false;
                    }
                    current = base;
                }
                false
            }
            Some(_) => {
                let uses = body
                    .block(inner.loop_block)
                    .map_or(0, |b| b.instructions().iter().filter(|i| i.uses(&variable.loop_start)).count());
                let accumulates = matches!(
                    body.defining_instruction(&variable.loop_end),
                    Some(SsaInstruction::TypedCall { function, inputs, .. })
                        if function == "plus"
                            && inputs.len() == 2
                            && inputs.iter().filter(|i| **i == variable.loop_start).count() == 1
                );
                in_body(&variable.loop_end) && accumulates && uses == 1
            }
            None => false,
        }
    }

    fn plan(
        instance: &FunctionInstance,
        info: &ScalarValueInfo<'_>,
        outer: ForLoop,
        inner: ForLoop,
    ) -> std::result::Result<Option<Plan>, &'static str> {
        let body = &instance.body;
        let (Some(outer_iter), Some(inner_iter)) = (
            iter_variable(body, outer.loop_block)?,
            iter_variable(body, inner.loop_block)?,
        ) else {
            return Ok(None);
        };
        if !Self::wants_interchange(body, &outer, &inner, &outer_iter, &inner_iter)? {
            return Ok(None);
        }

        let positive = |interval: &str| info.constant(interval).is_some_and(|v| v > 0.0 && v.fract() == 0.0);
        if !positive(&outer.interval) || !positive(&inner.interval) {
            return Err("loop intervals must be known positive constants");
        }

        let nest = [outer.loop_block, inner.loop_block, inner.end_block];
        let inside = |name: &str| body.definition(name).is_some_and(|(block, _)| nest.contains(&block));
        if [&inner.start, &inner.interval, &inner.end]
            .iter()
            .any(|bound| inside(bound.as_str()))
        {
            return Err("inner loop range depends on the outer loop body");
        }

        let after_inner = body.block(inner.end_block).ok_or("inner after-loop block does not exist")?;
        if after_inner.instructions().iter().any(|i| !i.is_phi() && !i.is_metadata()) {
            return Err("inner after-loop block holds more than phis");
        }

        let outer_block = body.block(outer.loop_block).ok_or("outer loop body does not exist")?;
        let carried: HashSet<&str> = outer_block.phis().filter_map(SsaInstruction::output).collect();
        let index = DefUseIndex::build(body);
        for instruction in outer_block.instructions().iter().filter(|i| is_movable(i)) {
            if instruction.has_side_effects() {
                return Err("outer loop body has side effects");
            }
            if instruction.inputs().iter().any(|input| carried.contains(input)) {
                return Err("outer loop body reads a loop-carried value");
            }
            let escapes = instruction.outputs().into_iter().any(|output| {
                body.is_output(output)
                    || index
                        .uses_of(output)
                        .iter()
                        .any(|use_site| use_site.block != outer.loop_block && use_site.block != inner.loop_block)
            });
            if escapes {
                return Err("outer loop body value is used outside the inner loop");
            }
        }

        let (Some(outer_vars), Some(inner_vars)) = (
            conventional_loop_variables(body, &outer),
            conventional_loop_variables(body, &inner),
        ) else {
            return Err("loop-carried variables are not in the expected form");
        };
        if outer_vars.len() != inner_vars.len() {
            return Err("outer and inner loops carry different variables");
        }
        for outer_var in &outer_vars {
            let matching = inner_vars.iter().find(|v| {
                v.before_loop == outer_var.loop_start
                    && v.after_loop.as_deref() == Some(outer_var.loop_end.as_str())
            });
            let Some(inner_var) = matching else {
                return Err("outer and inner loops carry different variables");
            };
            if !Self::is_reorderable(instance, &index, &inner, inner_var) {
                return Err("loop-carried value depends on the iteration order");
            }
        }

        Ok(Some(Plan {
            outer,
            inner,
            outer_iter,
            inner_iter,
        }))
    }

    fn find_candidate(
        instance: &FunctionInstance,
        declines: &mut Declines,
        changes: &EventLog,
    ) -> Option<Plan> {
        let info = ScalarValueInfo::new(instance);
        for block in 0..instance.body.block_count() {
            let Some((outer, inner)) = Self::nest(&instance.body, block) else {
                continue;
            };
            let key = format!("nest #{}", outer.loop_block);
            if declines.contains(&key) {
                continue;
            }
            match Self::plan(instance, &info, outer, inner) {
                Ok(Some(plan)) => return Some(plan),
                Ok(None) => {}
                Err(reason) => declines.record(changes, block, &key, reason),
            }
        }
        None
    }

    fn set_range(body: &mut FunctionBody, container: BlockId, range: &ForLoop) -> Result<()> {
        let block = body
            .block_mut(container)
            .ok_or_else(|| malformed_error!("block #{} does not exist", container))?;
        match block.instructions_mut().last_mut() {
            Some(SsaInstruction::For {
                start,
                interval,
                end,
                ..
            }) => {
                start.clone_from(&range.start);
                interval.clone_from(&range.interval);
                end.clone_from(&range.end);
                Ok(())
            }
            _ => Err(malformed_error!("block #{} does not end with a for", container)),
        }
    }

    fn interchange(instance: &mut FunctionInstance, plan: &Plan) -> Result<()> {
        let Plan {
            outer,
            inner,
            outer_iter,
            inner_iter,
        } = plan;
        let body = &mut instance.body;
        Self::set_range(body, outer.container, inner)?;
        Self::set_range(body, inner.container, outer)?;

        let outer_block = body
            .block_mut(outer.loop_block)
            .ok_or_else(|| malformed_error!("block #{} does not exist", outer.loop_block))?;
        let mut kept = Vec::new();
        let mut moved = Vec::new();
        for instruction in outer_block.take_instructions() {
            match instruction {
                SsaInstruction::Iter { .. } => kept.push(SsaInstruction::Iter {
                    output: inner_iter.clone(),
                }),
                other if is_movable(&other) => moved.push(other),
                other => kept.push(other),
            }
        }
        outer_block.set_instructions(kept);

        let inner_block = body
            .block_mut(inner.loop_block)
            .ok_or_else(|| malformed_error!("block #{} does not exist", inner.loop_block))?;
        let mut rewritten = Vec::new();
        for instruction in inner_block.take_instructions() {
            if let SsaInstruction::Iter { .. } = instruction {
                rewritten.push(SsaInstruction::Iter {
                    output: outer_iter.clone(),
                });
                rewritten.append(&mut moved);
            } else {
                rewritten.push(instruction);
            }
        }
        inner_block.set_instructions(rewritten);
        Ok(())
    }
}

impl SsaPass for LoopInterchangePass {
    fn name(&self) -> &'static str {
        "loop-interchange"
    }

    fn description(&self) -> &'static str {
        "Swaps two-level loop nests so the inner loop walks the first matrix dimension"
    }

    fn run_on_function(&self, instance: &mut FunctionInstance, ctx: &CompilerContext) -> Result<bool> {
        let changes = EventLog::new();
        let name = instance.name().to_string();
        let mut declines = Declines::new(self.name(), &name);

        for _ in 0..MAX_ITERATIONS {
            let Some(plan) = Self::find_candidate(instance, &mut declines, &changes) else {
                break;
            };
            Self::interchange(instance, &plan)?;
            changes
                .record(EventKind::LoopsInterchanged)
                .at(name.as_str(), plan.outer.container)
                .message(format!("{} <-> {}", plan.outer_iter, plan.inner_iter));
        }

        Ok(commit(&changes, &ctx.events))
    }
}
