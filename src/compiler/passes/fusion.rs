//! Loop fusion.
//!
//! Two consecutive loops over the same range are merged into one when the second loop only
//! reads what the first built element by element:
//!
//! ```text
//! block #S: for 1, 1, n, #L1, #M          block #S: for 1, 1, n, #L1, #E
//! block #L1: X2 = simple_set X1(i) = v    block #L1: X2 = simple_set X1(i) = v
//! block #M: X3 = phi #S:X0, #L1:X2   ==>             b = simple_get X2(i)
//!           for 1, 1, n, #L2, #E          block #E: X3 = phi #S:X0, #L1:X2
//! block #L2: b = simple_get X3(j)
//! ```
//!
//! Instructions of `M` that do not depend on the first loop move before the fused loop; the
//! others move after it and may not be read by the second loop.

use std::collections::{HashMap, HashSet};

use crate::{
    analysis::{
        has_side_effects, BlockId, ForLoop, FunctionBody, FunctionInstance, ScalarValueInfo,
        SsaInstruction,
    },
    compiler::{
        context::CompilerContext,
        events::{EventKind, EventLog},
        pass::SsaPass,
        passes::utils::{commit, iter_variable, Declines},
    },
    Result,
};

/// Maximum number of loop pairs fused per run.
const MAX_ITERATIONS: usize = 100;

/// Calls that only look at the shape of a matrix.
const SHAPE_QUERIES: &[&str] = &["numel", "size", "matisse_new_array_from_matrix"];

/// Where an instruction of the block between the loops ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Before,
    After,
    Dropped,
}

/// A validated fusion.
#[derive(Debug)]
struct Plan {
    first: ForLoop,
    second: ForLoop,
    placements: Vec<Placement>,
    /// Matrix after the first loop -> last matrix written inside it
    built: HashMap<String, String>,
    /// Matrix after the first loop -> matrix before it
    sources: HashMap<String, String>,
    first_iter: Option<String>,
    second_iter: Option<String>,
}

fn phi_source<'a>(phi: &'a SsaInstruction, block: BlockId) -> Option<&'a str> {
    match phi {
        SsaInstruction::Phi { sources, .. } => sources
            .iter()
            .find(|s| s.block == block)
            .map(|s| s.variable.as_str()),
        _ => None,
    }
}

/// Merges adjacent loops with equal ranges.
pub struct LoopFusionPass;

impl Default for LoopFusionPass {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopFusionPass {
    /// Creates a new loop fusion pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Matrices written at the iteration index by the first loop: written value -> matrix
    /// the loop started from.
    ///
    /// Only a loop-carried matrix whose back-edge value is the write itself counts, so the
    /// written value is the one the next iteration and the after-loop block see.
    fn built_matrices(
        instance: &FunctionInstance,
        first: &ForLoop,
        iter: Option<&str>,
    ) -> HashMap<String, String> {
        let mut built = HashMap::new();
        let (Some(iter), Some(block)) = (iter, instance.body.block(first.loop_block)) else {
            return built;
        };

        let matrix_phis = block
            .phis()
            .filter(|phi| phi.output().and_then(|o| instance.types.get(o)).is_some_and(|t| t.is_matrix()));
        for phi in matrix_phis {
            let (Some(output), Some(source), Some(back)) = (
                phi.output(),
                phi_source(phi, first.container),
                phi_source(phi, first.body_end),
            ) else {
                continue;
            };
            let written_here = instance
                .body
                .definition(back)
                .is_some_and(|(defined_in, _)| defined_in == first.loop_block);
            if !written_here {
                continue;
            }
            if let Some(SsaInstruction::SimpleSet { base, indices, .. }) = instance.body.defining_instruction(back) {
                if base == output && matches!(indices.as_slice(), [index] if index == iter) {
                    built.insert(back.to_string(), source.to_string());
                }
            }
        }
        built
    }

    fn plan(
        instance: &FunctionInstance,
        info: &ScalarValueInfo<'_>,
        first: ForLoop,
        second: ForLoop,
    ) -> std::result::Result<Plan, &'static str> {
        let body = &instance.body;
        let flat = |block: BlockId| body.block(block).is_some_and(|b| b.ending_instruction().is_none());
        if !flat(first.loop_block) || !flat(second.loop_block) {
            return Err("loop bodies must be single blocks without nested control flow");
        }
        if !info.are_same_value(&first.start, &second.start)
            || !info.are_same_value(&first.interval, &second.interval)
            || !info.are_same_value(&first.end, &second.end)
        {
            return Err("loop ranges cannot be proven equal");
        }

        let middle = body
            .block(first.end_block)
            .ok_or("block between the loops does not exist")?;
        if middle.instructions().iter().any(SsaInstruction::has_side_effects) {
            return Err("instructions between the loops have side effects");
        }
        if has_side_effects(body, &[first.loop_block]) && has_side_effects(body, &[second.loop_block]) {
            return Err("both loops have side effects");
        }

        let first_iter = iter_variable(body, first.loop_block)?;
        let second_iter = iter_variable(body, second.loop_block)?;
        let written = Self::built_matrices(instance, &first, first_iter.as_deref());

        let mut built = HashMap::new();
        let mut sources = HashMap::new();
        let mut tainted: HashSet<String> = HashSet::new();
        let mut placements = Vec::new();
        for instruction in middle.instructions() {
            if instruction.is_terminator() {
                placements.push(Placement::Dropped);
                continue;
            }
            if let SsaInstruction::Phi { output, .. } = instruction {
                placements.push(Placement::After);
                let start = phi_source(instruction, first.container);
                let end = phi_source(instruction, first.loop_block);
                match (start, end) {
                    (Some(start), Some(end)) if written.get(end).is_some_and(|s| s == start) => {
                        built.insert(output.clone(), end.to_string());
                        sources.insert(output.clone(), start.to_string());
                    }
                    _ => {
                        tainted.insert(output.clone());
                    }
                }
                continue;
            }

            let shape_query = matches!(
                instruction,
                SsaInstruction::TypedCall { function, .. } if SHAPE_QUERIES.contains(&function.as_str())
            );
            let depends = instruction
                .inputs()
                .into_iter()
                .any(|input| tainted.contains(input) || (!shape_query && built.contains_key(input)));
            if depends {
                tainted.extend(instruction.outputs().into_iter().map(ToString::to_string));
                placements.push(Placement::After);
            } else {
                placements.push(Placement::Before);
            }
        }

        if [&second.start, &second.interval, &second.end]
            .iter()
            .any(|bound| tainted.contains(bound.as_str()))
        {
            return Err("second loop range depends on the first loop");
        }

        let second_body = body
            .block(second.loop_block)
            .ok_or("second loop body does not exist")?;
        for instruction in second_body.instructions() {
            let inputs = instruction.inputs();
            if inputs.iter().any(|input| tainted.contains(*input)) {
                return Err("second loop reads results of the first loop");
            }
            match instruction {
                SsaInstruction::SimpleGet { base, indices, .. } if built.contains_key(base) => {
                    let at_iteration = matches!(
                        (indices.as_slice(), second_iter.as_deref()),
                        ([index], Some(iter)) if index == iter
                    );
                    if !at_iteration {
                        return Err("built matrix is read away from the iteration index");
                    }
                }
                _ => {
                    if inputs.iter().any(|input| built.contains_key(*input)) {
                        return Err("built matrix is read outside of an element access");
                    }
                }
            }
        }

        let after = body
            .block(second.end_block)
            .ok_or("block after the loops does not exist")?;
        for phi in after.phis() {
            if let Some(source) = phi_source(phi, first.end_block) {
                if tainted.contains(source) || built.contains_key(source) {
                    return Err("value after the loops depends on the first loop");
                }
            }
        }

        Ok(Plan {
            first,
            second,
            placements,
            built,
            sources,
            first_iter,
            second_iter,
        })
    }

    fn find_candidate(
        instance: &FunctionInstance,
        declines: &mut Declines,
        changes: &EventLog,
    ) -> Option<Plan> {
        let info = ScalarValueInfo::new(instance);
        for block in 0..instance.body.block_count() {
            let Some(first) = ForLoop::at(&instance.body, block) else {
                continue;
            };
            let Some(second) = ForLoop::at(&instance.body, first.end_block) else {
                continue;
            };
            let key = format!("loops #{}, #{}", first.loop_block, second.loop_block);
            if declines.contains(&key) {
                continue;
            }
            match Self::plan(instance, &info, first, second) {
                Ok(plan) => return Some(plan),
                Err(reason) => declines.record(changes, block, &key, reason),
            }
        }
        None
    }

    fn take_block(body: &mut FunctionBody, block: BlockId) -> Result<Vec<SsaInstruction>> {
        body.block_mut(block)
            .map(|b| b.take_instructions())
            .ok_or_else(|| malformed_error!("block #{} does not exist", block))
    }

    fn fuse(instance: &mut FunctionInstance, plan: Plan) -> Result<()> {
        let Plan {
            first,
            second,
            placements,
            built,
            sources,
            first_iter,
            second_iter,
        } = plan;
        let body = &mut instance.body;
        let (container, middle, first_body) = (first.container, first.end_block, first.loop_block);
        let (second_body, after) = (second.loop_block, second.end_block);

        let mut before = Vec::new();
        let mut moved_phis = Vec::new();
        let mut moved = Vec::new();
        for (mut instruction, placement) in Self::take_block(body, middle)?.into_iter().zip(placements) {
            match placement {
                Placement::Before => {
                    instruction.rename_inputs(&sources);
                    before.push(instruction);
                }
                Placement::After if instruction.is_phi() => moved_phis.push(instruction),
                Placement::After => moved.push(instruction),
                Placement::Dropped => {}
            }
        }

        let mut renames = built;
        if let (Some(from), Some(to)) = (&second_iter, &first_iter) {
            renames.insert(from.clone(), to.clone());
        }
        let mut phis = Vec::new();
        let mut iter = None;
        let mut rest = Vec::new();
        for mut instruction in Self::take_block(body, second_body)? {
            instruction.rename_inputs(&renames);
            match instruction {
                SsaInstruction::Phi { .. } => phis.push(instruction),
                SsaInstruction::Iter { .. } => {
                    if first_iter.is_none() {
                        iter = Some(instruction);
                    }
                }
                other => rest.push(other),
            }
        }

        let target = body
            .block_mut(first_body)
            .ok_or_else(|| malformed_error!("block #{} does not exist", first_body))?;
        let mut position = target
            .instructions()
            .iter()
            .position(|i| !i.is_phi() && !i.is_metadata())
            .unwrap_or(target.len());
        for instruction in phis.into_iter().chain(iter) {
            target.insert(position, instruction);
            position += 1;
        }
        target.instructions_mut().extend(rest);

        let start = body
            .block_mut(container)
            .ok_or_else(|| malformed_error!("block #{} does not exist", container))?;
        start.pop_ending_instruction();
        start.instructions_mut().extend(before);
        start.add(SsaInstruction::For {
            start: first.start,
            interval: first.interval,
            end: first.end,
            loop_block: first_body,
            end_block: after,
        });

        let end = body
            .block_mut(after)
            .ok_or_else(|| malformed_error!("block #{} does not exist", after))?;
        let existing = end.take_instructions();
        let split = existing
            .iter()
            .position(|i| !i.is_phi() && !i.is_metadata())
            .unwrap_or(existing.len());
        let mut merged = moved_phis;
        let mut existing = existing.into_iter();
        merged.extend(existing.by_ref().take(split));
        merged.extend(moved);
        merged.extend(existing);
        end.set_instructions(merged);

        body.rename_blocks(|b| {
            if b == middle {
                container
            } else if b == second_body {
                first_body
            } else {
                b
            }
        });
        Ok(())
    }
}

impl SsaPass for LoopFusionPass {
    fn name(&self) -> &'static str {
        "loop-fusion"
    }

    fn description(&self) -> &'static str {
        "Fuses adjacent loops over the same range"
    }

    fn run_on_function(&self, instance: &mut FunctionInstance, ctx: &CompilerContext) -> Result<bool> {
        let changes = EventLog::new();
        let name = instance.name().to_string();
        let mut declines = Declines::new(self.name(), &name);

        for _ in 0..MAX_ITERATIONS {
            let Some(plan) = Self::find_candidate(instance, &mut declines, &changes) else {
                break;
            };
            let (container, message) = (
                plan.first.container,
                format!("#{} absorbs #{}", plan.first.loop_block, plan.second.loop_block),
            );
            Self::fuse(instance, plan)?;
            changes
                .record(EventKind::LoopsFused)
                .at(name.as_str(), container)
                .message(message);
        }

        Ok(commit(&changes, &ctx.events))
    }
}
