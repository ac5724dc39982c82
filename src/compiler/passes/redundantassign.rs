//! Redundant assignment elimination.
//!
//! A copy `y = x`, or a phi whose sources all name `x`, gives a second name to a value. When
//! both names have the same type the copy is removed and every use of `y` reads `x` instead.
//! If `y` is a function output and `x` is not, `x` takes the name `y` instead.
//!
//! ```text
//! x = plus a, b                          x = plus a, b
//! y = x                  ==>             z = times x, x
//! z = times y, y
//! ```

use std::collections::HashMap;

use crate::{
    analysis::{AssignedValue, BlockId, FunctionInstance, SsaInstruction},
    compiler::{
        context::CompilerContext,
        events::{EventKind, EventLog},
        pass::SsaPass,
        passes::utils::{commit, Declines},
    },
    Result,
};

/// Maximum number of copies removed per run.
const MAX_ITERATIONS: usize = 1000;

/// A copy to remove and the renaming that replaces it.
#[derive(Debug)]
struct Plan {
    block: BlockId,
    index: usize,
    from: String,
    to: String,
}

/// Returns `(output, input)` if `instruction` only forwards `input`.
fn forwarded(instruction: &SsaInstruction) -> Option<(&str, &str)> {
    match instruction {
        SsaInstruction::Assignment {
            output,
            value: AssignedValue::Variable(input),
        } => Some((output.as_str(), input.as_str())),
        SsaInstruction::Phi { output, sources } => {
            let mut effective = sources
                .iter()
                .map(|s| s.variable.as_str())
                .filter(|v| v != output);
            let first = effective.next()?;
            effective.all(|v| v == first).then_some((output.as_str(), first))
        }
        _ => None,
    }
}

/// Merges variables that only copy one another.
pub struct RedundantAssignmentEliminationPass;

impl Default for RedundantAssignmentEliminationPass {
    fn default() -> Self {
        Self::new()
    }
}

impl RedundantAssignmentEliminationPass {
    /// Creates a new redundant assignment elimination pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn find_candidate(
        instance: &FunctionInstance,
        declines: &mut Declines,
        changes: &EventLog,
    ) -> Option<Plan> {
        let body = &instance.body;
        for (block, index, instruction) in body.instructions() {
            let Some((output, input)) = forwarded(instruction) else {
                continue;
            };
            if declines.contains(output) {
                continue;
            }
            let same_type = matches!(
                (instance.types.get(output), instance.types.get(input)),
                (Some(a), Some(b)) if a == b
            );
            if !same_type {
                declines.record(changes, block, output, "copy changes the type");
                continue;
            }
            let (from, to) = match (body.is_output(output), body.is_output(input)) {
                (true, true) => {
                    declines.record(changes, block, output, "both names are returned");
                    continue;
                }
                (true, false) => (input, output),
                (false, _) => (output, input),
            };
            return Some(Plan {
                block,
                index,
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        None
    }

    fn merge(instance: &mut FunctionInstance, plan: &Plan) -> Result<()> {
        let block = instance
            .body
            .block_mut(plan.block)
            .ok_or_else(|| malformed_error!("block #{} does not exist", plan.block))?;
        if plan.index >= block.len() {
            return Err(malformed_error!("block #{} has no instruction {}", plan.block, plan.index));
        }
        block.instructions_mut().remove(plan.index);

        let renames = HashMap::from([(plan.from.clone(), plan.to.clone())]);
        for block in instance.body.blocks_mut() {
            for instruction in block.instructions_mut() {
                instruction.rename_variables(&renames);
            }
        }
        Ok(())
    }
}

impl SsaPass for RedundantAssignmentEliminationPass {
    fn name(&self) -> &'static str {
        "redundant-assignment-elimination"
    }

    fn description(&self) -> &'static str {
        "Merges variables that are plain copies of one another"
    }

    fn run_on_function(&self, instance: &mut FunctionInstance, ctx: &CompilerContext) -> Result<bool> {
        let changes = EventLog::new();
        let name = instance.name().to_string();
        let mut declines = Declines::new(self.name(), &name);

        for _ in 0..MAX_ITERATIONS {
            let Some(plan) = Self::find_candidate(instance, &mut declines, &changes) else {
                break;
            };
            Self::merge(instance, &plan)?;
            changes
                .record(EventKind::InstructionRemoved)
                .at(name.as_str(), plan.block)
                .message(format!("{} renamed to {}", plan.from, plan.to));
        }

        Ok(commit(&changes, &ctx.events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{validate, FunctionBuilder};

    fn run(instance: &mut FunctionInstance) -> (bool, CompilerContext) {
        let ctx = CompilerContext::with_builtins();
        let changed = RedundantAssignmentEliminationPass::new()
            .run_on_function(instance, &ctx)
            .expect("pass");
        (changed, ctx)
    }

    fn rendered(instance: &FunctionInstance) -> Vec<String> {
        instance
            .body
            .instructions()
            .map(|(_, _, instruction)| instruction.to_string())
            .collect()
    }

    #[test]
    fn test_copy_uses_read_source() {
        let mut instance = FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["a$1", "x$1", "y$1", "z$1"]);
            f.outputs(&["z$1"]);
            f.block(0, |b| {
                b.argument("a$1", 0);
                b.call("plus", &["x$1"], &["a$1", "a$1"]);
                b.assign("y$1", "x$1");
                b.call("times", &["z$1"], &["y$1", "y$1"]);
            });
        });
        let (changed, ctx) = run(&mut instance);
        assert!(changed);
        validate(&instance.body).expect("valid");
        assert_eq!(
            rendered(&instance),
            vec!["a$1 = arg 0", "x$1 = plus a$1, a$1", "z$1 = times x$1, x$1"]
        );
        assert!(ctx.events.has(EventKind::InstructionRemoved));
    }

    #[test]
    fn test_returned_copy_renames_source() {
        let mut instance = FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["a$1", "x$1", "y$1"]);
            f.outputs(&["y$1"]);
            f.block(0, |b| {
                b.argument("a$1", 0);
                b.call("plus", &["x$1"], &["a$1", "a$1"]);
                b.assign("y$1", "x$1");
            });
        });
        assert!(run(&mut instance).0);
        validate(&instance.body).expect("valid");
        assert_eq!(rendered(&instance), vec!["a$1 = arg 0", "y$1 = plus a$1, a$1"]);
    }

    #[test]
    fn test_phi_with_one_value_merged() {
        let mut instance = FunctionBuilder::new("f").build_with(|f| {
            f.logical("c$1");
            f.scalars(&["a$1", "y$1", "z$1"]);
            f.outputs(&["z$1"]);
            f.block(0, |b| {
                b.argument("c$1", 0);
                b.argument("a$1", 1);
                b.branch("c$1", 1, 2, 3);
            });
            f.block(1, |_| {});
            f.block(2, |_| {});
            f.block(3, |b| {
                b.phi("y$1", &[(1, "a$1"), (2, "a$1")]);
                b.call("plus", &["z$1"], &["y$1", "a$1"]);
            });
        });
        assert!(run(&mut instance).0);
        validate(&instance.body).expect("valid");
        assert_eq!(
            instance.body.defining_instruction("z$1").map(ToString::to_string),
            Some("z$1 = plus a$1, a$1".to_string())
        );
        assert!(instance.body.definition("y$1").is_none());
    }

    #[test]
    fn test_type_changing_copy_kept() {
        let mut instance = FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["y$1"]);
            f.outputs(&["y$1"]);
            f.block(0, |b| {
                b.number("k$1", 2.0);
                b.assign("y$1", "k$1");
            });
        });
        let before = instance.clone();
        let (changed, ctx) = run(&mut instance);
        assert!(!changed);
        assert_eq!(instance, before);
        assert_eq!(ctx.events.count_kind(EventKind::PatternDeclined), 1);
    }
}
