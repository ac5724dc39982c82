//! Helpers shared by the pass catalog.

use std::collections::HashSet;

use tracing::debug;

use crate::{
    analysis::{BlockId, FunctionBody, FunctionInstance, SsaInstruction, VarType},
    compiler::events::{EventKind, EventLog},
};

/// Returns the output and arguments of a side-effect free, single-output typed call to
/// `function`.
pub(crate) fn single_call<'a>(
    instruction: &'a SsaInstruction,
    function: &str,
) -> Option<(&'a str, &'a [String])> {
    match instruction {
        SsaInstruction::TypedCall {
            function: name,
            signature,
            outputs,
            inputs,
        } if name == function && outputs.len() == 1 && !signature.side_effects => {
            Some((outputs[0].as_str(), inputs.as_slice()))
        }
        _ => None,
    }
}

/// Returns the output, callee and arguments of any side-effect free, single-output typed call.
pub(crate) fn any_single_call(instruction: &SsaInstruction) -> Option<(&str, &str, &[String])> {
    match instruction {
        SsaInstruction::TypedCall {
            function,
            signature,
            outputs,
            inputs,
        } if outputs.len() == 1 && !signature.side_effects => {
            Some((outputs[0].as_str(), function.as_str(), inputs.as_slice()))
        }
        _ => None,
    }
}

/// Returns the matrix shape of `variable`, if it is a matrix.
pub(crate) fn shape_of<'a>(
    instance: &'a FunctionInstance,
    variable: &str,
) -> Option<&'a crate::analysis::Shape> {
    instance.types.get(variable).and_then(VarType::shape)
}

/// Returns `true` if `variable` is typed as a scalar.
pub(crate) fn is_scalar(instance: &FunctionInstance, variable: &str) -> bool {
    instance.types.get(variable).is_some_and(VarType::is_scalar)
}

/// Returns the known constant value of `variable`.
pub(crate) fn constant_of(instance: &FunctionInstance, variable: &str) -> Option<f64> {
    instance.types.get(variable).and_then(VarType::constant_value)
}

/// Returns the output of the only `iter` of `block`, if there is one.
///
/// # Errors
///
/// Returns a decline reason if the block holds several `iter` instructions.
pub(crate) fn iter_variable(
    body: &FunctionBody,
    block: BlockId,
) -> std::result::Result<Option<String>, &'static str> {
    let mut iters = body
        .block(block)
        .into_iter()
        .flat_map(|b| b.instructions())
        .filter_map(|instruction| match instruction {
            SsaInstruction::Iter { output } => Some(output.clone()),
            _ => None,
        });
    let first = iters.next();
    if iters.next().is_some() {
        return Err("loop body holds several iter instructions");
    }
    Ok(first)
}

/// Records that a candidate was left untouched, once per candidate output.
///
/// Declined candidates stay in the body, so later iterations of the same pass meet them again;
/// the diagnostic is emitted only the first time.
pub(crate) struct Declines {
    pass: &'static str,
    function: String,
    seen: HashSet<String>,
}

impl Declines {
    pub(crate) fn new(pass: &'static str, function: &str) -> Self {
        Self {
            pass,
            function: function.to_string(),
            seen: HashSet::new(),
        }
    }

    /// Returns `true` if `key` was declined before.
    pub(crate) fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    /// Records the decline of `key` in `block`.
    pub(crate) fn record(&mut self, changes: &EventLog, block: BlockId, key: &str, reason: &str) {
        if self.seen.insert(key.to_string()) {
            debug!("{}: {} declined {}: {}", self.function, self.pass, key, reason);
            changes
                .record(EventKind::PatternDeclined)
                .at(self.function.as_str(), block)
                .pass(self.pass)
                .message(format!("{key}: {reason}"));
        }
    }
}

/// Merges `changes` into the context log and reports whether any transformation happened.
pub(crate) fn commit(changes: &EventLog, events: &EventLog) -> bool {
    let changed = changes.transformation_count() > 0;
    if !changes.is_empty() {
        events.merge(changes);
    }
    changed
}
