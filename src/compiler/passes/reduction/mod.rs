//! Reduction elimination passes.
//!
//! Builtin reductions over vectors and along one dimension are expanded into explicit loops
//! once the operand shapes make the iteration space obvious:
//!
//! - [`DotReductionEliminationPass`] - `dot(a, b)` of two vectors
//! - [`CumulativeReductionEliminationPass`] - `sum(x)` and `mean(x)` of a vector
//! - [`MinMaxReductionEliminationPass`] - `[m, i] = min(A, [], d)` and `max`
//!
//! Scalar accumulations share [`accumulate`], which emits the loop and its phis.

mod cumulative;
mod dot;
mod minmax;

pub use cumulative::CumulativeReductionEliminationPass;
pub use dot::DotReductionEliminationPass;
pub use minmax::MinMaxReductionEliminationPass;

use crate::{
    analysis::{PhiSource, VarType},
    compiler::editor::BlockEditor,
    Result,
};

/// Emits a scalar accumulation loop over `1:count`.
///
/// The accumulator starts at `initial`; `step` receives the accumulator at the top of the body
/// and the iteration variable and returns the updated accumulator. The after-loop value is
/// bound to `output` when given, or to a fresh variable of type `ty`.
///
/// # Errors
///
/// Returns the first error raised while emitting.
pub(crate) fn accumulate<'a>(
    editor: &mut BlockEditor<'a>,
    count: &str,
    initial: f64,
    ty: &VarType,
    output: Option<&str>,
    step: impl FnOnce(&mut BlockEditor<'a>, &str, &str) -> Result<String>,
) -> Result<String> {
    let start = editor.add_number("acc", initial)?;
    let one = editor.add_number("one", 1.0)?;
    let blocks = editor.make_for_loop(&one, &one, count)?;
    let acc_in = editor.temporary("acc", ty.clone());
    let iter = editor.add_iter("iter")?;
    let acc_out = step(editor, &acc_in, &iter)?;
    let body_end = editor.current_block();

    editor.insert_phi(
        blocks.loop_block,
        &acc_in,
        vec![
            PhiSource::new(blocks.container, start.as_str()),
            PhiSource::new(body_end, acc_out.as_str()),
        ],
    )?;
    editor.set_current(blocks.end_block);

    let result = match output {
        Some(output) => output.to_string(),
        None => editor.temporary("acc", ty.clone()),
    };
    editor.insert_phi(
        blocks.end_block,
        &result,
        vec![
            PhiSource::new(blocks.container, start),
            PhiSource::new(body_end, acc_out),
        ],
    )?;
    Ok(result)
}
