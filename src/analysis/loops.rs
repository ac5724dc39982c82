//! Structured loop helpers.
//!
//! A `for` instruction ending block `B` owns a body section starting at its loop block `L`
//! and continues at its after-loop block `A`. The last block of the body section is
//! `block_end(L)`, written `E` below. Loop-carried values follow a fixed shape:
//!
//! ```text
//! block #B:   x0 = ...                     ; before-loop value
//!             for s, i, e, #L, #A
//! block #L:   x1 = phi #B:x0, #E:x2        ; loop start value
//!             ...
//! block #E:   x2 = ...                     ; loop end value
//! block #A:   x3 = phi #B:x0, #E:x2        ; after-loop value
//! ```
//!
//! [`conventional_loop_variables`] recovers these quadruples when every phi of the loop and
//! the after-loop block has exactly that shape.

use crate::analysis::ssa::{BlockId, FunctionBody, SsaInstruction};

/// A counted loop as seen from the block containing its `for`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForLoop {
    /// Block ending with the `for`
    pub container: BlockId,
    /// First block of the loop body
    pub loop_block: BlockId,
    /// Last block of the loop body section
    pub body_end: BlockId,
    /// Block executed after the loop
    pub end_block: BlockId,
    /// Start value
    pub start: String,
    /// Step
    pub interval: String,
    /// Inclusive bound
    pub end: String,
}

impl ForLoop {
    /// Reads the loop ended by `container`, if its terminator is a `for`.
    #[must_use]
    pub fn at(body: &FunctionBody, container: BlockId) -> Option<Self> {
        match body.block(container)?.ending_instruction()? {
            SsaInstruction::For {
                start,
                interval,
                end,
                loop_block,
                end_block,
            } => Some(Self {
                container,
                loop_block: *loop_block,
                body_end: body.block_end(*loop_block),
                end_block: *end_block,
                start: start.clone(),
                interval: interval.clone(),
                end: end.clone(),
            }),
            _ => None,
        }
    }

    /// Returns every block of the loop body, nested sections included.
    #[must_use]
    pub fn body_blocks(&self, body: &FunctionBody) -> Vec<BlockId> {
        section_blocks(body, self.loop_block)
    }

    /// Returns `true` if the body is the single block `loop_block`.
    #[must_use]
    pub fn is_single_block(&self) -> bool {
        self.loop_block == self.body_end
    }
}

/// A loop-carried variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopVariable {
    /// Value flowing into the first iteration
    pub before_loop: String,
    /// Phi in the loop block
    pub loop_start: String,
    /// Value at the end of an iteration
    pub loop_end: String,
    /// Phi in the after-loop block, when the value is used after the loop
    pub after_loop: Option<String>,
}

/// Returns all blocks of the structured section starting at `start`.
///
/// The section is `start`, the arms of a trailing `branch` or the body of a trailing `for`,
/// and recursively the continuation of each, up to `block_end(start)`.
#[must_use]
pub fn section_blocks(body: &FunctionBody, start: BlockId) -> Vec<BlockId> {
    let mut blocks = Vec::new();
    let mut work = vec![start];
    while let Some(block_id) = work.pop() {
        if blocks.contains(&block_id) || blocks.len() > body.block_count() {
            continue;
        }
        let Some(block) = body.block(block_id) else {
            continue;
        };
        blocks.push(block_id);
        match block.ending_instruction() {
            Some(SsaInstruction::Branch {
                then_block,
                else_block,
                end_block,
                ..
            }) => {
                work.push(*end_block);
                work.push(*else_block);
                work.push(*then_block);
            }
            Some(SsaInstruction::For {
                loop_block,
                end_block,
                ..
            }) => {
                work.push(*end_block);
                work.push(*loop_block);
            }
            _ => {}
        }
    }
    blocks
}

/// Returns `true` if the section starting at `start` contains no `break` or `continue`.
#[must_use]
pub fn is_simple_section(body: &FunctionBody, start: BlockId) -> bool {
    section_blocks(body, start)
        .into_iter()
        .filter_map(|id| body.block(id))
        .all(|block| !block.has_break_or_continue())
}

/// Returns `true` if any instruction of the given blocks has side effects.
#[must_use]
pub fn has_side_effects(body: &FunctionBody, blocks: &[BlockId]) -> bool {
    blocks
        .iter()
        .filter_map(|id| body.block(*id))
        .flat_map(|block| block.instructions())
        .any(SsaInstruction::has_side_effects)
}

/// Recovers the loop-carried variables of a conventional loop.
///
/// Returns `None` unless every phi of the loop block and of the after-loop block has
/// exactly two sources, one from the container and one from the body end, and every
/// after-loop phi matches a loop-block phi. Loops with `break` or `continue` are rejected.
#[must_use]
pub fn conventional_loop_variables(
    body: &FunctionBody,
    for_loop: &ForLoop,
) -> Option<Vec<LoopVariable>> {
    if !is_simple_section(body, for_loop.loop_block) {
        return None;
    }

    let split = |instruction: &SsaInstruction| -> Option<(String, String, String)> {
        let SsaInstruction::Phi { output, sources } = instruction else {
            return None;
        };
        if sources.len() != 2 {
            return None;
        }
        let from_container = sources.iter().find(|s| s.block == for_loop.container)?;
        let from_body = sources.iter().find(|s| s.block == for_loop.body_end)?;
        if for_loop.container == for_loop.body_end {
            return None;
        }
        Some((
            output.clone(),
            from_container.variable.clone(),
            from_body.variable.clone(),
        ))
    };

    let mut variables = Vec::new();
    for phi in body.block(for_loop.loop_block)?.phis() {
        let (loop_start, before_loop, loop_end) = split(phi)?;
        variables.push(LoopVariable {
            before_loop,
            loop_start,
            loop_end,
            after_loop: None,
        });
    }

    for phi in body.block(for_loop.end_block)?.phis() {
        let (after_loop, before_loop, loop_end) = split(phi)?;
        let variable = variables
            .iter_mut()
            .find(|v| v.before_loop == before_loop && v.loop_end == loop_end && v.after_loop.is_none())?;
        variable.after_loop = Some(after_loop);
    }

    Some(variables)
}
