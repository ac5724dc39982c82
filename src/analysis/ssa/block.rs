//! Basic blocks of a function body.

use std::fmt;

use crate::analysis::ssa::instruction::SsaInstruction;

/// An ordered sequence of instructions.
///
/// Phis come first (line markers and comments may precede them) and a terminator, if present,
/// is the last instruction. Passes are free to replace the whole sequence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SsaBlock {
    instructions: Vec<SsaInstruction>,
}

impl SsaBlock {
    /// Creates an empty block.
    #[must_use]
    pub fn new() -> Self {
        Self {
            instructions: Vec::new(),
        }
    }

    /// Creates a block holding `instructions`.
    #[must_use]
    pub fn from_instructions(instructions: Vec<SsaInstruction>) -> Self {
        Self { instructions }
    }

    /// Returns the instructions of this block.
    #[must_use]
    pub fn instructions(&self) -> &[SsaInstruction] {
        &self.instructions
    }

    /// Returns the instruction vector for in-place editing.
    pub fn instructions_mut(&mut self) -> &mut Vec<SsaInstruction> {
        &mut self.instructions
    }

    /// Replaces the instruction sequence.
    pub fn set_instructions(&mut self, instructions: Vec<SsaInstruction>) {
        self.instructions = instructions;
    }

    /// Removes and returns all instructions, leaving the block empty.
    pub fn take_instructions(&mut self) -> Vec<SsaInstruction> {
        std::mem::take(&mut self.instructions)
    }

    /// Appends an instruction.
    pub fn add(&mut self, instruction: SsaInstruction) {
        self.instructions.push(instruction);
    }

    /// Inserts an instruction at `index`.
    pub fn insert(&mut self, index: usize, instruction: SsaInstruction) {
        self.instructions.insert(index, instruction);
    }

    /// Inserts an instruction before every other instruction.
    pub fn prepend(&mut self, instruction: SsaInstruction) {
        self.instructions.insert(0, instruction);
    }

    /// Returns the number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Returns `true` if the block holds no instruction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Returns the terminator of this block, if it has one.
    #[must_use]
    pub fn ending_instruction(&self) -> Option<&SsaInstruction> {
        self.instructions.last().filter(|i| i.is_terminator())
    }

    /// Removes and returns the terminator, if any.
    pub fn pop_ending_instruction(&mut self) -> Option<SsaInstruction> {
        if self.ending_instruction().is_some() {
            self.instructions.pop()
        } else {
            None
        }
    }

    /// Returns `true` if the block contains a `break` or `continue`.
    #[must_use]
    pub fn has_break_or_continue(&self) -> bool {
        self.instructions
            .iter()
            .any(|i| matches!(i, SsaInstruction::Break | SsaInstruction::Continue))
    }

    /// Iterates over the phis of this block.
    pub fn phis(&self) -> impl Iterator<Item = &SsaInstruction> {
        self.instructions.iter().filter(|i| i.is_phi())
    }

    /// Returns the index right after the leading phis and metadata, where new non-phi
    /// instructions can be inserted at the start of the block.
    #[must_use]
    pub fn phi_insertion_point(&self) -> usize {
        self.instructions
            .iter()
            .position(|i| !i.is_phi() && !i.is_metadata())
            .unwrap_or(self.instructions.len())
    }

    /// Returns the position of the instruction defining `variable`.
    #[must_use]
    pub fn position_of(&self, variable: &str) -> Option<usize> {
        self.instructions
            .iter()
            .position(|i| i.outputs().contains(&variable))
    }
}

impl fmt::Display for SsaBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for instruction in &self.instructions {
            writeln!(f, "  {instruction}")?;
        }
        Ok(())
    }
}
