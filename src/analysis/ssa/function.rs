//! Function bodies and typed function instances.
//!
//! A [`FunctionBody`] is an arena of [`SsaBlock`]s indexed by [`BlockId`]; block `0` is the
//! entry. Control-flow instructions refer to blocks by id, so blocks never hold references to
//! each other and a whole body can be renumbered atomically with
//! [`FunctionBody::rename_blocks`].
//!
//! A [`FunctionInstance`] pairs a body with its [`TypeMap`]. It is the unit every pass
//! transforms.

use std::fmt;

use crate::{
    analysis::ssa::{
        block::SsaBlock,
        instruction::{BlockId, SsaInstruction},
        typemap::TypeMap,
        types::VarType,
    },
    Result,
};

/// The SSA body of one function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBody {
    name: String,
    outputs: Vec<String>,
    blocks: Vec<SsaBlock>,
}

impl FunctionBody {
    /// Creates a body holding a single empty entry block.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outputs: Vec::new(),
            blocks: vec![SsaBlock::new()],
        }
    }

    /// Creates a body from existing blocks.
    #[must_use]
    pub fn from_blocks(name: impl Into<String>, blocks: Vec<SsaBlock>) -> Self {
        Self {
            name: name.into(),
            outputs: Vec::new(),
            blocks,
        }
    }

    /// Returns the function name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the variables returned to the caller.
    #[must_use]
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    /// Sets the variables returned to the caller.
    pub fn set_outputs(&mut self, outputs: Vec<String>) {
        self.outputs = outputs;
    }

    /// Returns `true` if `variable` is returned to the caller.
    #[must_use]
    pub fn is_output(&self, variable: &str) -> bool {
        self.outputs.iter().any(|o| o == variable)
    }

    /// Returns the block with the given id.
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&SsaBlock> {
        self.blocks.get(id)
    }

    /// Returns the block with the given id for editing.
    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut SsaBlock> {
        self.blocks.get_mut(id)
    }

    /// Returns all blocks, indexed by id.
    #[must_use]
    pub fn blocks(&self) -> &[SsaBlock] {
        &self.blocks
    }

    /// Returns all blocks for editing.
    pub fn blocks_mut(&mut self) -> &mut [SsaBlock] {
        &mut self.blocks
    }

    /// Returns the number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Appends an empty block and returns its id.
    pub fn add_block(&mut self) -> BlockId {
        self.blocks.push(SsaBlock::new());
        self.blocks.len() - 1
    }

    /// Replaces the whole block arena.
    pub fn set_blocks(&mut self, blocks: Vec<SsaBlock>) {
        self.blocks = blocks;
    }

    /// Iterates over every instruction with its block id and position.
    pub fn instructions(&self) -> impl Iterator<Item = (BlockId, usize, &SsaInstruction)> {
        self.blocks.iter().enumerate().flat_map(|(block_id, block)| {
            block
                .instructions()
                .iter()
                .enumerate()
                .map(move |(index, instruction)| (block_id, index, instruction))
        })
    }

    /// Returns the location of the instruction defining `variable`.
    #[must_use]
    pub fn definition(&self, variable: &str) -> Option<(BlockId, usize)> {
        self.instructions()
            .find(|(_, _, instr)| instr.outputs().contains(&variable))
            .map(|(block, index, _)| (block, index))
    }

    /// Returns the instruction defining `variable`.
    #[must_use]
    pub fn defining_instruction(&self, variable: &str) -> Option<&SsaInstruction> {
        let (block, index) = self.definition(variable)?;
        self.blocks.get(block)?.instructions().get(index)
    }

    /// Returns the block where control continues once `id` and everything structurally
    /// nested under it have finished.
    ///
    /// Follows the join block of a trailing `branch` and the after-loop block of a trailing
    /// `for`, recursively.
    #[must_use]
    pub fn block_end(&self, id: BlockId) -> BlockId {
        let mut current = id;
        for _ in 0..=self.blocks.len() {
            match self
                .blocks
                .get(current)
                .and_then(SsaBlock::ending_instruction)
                .and_then(SsaInstruction::end_block)
            {
                Some(next) => current = next,
                None => return current,
            }
        }
        current
    }

    /// Redirects every phi source naming `original` to `end`.
    pub fn break_block(&mut self, original: BlockId, end: BlockId) {
        for block in &mut self.blocks {
            for instruction in block.instructions_mut() {
                instruction.break_block(original, end);
            }
        }
    }

    /// Renames every block reference (targets and phi sources) through `map`.
    pub fn rename_blocks(&mut self, mut map: impl FnMut(BlockId) -> BlockId) {
        for block in &mut self.blocks {
            for instruction in block.instructions_mut() {
                instruction.rename_blocks(&mut map);
            }
        }
    }
}

impl fmt::Display for FunctionBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function {}", self.name)?;
        if !self.outputs.is_empty() {
            write!(f, " -> {}", self.outputs.join(", "))?;
        }
        writeln!(f)?;
        for (id, block) in self.blocks.iter().enumerate() {
            writeln!(f, "block #{id}:")?;
            write!(f, "{block}")?;
        }
        Ok(())
    }
}

/// A typed function body: the unit a pass transforms.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionInstance {
    /// The SSA body.
    pub body: FunctionBody,
    /// Types of every variable in `body`.
    pub types: TypeMap,
}

impl FunctionInstance {
    /// Pairs a body with its type map.
    #[must_use]
    pub fn new(body: FunctionBody, types: TypeMap) -> Self {
        Self { body, types }
    }

    /// Returns the function name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.body.name()
    }

    /// Returns the type of `variable`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedInput`] if the variable has no type entry.
    pub fn type_of(&self, variable: &str) -> Result<&VarType> {
        self.types
            .get(variable)
            .ok_or_else(|| malformed_error!("variable {} has no type", variable))
    }

    /// Creates a fresh temporary variable of the given type.
    pub fn make_temporary(&mut self, semantics: &str, ty: VarType) -> String {
        self.types.make_temporary(semantics, ty)
    }
}

impl fmt::Display for FunctionInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.body)
    }
}
