//! Def-use index for SSA variable lookup.
//!
//! [`DefUseIndex`] records where each variable is defined and where it is read, so passes
//! can ask "what defines `x`?" and "who reads `x`?" without rescanning the body. The index
//! is a snapshot: rebuild it after editing the body.
//!
//! ```rust,ignore
//! let index = DefUseIndex::build(&instance.body);
//! if index.use_count("A$1") == 1 {
//!     let (block, instr) = index.uses_of("A$1")[0].into();
//! }
//! ```

use std::collections::HashMap;

use crate::analysis::ssa::{BlockId, FunctionBody, SsaInstruction};

/// Location in a function body (block + instruction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    /// Block index.
    pub block: BlockId,
    /// Instruction index within the block.
    pub instruction: usize,
}

impl Location {
    /// Creates a new location.
    #[must_use]
    pub const fn new(block: BlockId, instruction: usize) -> Self {
        Self { block, instruction }
    }
}

impl From<Location> for (BlockId, usize) {
    fn from(location: Location) -> Self {
        (location.block, location.instruction)
    }
}

/// Index for def-use queries on a function body.
#[derive(Debug, Clone, Default)]
pub struct DefUseIndex {
    /// Map from variable to its definition site.
    definitions: HashMap<String, Location>,
    /// Map from variable to its use sites, in body order. Phi operands count as uses.
    uses: HashMap<String, Vec<Location>>,
}

impl DefUseIndex {
    /// Builds a def-use index from a function body.
    ///
    /// # Arguments
    ///
    /// * `body` - The function body to index.
    ///
    /// # Returns
    ///
    /// A new `DefUseIndex` with all relationships computed.
    #[must_use]
    pub fn build(body: &FunctionBody) -> Self {
        let mut definitions = HashMap::new();
        let mut uses: HashMap<String, Vec<Location>> = HashMap::new();

        for (block, index, instruction) in body.instructions() {
            let location = Location::new(block, index);
            for output in instruction.outputs() {
                definitions.insert(output.to_string(), location);
            }
            for input in instruction.inputs() {
                let sites = uses.entry(input.to_string()).or_default();
                // An instruction reading a variable twice is one use site.
                if sites.last() != Some(&location) {
                    sites.push(location);
                }
            }
        }

        Self { definitions, uses }
    }

    /// Returns the definition site of `variable`.
    #[must_use]
    pub fn definition(&self, variable: &str) -> Option<Location> {
        self.definitions.get(variable).copied()
    }

    /// Returns the instruction defining `variable`.
    #[must_use]
    pub fn def_instruction<'b>(
        &self,
        body: &'b FunctionBody,
        variable: &str,
    ) -> Option<&'b SsaInstruction> {
        let location = self.definition(variable)?;
        body.block(location.block)?
            .instructions()
            .get(location.instruction)
    }

    /// Returns every site reading `variable`.
    #[must_use]
    pub fn uses_of(&self, variable: &str) -> &[Location] {
        self.uses.get(variable).map_or(&[], Vec::as_slice)
    }

    /// Returns the instructions reading `variable`.
    #[must_use]
    pub fn users<'b>(&self, body: &'b FunctionBody, variable: &str) -> Vec<&'b SsaInstruction> {
        self.uses_of(variable)
            .iter()
            .filter_map(|location| {
                body.block(location.block)?
                    .instructions()
                    .get(location.instruction)
            })
            .collect()
    }

    /// Returns the number of instructions reading `variable`.
    #[must_use]
    pub fn use_count(&self, variable: &str) -> usize {
        self.uses_of(variable).len()
    }

    /// Returns `true` if no instruction reads `variable`.
    #[must_use]
    pub fn is_unused(&self, variable: &str) -> bool {
        self.uses_of(variable).is_empty()
    }
}
