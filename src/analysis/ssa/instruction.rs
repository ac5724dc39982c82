//! The closed SSA instruction catalog.
//!
//! Every instruction kind a function body can contain is a variant of [`SsaInstruction`].
//! Passes dispatch on it with exhaustive `match`es, so adding a kind forces every pass to
//! decide how to treat it.
//!
//! Each instruction declares the variables it defines ([`SsaInstruction::outputs`]), the
//! variables it reads ([`SsaInstruction::inputs`]) and the blocks it references
//! ([`SsaInstruction::targets`]). Control-flow instructions are structured: a `branch` names
//! its join block and a `for` names its after-loop block, so the body never contains
//! arbitrary jumps.

use std::{collections::HashMap, fmt};

use bitflags::bitflags;

use crate::analysis::ssa::types::{format_number, VarType};

/// Index of a block within its function body.
pub type BlockId = usize;

/// Right-hand side of an assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignedValue {
    /// Copy of another variable.
    Variable(String),
    /// Numeric literal.
    Number(f64),
    /// Explicitly undefined value.
    Undefined,
}

impl fmt::Display for AssignedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignedValue::Variable(name) => f.write_str(name),
            AssignedValue::Number(value) => f.write_str(&format_number(*value)),
            AssignedValue::Undefined => f.write_str("!undefined"),
        }
    }
}

/// One index of a range access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeIndex {
    /// The whole axis (`:`).
    FullRange,
    /// An inclusive sub-range `start:end` of the axis.
    PartialRange {
        /// First index
        start: String,
        /// Last index
        end: String,
    },
    /// A single scalar index.
    Variable(String),
}

impl RangeIndex {
    fn variables_mut(&mut self) -> Vec<&mut String> {
        match self {
            RangeIndex::FullRange => Vec::new(),
            RangeIndex::PartialRange { start, end } => vec![start, end],
            RangeIndex::Variable(name) => vec![name],
        }
    }

    fn variables(&self) -> Vec<&str> {
        match self {
            RangeIndex::FullRange => Vec::new(),
            RangeIndex::PartialRange { start, end } => vec![start.as_str(), end.as_str()],
            RangeIndex::Variable(name) => vec![name.as_str()],
        }
    }
}

impl fmt::Display for RangeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeIndex::FullRange => f.write_str(":"),
            RangeIndex::PartialRange { start, end } => write!(f, "{start}:{end}"),
            RangeIndex::Variable(name) => f.write_str(name),
        }
    }
}

/// One incoming value of a phi.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhiSource {
    /// The predecessor block the value flows in from.
    pub block: BlockId,
    /// The incoming variable.
    pub variable: String,
}

impl PhiSource {
    /// Creates a phi source.
    #[must_use]
    pub fn new(block: BlockId, variable: impl Into<String>) -> Self {
        Self {
            block,
            variable: variable.into(),
        }
    }
}

impl fmt::Display for PhiSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.block, self.variable)
    }
}

/// Resolved signature of a typed call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FunctionSignature {
    /// Argument types.
    pub inputs: Vec<VarType>,
    /// Result types.
    pub outputs: Vec<VarType>,
    /// Whether the callee has observable side effects.
    pub side_effects: bool,
}

impl FunctionSignature {
    /// Creates a side-effect free signature.
    #[must_use]
    pub fn new(inputs: Vec<VarType>, outputs: Vec<VarType>) -> Self {
        Self {
            inputs,
            outputs,
            side_effects: false,
        }
    }
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |types: &[VarType]| {
            types
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(f, "({}) -> ({})", join(&self.inputs), join(&self.outputs))
    }
}

bitflags! {
    /// Structural properties of an instruction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InstructionFlags: u8 {
        /// Ends its block and transfers control.
        const TERMINATOR = 0b0000_0001;
        /// Has effects beyond its outputs; never removed as dead.
        const SIDE_EFFECT = 0b0000_0010;
        /// Runtime check that aborts on failure.
        const VALIDATION = 0b0000_0100;
        /// Source-mapping or commentary with no runtime effect.
        const METADATA = 0b0000_1000;
        /// Merges values at a control-flow join.
        const PHI = 0b0001_0000;
    }
}

/// A single SSA instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum SsaInstruction {
    /// Binds the function argument at `index`.
    Argument {
        /// Defined variable
        output: String,
        /// Zero-based argument position
        index: usize,
    },
    /// Copies a variable or materializes a literal.
    Assignment {
        /// Defined variable
        output: String,
        /// Assigned value
        value: AssignedValue,
    },
    /// Selects the incoming value of the predecessor control arrived from.
    Phi {
        /// Defined variable
        output: String,
        /// One source per predecessor block
        sources: Vec<PhiSource>,
    },
    /// Two-way structured branch; both arms continue at `end_block`.
    Branch {
        /// Logical condition
        condition: String,
        /// Block executed when the condition holds
        then_block: BlockId,
        /// Block executed otherwise
        else_block: BlockId,
        /// Join block
        end_block: BlockId,
    },
    /// Counted loop `start:interval:end` with body `loop_block`.
    For {
        /// First iteration value
        start: String,
        /// Step
        interval: String,
        /// Inclusive bound
        end: String,
        /// First block of the loop body
        loop_block: BlockId,
        /// Block executed once the loop finishes
        end_block: BlockId,
    },
    /// Leaves the innermost loop.
    Break,
    /// Starts the next iteration of the innermost loop.
    Continue,
    /// Current iteration value of the innermost loop.
    Iter {
        /// Defined variable
        output: String,
    },
    /// Call with a resolved signature.
    TypedCall {
        /// Callee name
        function: String,
        /// Resolved signature
        signature: FunctionSignature,
        /// Defined variables
        outputs: Vec<String>,
        /// Arguments
        inputs: Vec<String>,
    },
    /// Call that could not be typed; always treated as side-effecting.
    UntypedCall {
        /// Callee name
        function: String,
        /// Defined variables
        outputs: Vec<String>,
        /// Arguments
        inputs: Vec<String>,
    },
    /// MATLAB indexed read `output = base(indices...)`.
    MatrixGet {
        /// Defined variable
        output: String,
        /// Indexed matrix
        base: String,
        /// Indices, scalar or matrix
        indices: Vec<String>,
    },
    /// MATLAB indexed write producing the updated matrix.
    MatrixSet {
        /// Updated matrix
        output: String,
        /// Matrix before the write
        base: String,
        /// Indices
        indices: Vec<String>,
        /// Written value
        value: String,
    },
    /// Read of a rectangular sub-range.
    RangeGet {
        /// Defined variable
        output: String,
        /// Indexed matrix
        base: String,
        /// One range index per axis
        indices: Vec<RangeIndex>,
    },
    /// Write of a rectangular sub-range.
    RangeSet {
        /// Updated matrix
        output: String,
        /// Matrix before the write
        base: String,
        /// One range index per axis
        indices: Vec<RangeIndex>,
        /// Written value
        value: String,
    },
    /// Unchecked scalar read with in-bounds scalar indices.
    SimpleGet {
        /// Defined variable
        output: String,
        /// Indexed matrix
        base: String,
        /// Scalar indices
        indices: Vec<String>,
    },
    /// Unchecked scalar write with in-bounds scalar indices.
    SimpleSet {
        /// Updated matrix
        output: String,
        /// Matrix before the write
        base: String,
        /// Scalar indices
        indices: Vec<String>,
        /// Written scalar
        value: String,
    },
    /// Size of the result of indexing `base` with the single index `index`.
    AccessSize {
        /// Defined size row vector
        output: String,
        /// Indexed matrix
        base: String,
        /// Single index
        index: String,
    },
    /// Value of `end` at `axis` of an access with `axis_count` indices.
    End {
        /// Defined variable
        output: String,
        /// Indexed matrix
        base: String,
        /// Zero-based axis
        axis: usize,
        /// Number of indices of the enclosing access
        axis_count: usize,
    },
    /// Aborts at runtime unless both values are equal.
    ValidateEqual {
        /// First value
        left: String,
        /// Second value
        right: String,
    },
    /// String literal.
    String {
        /// Defined variable
        output: String,
        /// Literal text
        value: String,
    },
    /// Source line marker.
    Line {
        /// Source line number
        line: usize,
    },
    /// Free-form comment.
    Comment {
        /// Comment text
        text: String,
    },
}

impl SsaInstruction {
    /// Convenience constructor for a side-effect free typed call.
    #[must_use]
    pub fn call(
        function: impl Into<String>,
        signature: FunctionSignature,
        outputs: Vec<String>,
        inputs: Vec<String>,
    ) -> Self {
        SsaInstruction::TypedCall {
            function: function.into(),
            signature,
            outputs,
            inputs,
        }
    }

    /// Convenience constructor for `output = input`.
    #[must_use]
    pub fn copy(output: impl Into<String>, input: impl Into<String>) -> Self {
        SsaInstruction::Assignment {
            output: output.into(),
            value: AssignedValue::Variable(input.into()),
        }
    }

    /// Returns the structural flags of this instruction.
    #[must_use]
    pub fn flags(&self) -> InstructionFlags {
        match self {
            SsaInstruction::Branch { .. }
            | SsaInstruction::For { .. }
            | SsaInstruction::Break
            | SsaInstruction::Continue => InstructionFlags::TERMINATOR,
            SsaInstruction::Phi { .. } => InstructionFlags::PHI,
            SsaInstruction::UntypedCall { .. } => InstructionFlags::SIDE_EFFECT,
            SsaInstruction::TypedCall { signature, .. } if signature.side_effects => {
                InstructionFlags::SIDE_EFFECT
            }
            SsaInstruction::ValidateEqual { .. } => {
                InstructionFlags::VALIDATION | InstructionFlags::SIDE_EFFECT
            }
            SsaInstruction::Line { .. } | SsaInstruction::Comment { .. } => {
                InstructionFlags::METADATA
            }
            _ => InstructionFlags::empty(),
        }
    }

    /// Returns `true` if this instruction ends its block.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        self.flags().contains(InstructionFlags::TERMINATOR)
    }

    /// Returns `true` if this instruction has effects beyond defining its outputs.
    #[must_use]
    pub fn has_side_effects(&self) -> bool {
        self.flags().contains(InstructionFlags::SIDE_EFFECT)
    }

    /// Returns `true` for phis.
    #[must_use]
    pub fn is_phi(&self) -> bool {
        matches!(self, SsaInstruction::Phi { .. })
    }

    /// Returns `true` for line markers and comments.
    #[must_use]
    pub fn is_metadata(&self) -> bool {
        self.flags().contains(InstructionFlags::METADATA)
    }

    /// Returns the variables defined by this instruction.
    #[must_use]
    pub fn outputs(&self) -> Vec<&str> {
        match self {
            SsaInstruction::Argument { output, .. }
            | SsaInstruction::Assignment { output, .. }
            | SsaInstruction::Phi { output, .. }
            | SsaInstruction::Iter { output }
            | SsaInstruction::MatrixGet { output, .. }
            | SsaInstruction::MatrixSet { output, .. }
            | SsaInstruction::RangeGet { output, .. }
            | SsaInstruction::RangeSet { output, .. }
            | SsaInstruction::SimpleGet { output, .. }
            | SsaInstruction::SimpleSet { output, .. }
            | SsaInstruction::AccessSize { output, .. }
            | SsaInstruction::End { output, .. }
            | SsaInstruction::String { output, .. } => vec![output.as_str()],
            SsaInstruction::TypedCall { outputs, .. }
            | SsaInstruction::UntypedCall { outputs, .. } => {
                outputs.iter().map(String::as_str).collect()
            }
            SsaInstruction::Branch { .. }
            | SsaInstruction::For { .. }
            | SsaInstruction::Break
            | SsaInstruction::Continue
            | SsaInstruction::ValidateEqual { .. }
            | SsaInstruction::Line { .. }
            | SsaInstruction::Comment { .. } => Vec::new(),
        }
    }

    /// Returns the single defined variable of a one-output instruction.
    #[must_use]
    pub fn output(&self) -> Option<&str> {
        let outputs = self.outputs();
        if outputs.len() == 1 {
            outputs.first().copied()
        } else {
            None
        }
    }

    /// Returns the variables read by this instruction, phi operands included.
    #[must_use]
    pub fn inputs(&self) -> Vec<&str> {
        match self {
            SsaInstruction::Assignment {
                value: AssignedValue::Variable(name),
                ..
            } => vec![name.as_str()],
            SsaInstruction::Phi { sources, .. } => {
                sources.iter().map(|s| s.variable.as_str()).collect()
            }
            SsaInstruction::Branch { condition, .. } => vec![condition.as_str()],
            SsaInstruction::For {
                start,
                interval,
                end,
                ..
            } => vec![start.as_str(), interval.as_str(), end.as_str()],
            SsaInstruction::TypedCall { inputs, .. }
            | SsaInstruction::UntypedCall { inputs, .. } => {
                inputs.iter().map(String::as_str).collect()
            }
            SsaInstruction::MatrixGet { base, indices, .. }
            | SsaInstruction::SimpleGet { base, indices, .. } => std::iter::once(base.as_str())
                .chain(indices.iter().map(String::as_str))
                .collect(),
            SsaInstruction::MatrixSet {
                base,
                indices,
                value,
                ..
            }
            | SsaInstruction::SimpleSet {
                base,
                indices,
                value,
                ..
            } => std::iter::once(base.as_str())
                .chain(indices.iter().map(String::as_str))
                .chain(std::iter::once(value.as_str()))
                .collect(),
            SsaInstruction::RangeGet { base, indices, .. } => std::iter::once(base.as_str())
                .chain(indices.iter().flat_map(RangeIndex::variables))
                .collect(),
            SsaInstruction::RangeSet {
                base,
                indices,
                value,
                ..
            } => std::iter::once(base.as_str())
                .chain(indices.iter().flat_map(RangeIndex::variables))
                .chain(std::iter::once(value.as_str()))
                .collect(),
            SsaInstruction::AccessSize { base, index, .. } => {
                vec![base.as_str(), index.as_str()]
            }
            SsaInstruction::End { base, .. } => vec![base.as_str()],
            SsaInstruction::ValidateEqual { left, right } => vec![left.as_str(), right.as_str()],
            SsaInstruction::Argument { .. }
            | SsaInstruction::Assignment { .. }
            | SsaInstruction::Break
            | SsaInstruction::Continue
            | SsaInstruction::Iter { .. }
            | SsaInstruction::String { .. }
            | SsaInstruction::Line { .. }
            | SsaInstruction::Comment { .. } => Vec::new(),
        }
    }

    /// Returns `true` if this instruction reads `variable`.
    #[must_use]
    pub fn uses(&self, variable: &str) -> bool {
        self.inputs().contains(&variable)
    }

    /// Returns the blocks referenced by this instruction, phi sources excluded.
    #[must_use]
    pub fn targets(&self) -> Vec<BlockId> {
        match self {
            SsaInstruction::Branch {
                then_block,
                else_block,
                end_block,
                ..
            } => vec![*then_block, *else_block, *end_block],
            SsaInstruction::For {
                loop_block,
                end_block,
                ..
            } => vec![*loop_block, *end_block],
            _ => Vec::new(),
        }
    }

    /// Returns the structured continuation block of a `branch` or `for`.
    #[must_use]
    pub fn end_block(&self) -> Option<BlockId> {
        match self {
            SsaInstruction::Branch { end_block, .. } | SsaInstruction::For { end_block, .. } => {
                Some(*end_block)
            }
            _ => None,
        }
    }

    /// Applies `f` to every variable this instruction reads.
    pub fn for_each_input_mut(&mut self, mut f: impl FnMut(&mut String)) {
        match self {
            SsaInstruction::Assignment {
                value: AssignedValue::Variable(name),
                ..
            } => f(name),
            SsaInstruction::Phi { sources, .. } => {
                for source in sources {
                    f(&mut source.variable);
                }
            }
            SsaInstruction::Branch { condition, .. } => f(condition),
            SsaInstruction::For {
                start,
                interval,
                end,
                ..
            } => {
                f(start);
                f(interval);
                f(end);
            }
            SsaInstruction::TypedCall { inputs, .. }
            | SsaInstruction::UntypedCall { inputs, .. } => inputs.iter_mut().for_each(f),
            SsaInstruction::MatrixGet { base, indices, .. }
            | SsaInstruction::SimpleGet { base, indices, .. } => {
                f(base);
                indices.iter_mut().for_each(f);
            }
            SsaInstruction::MatrixSet {
                base,
                indices,
                value,
                ..
            }
            | SsaInstruction::SimpleSet {
                base,
                indices,
                value,
                ..
            } => {
                f(base);
                indices.iter_mut().for_each(&mut f);
                f(value);
            }
            SsaInstruction::RangeGet { base, indices, .. } => {
                f(base);
                for index in indices {
                    index.variables_mut().into_iter().for_each(&mut f);
                }
            }
            SsaInstruction::RangeSet {
                base,
                indices,
                value,
                ..
            } => {
                f(base);
                for index in indices {
                    index.variables_mut().into_iter().for_each(&mut f);
                }
                f(value);
            }
            SsaInstruction::AccessSize { base, index, .. } => {
                f(base);
                f(index);
            }
            SsaInstruction::End { base, .. } => f(base),
            SsaInstruction::ValidateEqual { left, right } => {
                f(left);
                f(right);
            }
            SsaInstruction::Argument { .. }
            | SsaInstruction::Assignment { .. }
            | SsaInstruction::Break
            | SsaInstruction::Continue
            | SsaInstruction::Iter { .. }
            | SsaInstruction::String { .. }
            | SsaInstruction::Line { .. }
            | SsaInstruction::Comment { .. } => {}
        }
    }

    /// Applies `f` to every variable this instruction defines.
    pub fn for_each_output_mut(&mut self, mut f: impl FnMut(&mut String)) {
        match self {
            SsaInstruction::Argument { output, .. }
            | SsaInstruction::Assignment { output, .. }
            | SsaInstruction::Phi { output, .. }
            | SsaInstruction::Iter { output }
            | SsaInstruction::MatrixGet { output, .. }
            | SsaInstruction::MatrixSet { output, .. }
            | SsaInstruction::RangeGet { output, .. }
            | SsaInstruction::RangeSet { output, .. }
            | SsaInstruction::SimpleGet { output, .. }
            | SsaInstruction::SimpleSet { output, .. }
            | SsaInstruction::AccessSize { output, .. }
            | SsaInstruction::End { output, .. }
            | SsaInstruction::String { output, .. } => f(output),
            SsaInstruction::TypedCall { outputs, .. }
            | SsaInstruction::UntypedCall { outputs, .. } => outputs.iter_mut().for_each(f),
            SsaInstruction::Branch { .. }
            | SsaInstruction::For { .. }
            | SsaInstruction::Break
            | SsaInstruction::Continue
            | SsaInstruction::ValidateEqual { .. }
            | SsaInstruction::Line { .. }
            | SsaInstruction::Comment { .. } => {}
        }
    }

    /// Replaces every read of a key of `renames` by its value.
    ///
    /// # Returns
    ///
    /// `true` if any input was renamed.
    pub fn rename_inputs(&mut self, renames: &HashMap<String, String>) -> bool {
        let mut changed = false;
        self.for_each_input_mut(|name| {
            if let Some(new_name) = renames.get(name.as_str()) {
                name.clone_from(new_name);
                changed = true;
            }
        });
        changed
    }

    /// Renames both defined and read variables.
    pub fn rename_variables(&mut self, renames: &HashMap<String, String>) {
        self.rename_inputs(renames);
        self.for_each_output_mut(|name| {
            if let Some(new_name) = renames.get(name.as_str()) {
                name.clone_from(new_name);
            }
        });
    }

    /// Renames every referenced block, phi sources included.
    pub fn rename_blocks(&mut self, mut map: impl FnMut(BlockId) -> BlockId) {
        match self {
            SsaInstruction::Phi { sources, .. } => {
                for source in sources {
                    source.block = map(source.block);
                }
            }
            SsaInstruction::Branch {
                then_block,
                else_block,
                end_block,
                ..
            } => {
                *then_block = map(*then_block);
                *else_block = map(*else_block);
                *end_block = map(*end_block);
            }
            SsaInstruction::For {
                loop_block,
                end_block,
                ..
            } => {
                *loop_block = map(*loop_block);
                *end_block = map(*end_block);
            }
            _ => {}
        }
    }

    /// Redirects phi sources naming `original` to `end`.
    ///
    /// Used when the tail of block `original` is split off into `end`, so values that used to
    /// arrive from `original` now arrive from `end`.
    pub fn break_block(&mut self, original: BlockId, end: BlockId) {
        if let SsaInstruction::Phi { sources, .. } = self {
            for source in sources {
                if source.block == original {
                    source.block = end;
                }
            }
        }
    }
}

fn join(items: &[String]) -> String {
    items.join(", ")
}

fn join_ranges(items: &[RangeIndex]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for SsaInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SsaInstruction::Argument { output, index } => write!(f, "{output} = arg {index}"),
            SsaInstruction::Assignment { output, value } => write!(f, "{output} = {value}"),
            SsaInstruction::Phi { output, sources } => {
                let sources = sources
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{output} = phi {sources}")
            }
            SsaInstruction::Branch {
                condition,
                then_block,
                else_block,
                end_block,
            } => write!(
                f,
                "branch {condition}, #{then_block}, #{else_block}, #{end_block}"
            ),
            SsaInstruction::For {
                start,
                interval,
                end,
                loop_block,
                end_block,
            } => write!(
                f,
                "for {start}, {interval}, {end}, #{loop_block}, #{end_block}"
            ),
            SsaInstruction::Break => f.write_str("break"),
            SsaInstruction::Continue => f.write_str("continue"),
            SsaInstruction::Iter { output } => write!(f, "{output} = iter"),
            SsaInstruction::TypedCall {
                function,
                outputs,
                inputs,
                ..
            } => write_call(f, outputs, function, inputs, false),
            SsaInstruction::UntypedCall {
                function,
                outputs,
                inputs,
            } => write_call(f, outputs, function, inputs, true),
            SsaInstruction::MatrixGet {
                output,
                base,
                indices,
            } => write!(f, "{output} = get {base}({})", join(indices)),
            SsaInstruction::MatrixSet {
                output,
                base,
                indices,
                value,
            } => write!(f, "{output} = set {base}({}) = {value}", join(indices)),
            SsaInstruction::RangeGet {
                output,
                base,
                indices,
            } => write!(f, "{output} = range_get {base}({})", join_ranges(indices)),
            SsaInstruction::RangeSet {
                output,
                base,
                indices,
                value,
            } => write!(
                f,
                "{output} = range_set {base}({}) = {value}",
                join_ranges(indices)
            ),
            SsaInstruction::SimpleGet {
                output,
                base,
                indices,
            } => write!(f, "{output} = simple_get {base}({})", join(indices)),
            SsaInstruction::SimpleSet {
                output,
                base,
                indices,
                value,
            } => write!(
                f,
                "{output} = simple_set {base}({}) = {value}",
                join(indices)
            ),
            SsaInstruction::AccessSize {
                output,
                base,
                index,
            } => write!(f, "{output} = access_size {base}({index})"),
            SsaInstruction::End {
                output,
                base,
                axis,
                axis_count,
            } => write!(f, "{output} = end {base}, {axis}, {axis_count}"),
            SsaInstruction::ValidateEqual { left, right } => {
                write!(f, "validate_equal {left}, {right}")
            }
            SsaInstruction::String { output, value } => write!(f, "{output} = '{value}'"),
            SsaInstruction::Line { line } => write!(f, "line {line}"),
            SsaInstruction::Comment { text } => write!(f, "% {text}"),
        }
    }
}

fn write_call(
    f: &mut fmt::Formatter<'_>,
    outputs: &[String],
    function: &str,
    inputs: &[String],
    untyped: bool,
) -> fmt::Result {
    match outputs.len() {
        0 => {}
        1 => write!(f, "{} = ", outputs[0])?,
        _ => write!(f, "[{}] = ", join(outputs))?,
    }
    if untyped {
        f.write_str("untyped ")?;
    }
    f.write_str(function)?;
    if !inputs.is_empty() {
        write!(f, " {}", join(inputs))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_rendering() {
        let phi = SsaInstruction::Phi {
            output: "x$2".to_string(),
            sources: vec![PhiSource::new(0, "x$1"), PhiSource::new(2, "x$3")],
        };
        assert_eq!(phi.to_string(), "x$2 = phi #0:x$1, #2:x$3");

        let call = SsaInstruction::call(
            "min",
            FunctionSignature::default(),
            strings(&["m$1", "i$1"]),
            strings(&["A$1", "e$1", "d$1"]),
        );
        assert_eq!(call.to_string(), "[m$1, i$1] = min A$1, e$1, d$1");

        let range = SsaInstruction::RangeGet {
            output: "y$1".to_string(),
            base: "A$1".to_string(),
            indices: vec![
                RangeIndex::FullRange,
                RangeIndex::PartialRange {
                    start: "a$1".to_string(),
                    end: "b$1".to_string(),
                },
            ],
        };
        assert_eq!(range.to_string(), "y$1 = range_get A$1(:, a$1:b$1)");

        let undefined = SsaInstruction::Assignment {
            output: "u$1".to_string(),
            value: AssignedValue::Undefined,
        };
        assert_eq!(undefined.to_string(), "u$1 = !undefined");

        let number = SsaInstruction::Assignment {
            output: "n$1".to_string(),
            value: AssignedValue::Number(2.0),
        };
        assert_eq!(number.to_string(), "n$1 = 2");
    }

    #[test]
    fn test_inputs_and_outputs() {
        let set = SsaInstruction::SimpleSet {
            output: "B$1".to_string(),
            base: "A$1".to_string(),
            indices: strings(&["i$1", "j$1"]),
            value: "v$1".to_string(),
        };
        assert_eq!(set.outputs(), vec!["B$1"]);
        assert_eq!(set.inputs(), vec!["A$1", "i$1", "j$1", "v$1"]);
        assert!(set.uses("j$1"));
        assert!(!set.has_side_effects());
    }

    #[test]
    fn test_flags() {
        let branch = SsaInstruction::Branch {
            condition: "c$1".to_string(),
            then_block: 1,
            else_block: 2,
            end_block: 3,
        };
        assert!(branch.is_terminator());
        assert_eq!(branch.targets(), vec![1, 2, 3]);
        assert_eq!(branch.end_block(), Some(3));

        let untyped = SsaInstruction::UntypedCall {
            function: "disp".to_string(),
            outputs: Vec::new(),
            inputs: strings(&["x$1"]),
        };
        assert!(untyped.has_side_effects());
        assert!(SsaInstruction::Line { line: 3 }.is_metadata());
    }

    #[test]
    fn test_rename() {
        let mut instr = SsaInstruction::Phi {
            output: "x$2".to_string(),
            sources: vec![PhiSource::new(0, "x$1"), PhiSource::new(1, "x$3")],
        };
        let renames: HashMap<String, String> =
            [("x$1".to_string(), "y$1".to_string())].into_iter().collect();
        assert!(instr.rename_inputs(&renames));
        instr.break_block(1, 4);
        instr.rename_blocks(|b| b + 10);
        assert_eq!(instr.to_string(), "x$2 = phi #10:y$1, #14:x$3");
    }
}
