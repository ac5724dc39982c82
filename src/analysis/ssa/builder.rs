//! Closure-based construction of typed function bodies.
//!
//! Tests and benchmarks describe fixtures block by block:
//!
//! ```rust
//! use matssa::analysis::{FunctionBuilder, Shape};
//!
//! let instance = FunctionBuilder::new("total").build_with(|f| {
//!     f.matrix("A$1", Shape::row(None));
//!     f.scalars(&["y$1"]);
//!     f.outputs(&["y$1"]);
//!     f.block(0, |b| {
//!         b.argument("A$1", 0);
//!         b.call("sum", &["y$1"], &["A$1"]);
//!     });
//! });
//! assert_eq!(instance.body.block_count(), 1);
//! ```
//!
//! Literal numbers, `iter` outputs and strings are typed automatically when the fixture does
//! not declare them. Typed calls get their signature from the declared types of their
//! arguments and results once the whole body is built.

use crate::analysis::ssa::{
    block::SsaBlock,
    function::{FunctionBody, FunctionInstance},
    instruction::{
        AssignedValue, BlockId, FunctionSignature, PhiSource, RangeIndex, SsaInstruction,
    },
    typemap::TypeMap,
    types::{ElementKind, Shape, VarType},
};

/// Entry point for building a [`FunctionInstance`].
pub struct FunctionBuilder {
    name: String,
}

impl FunctionBuilder {
    /// Starts building a function called `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Runs `build` against a fresh function scope and returns the finished instance.
    pub fn build_with(self, build: impl FnOnce(&mut FunctionScope)) -> FunctionInstance {
        let mut scope = FunctionScope {
            blocks: vec![SsaBlock::new()],
            types: TypeMap::new(),
            outputs: Vec::new(),
        };
        build(&mut scope);

        let FunctionScope {
            mut blocks,
            types,
            outputs,
        } = scope;

        for block in &mut blocks {
            for instruction in block.instructions_mut() {
                if let SsaInstruction::TypedCall {
                    signature,
                    outputs,
                    inputs,
                    ..
                } = instruction
                {
                    let lookup = |name: &String| {
                        types.get(name).cloned().unwrap_or_else(VarType::double)
                    };
                    signature.inputs = inputs.iter().map(lookup).collect();
                    signature.outputs = outputs.iter().map(lookup).collect();
                }
            }
        }

        let mut body = FunctionBody::from_blocks(self.name, blocks);
        body.set_outputs(outputs);
        FunctionInstance::new(body, types)
    }
}

/// Function-level fixture state: declared types, outputs and blocks.
pub struct FunctionScope {
    blocks: Vec<SsaBlock>,
    types: TypeMap,
    outputs: Vec<String>,
}

impl FunctionScope {
    /// Declares the type of a variable.
    pub fn var(&mut self, name: &str, ty: VarType) {
        self.types.insert(name, ty);
    }

    /// Declares double scalars.
    pub fn scalars(&mut self, names: &[&str]) {
        for name in names {
            self.types.insert(*name, VarType::double());
        }
    }

    /// Declares a logical scalar.
    pub fn logical(&mut self, name: &str) {
        self.types.insert(name, VarType::logical());
    }

    /// Declares a double matrix of the given shape.
    pub fn matrix(&mut self, name: &str, shape: Shape) {
        self.types
            .insert(name, VarType::matrix(ElementKind::Double, shape));
    }

    /// Sets the variables returned by the function.
    pub fn outputs(&mut self, names: &[&str]) {
        self.outputs = names.iter().map(ToString::to_string).collect();
    }

    /// Fills block `id`, creating it and any missing lower-numbered blocks.
    pub fn block(&mut self, id: BlockId, build: impl FnOnce(&mut BlockScope<'_>)) {
        while self.blocks.len() <= id {
            self.blocks.push(SsaBlock::new());
        }
        let mut scope = BlockScope {
            block: &mut self.blocks[id],
            types: &mut self.types,
        };
        build(&mut scope);
    }
}

/// Block-level fixture state.
pub struct BlockScope<'a> {
    block: &'a mut SsaBlock,
    types: &'a mut TypeMap,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

impl BlockScope<'_> {
    fn type_if_missing(&mut self, name: &str, ty: VarType) {
        if !self.types.contains(name) {
            self.types.insert(name, ty);
        }
    }

    /// Appends an arbitrary instruction.
    pub fn push(&mut self, instruction: SsaInstruction) {
        self.block.add(instruction);
    }

    /// `output = arg index`
    pub fn argument(&mut self, output: &str, index: usize) {
        self.push(SsaInstruction::Argument {
            output: output.to_string(),
            index,
        });
    }

    /// `output = value`; typed as a double constant unless declared.
    pub fn number(&mut self, output: &str, value: f64) {
        self.type_if_missing(output, VarType::constant(ElementKind::Double, value));
        self.push(SsaInstruction::Assignment {
            output: output.to_string(),
            value: AssignedValue::Number(value),
        });
    }

    /// `output = input`
    pub fn assign(&mut self, output: &str, input: &str) {
        self.push(SsaInstruction::copy(output, input));
    }

    /// `output = !undefined`
    pub fn undefined(&mut self, output: &str) {
        self.push(SsaInstruction::Assignment {
            output: output.to_string(),
            value: AssignedValue::Undefined,
        });
    }

    /// `output = phi #b:v, ...`
    pub fn phi(&mut self, output: &str, sources: &[(BlockId, &str)]) {
        self.push(SsaInstruction::Phi {
            output: output.to_string(),
            sources: sources
                .iter()
                .map(|(block, variable)| PhiSource::new(*block, *variable))
                .collect(),
        });
    }

    /// `branch condition, #then, #else, #end`
    pub fn branch(&mut self, condition: &str, then_block: BlockId, else_block: BlockId, end_block: BlockId) {
        self.push(SsaInstruction::Branch {
            condition: condition.to_string(),
            then_block,
            else_block,
            end_block,
        });
    }

    /// `for start, interval, end, #loop, #end`
    pub fn for_loop(&mut self, start: &str, interval: &str, end: &str, loop_block: BlockId, end_block: BlockId) {
        self.push(SsaInstruction::For {
            start: start.to_string(),
            interval: interval.to_string(),
            end: end.to_string(),
            loop_block,
            end_block,
        });
    }

    /// `break`
    pub fn brk(&mut self) {
        self.push(SsaInstruction::Break);
    }

    /// `continue`
    pub fn cont(&mut self) {
        self.push(SsaInstruction::Continue);
    }

    /// `output = iter`; typed as a double scalar unless declared.
    pub fn iter(&mut self, output: &str) {
        self.type_if_missing(output, VarType::double());
        self.push(SsaInstruction::Iter {
            output: output.to_string(),
        });
    }

    /// Side-effect free typed call.
    pub fn call(&mut self, function: &str, outputs: &[&str], inputs: &[&str]) {
        self.push(SsaInstruction::call(
            function,
            FunctionSignature::default(),
            strings(outputs),
            strings(inputs),
        ));
    }

    /// Typed call whose callee has side effects.
    pub fn effect_call(&mut self, function: &str, outputs: &[&str], inputs: &[&str]) {
        self.push(SsaInstruction::TypedCall {
            function: function.to_string(),
            signature: FunctionSignature {
                side_effects: true,
                ..FunctionSignature::default()
            },
            outputs: strings(outputs),
            inputs: strings(inputs),
        });
    }

    /// Untyped call.
    pub fn untyped(&mut self, function: &str, outputs: &[&str], inputs: &[&str]) {
        self.push(SsaInstruction::UntypedCall {
            function: function.to_string(),
            outputs: strings(outputs),
            inputs: strings(inputs),
        });
    }

    /// `output = get base(indices)`
    pub fn get(&mut self, output: &str, base: &str, indices: &[&str]) {
        self.push(SsaInstruction::MatrixGet {
            output: output.to_string(),
            base: base.to_string(),
            indices: strings(indices),
        });
    }

    /// `output = set base(indices) = value`
    pub fn set(&mut self, output: &str, base: &str, indices: &[&str], value: &str) {
        self.push(SsaInstruction::MatrixSet {
            output: output.to_string(),
            base: base.to_string(),
            indices: strings(indices),
            value: value.to_string(),
        });
    }

    /// `output = range_get base(indices)`
    pub fn range_get(&mut self, output: &str, base: &str, indices: Vec<RangeIndex>) {
        self.push(SsaInstruction::RangeGet {
            output: output.to_string(),
            base: base.to_string(),
            indices,
        });
    }

    /// `output = range_set base(indices) = value`
    pub fn range_set(&mut self, output: &str, base: &str, indices: Vec<RangeIndex>, value: &str) {
        self.push(SsaInstruction::RangeSet {
            output: output.to_string(),
            base: base.to_string(),
            indices,
            value: value.to_string(),
        });
    }

    /// `output = simple_get base(indices)`
    pub fn simple_get(&mut self, output: &str, base: &str, indices: &[&str]) {
        self.push(SsaInstruction::SimpleGet {
            output: output.to_string(),
            base: base.to_string(),
            indices: strings(indices),
        });
    }

    /// `output = simple_set base(indices) = value`
    pub fn simple_set(&mut self, output: &str, base: &str, indices: &[&str], value: &str) {
        self.push(SsaInstruction::SimpleSet {
            output: output.to_string(),
            base: base.to_string(),
            indices: strings(indices),
            value: value.to_string(),
        });
    }

    /// `output = access_size base(index)`
    pub fn access_size(&mut self, output: &str, base: &str, index: &str) {
        self.push(SsaInstruction::AccessSize {
            output: output.to_string(),
            base: base.to_string(),
            index: index.to_string(),
        });
    }

    /// `output = end base, axis, axis_count`
    pub fn end(&mut self, output: &str, base: &str, axis: usize, axis_count: usize) {
        self.push(SsaInstruction::End {
            output: output.to_string(),
            base: base.to_string(),
            axis,
            axis_count,
        });
    }

    /// `validate_equal left, right`
    pub fn validate_equal(&mut self, left: &str, right: &str) {
        self.push(SsaInstruction::ValidateEqual {
            left: left.to_string(),
            right: right.to_string(),
        });
    }

    /// `output = 'value'`
    pub fn string(&mut self, output: &str, value: &str) {
        self.type_if_missing(output, VarType::String);
        self.push(SsaInstruction::String {
            output: output.to_string(),
            value: value.to_string(),
        });
    }

    /// `line n`
    pub fn line(&mut self, line: usize) {
        self.push(SsaInstruction::Line { line });
    }

    /// `% text`
    pub fn comment(&mut self, text: &str) {
        self.push(SsaInstruction::Comment {
            text: text.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_fills_signatures() {
        let instance = FunctionBuilder::new("f").build_with(|f| {
            f.matrix("A$1", Shape::row(None));
            f.scalars(&["n$1"]);
            f.block(0, |b| {
                b.argument("A$1", 0);
                b.call("numel", &["n$1"], &["A$1"]);
            });
        });
        let Some(SsaInstruction::TypedCall { signature, .. }) =
            instance.body.defining_instruction("n$1")
        else {
            panic!("expected typed call");
        };
        assert_eq!(signature.inputs, vec![VarType::matrix(ElementKind::Double, Shape::row(None))]);
        assert_eq!(signature.outputs, vec![VarType::double()]);
    }

    #[test]
    fn test_builder_creates_blocks_and_auto_types() {
        let instance = FunctionBuilder::new("f").build_with(|f| {
            f.block(2, |b| {
                b.number("x$1", 3.0);
                b.string("s$1", "hi");
            });
        });
        assert_eq!(instance.body.block_count(), 3);
        assert_eq!(
            instance.types.get("x$1"),
            Some(&VarType::constant(ElementKind::Double, 3.0))
        );
        assert_eq!(instance.types.get("s$1"), Some(&VarType::String));
    }
}
