//! Instruction emission for rewriting passes.
//!
//! A [`BlockEditor`] appends instructions to a "current" block of a [`FunctionInstance`].
//! Structured control flow is created with [`BlockEditor::make_for_loop`] and
//! [`BlockEditor::make_branch`], which allocate fresh blocks and move the current block into
//! the new body or arm. Every emitted call is resolved through the [`FunctionRegistry`] and
//! every new variable is registered in the type map, so the instance stays fully typed.
//!
//! The usual way to replace one instruction is [`BlockEditor::split_at`]: the instruction is
//! removed, the instructions after it are set aside, new code is emitted, and
//! [`BlockEditor::finish`] appends the set-aside tail to whatever block is current at the end.
//! If the emitted code introduced control flow, phi sources naming the original block are
//! redirected to the final block, because the original edges now leave from there.
//!
//! ```text
//! block #3:  a = ...                 block #3:  a = ...
//!            y = sum x       ==>                s0 = 0
//!            z = plus y, a                      for one, one, n, #7, #8
//!                                    block #7:  ...accumulate...
//!                                    block #8:  y = phi #3:s0, #7:s2
//!                                               z = plus y, a
//! ```

use crate::{
    analysis::{
        AssignedValue, BlockId, ElementKind, FunctionInstance, PhiSource, SsaBlock,
        SsaInstruction, VarType,
    },
    compiler::providers::{FunctionRegistry, ProviderData},
    Result,
};

/// Blocks created by [`BlockEditor::make_for_loop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopBlocks {
    /// Block ending with the new `for`
    pub container: BlockId,
    /// First block of the loop body
    pub loop_block: BlockId,
    /// Block executed after the loop
    pub end_block: BlockId,
}

/// Blocks created by [`BlockEditor::make_branch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchBlocks {
    /// Block ending with the new `branch`
    pub container: BlockId,
    /// First block of the then arm
    pub then_block: BlockId,
    /// First block of the else arm
    pub else_block: BlockId,
    /// Join block
    pub end_block: BlockId,
}

/// Emits typed instructions into a function body.
pub struct BlockEditor<'a> {
    instance: &'a mut FunctionInstance,
    registry: &'a FunctionRegistry,
    /// Block the edit started in
    origin: BlockId,
    /// Number of blocks before the edit; later blocks are new
    preexisting: usize,
    /// Block receiving new instructions
    current: BlockId,
    /// Instructions set aside by `split_at`
    tail: Vec<SsaInstruction>,
}

impl<'a> BlockEditor<'a> {
    /// Creates an editor appending to the end of `block`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedInput`] if `block` does not exist.
    pub fn new(
        instance: &'a mut FunctionInstance,
        registry: &'a FunctionRegistry,
        block: BlockId,
    ) -> Result<Self> {
        if instance.body.block(block).is_none() {
            return Err(malformed_error!("block #{} does not exist", block));
        }
        let preexisting = instance.body.block_count();
        Ok(Self {
            instance,
            registry,
            origin: block,
            preexisting,
            current: block,
            tail: Vec::new(),
        })
    }

    /// Removes the instruction at `index` of `block` and sets aside everything after it.
    ///
    /// New instructions are emitted where the removed one was; [`finish`](Self::finish)
    /// restores the tail.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedInput`] if the location does not exist.
    pub fn split_at(
        instance: &'a mut FunctionInstance,
        registry: &'a FunctionRegistry,
        block: BlockId,
        index: usize,
    ) -> Result<(Self, SsaInstruction)> {
        let instructions = instance
            .body
            .block_mut(block)
            .ok_or_else(|| malformed_error!("block #{} does not exist", block))?
            .instructions_mut();
        if index >= instructions.len() {
            return Err(malformed_error!(
                "block #{} has no instruction {}",
                block,
                index
            ));
        }
        let tail = instructions.split_off(index + 1);
        let removed = instructions.remove(index);

        let mut editor = Self::new(instance, registry, block)?;
        editor.tail = tail;
        Ok((editor, removed))
    }

    /// Returns the instance being edited.
    #[must_use]
    pub fn instance(&self) -> &FunctionInstance {
        &*self.instance
    }

    /// Returns the function registry.
    #[must_use]
    pub fn registry(&self) -> &FunctionRegistry {
        self.registry
    }

    /// Returns the block receiving new instructions.
    #[must_use]
    pub fn current_block(&self) -> BlockId {
        self.current
    }

    /// Moves emission to `block`.
    pub fn set_current(&mut self, block: BlockId) {
        self.current = block;
    }

    fn block_mut(&mut self, block: BlockId) -> Result<&mut SsaBlock> {
        self.instance
            .body
            .block_mut(block)
            .ok_or_else(|| malformed_error!("block #{} does not exist", block))
    }

    /// Returns the type of `variable`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedInput`] if the variable has no type.
    pub fn type_of(&self, variable: &str) -> Result<VarType> {
        self.instance.type_of(variable).cloned()
    }

    /// Creates a fresh variable of the given type.
    pub fn temporary(&mut self, semantics: &str, ty: VarType) -> String {
        self.instance.make_temporary(semantics, ty)
    }

    /// Appends an instruction to the current block.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedInput`] if the current block does not exist.
    pub fn add(&mut self, instruction: SsaInstruction) -> Result<()> {
        let current = self.current;
        self.block_mut(current)?.add(instruction);
        Ok(())
    }

    /// Emits `$semantics$n = value` typed as a double constant.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedInput`] if the current block does not exist.
    pub fn add_number(&mut self, semantics: &str, value: f64) -> Result<String> {
        let output = self.temporary(semantics, VarType::constant(ElementKind::Double, value));
        self.add(SsaInstruction::Assignment {
            output: output.clone(),
            value: AssignedValue::Number(value),
        })?;
        Ok(output)
    }

    /// Emits `output = input` for an existing `output`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedInput`] if the current block does not exist.
    pub fn add_copy(&mut self, output: &str, input: &str) -> Result<()> {
        self.add(SsaInstruction::copy(output, input))
    }

    fn input_types(&self, inputs: &[&str]) -> Result<Vec<VarType>> {
        inputs.iter().map(|input| self.type_of(input)).collect()
    }

    fn call_instruction(
        function: &str,
        signature: crate::analysis::FunctionSignature,
        outputs: Vec<String>,
        inputs: &[&str],
    ) -> SsaInstruction {
        SsaInstruction::call(
            function,
            signature,
            outputs,
            inputs.iter().map(ToString::to_string).collect(),
        )
    }

    /// Emits a single-result call into a fresh variable typed by the registry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnresolvableFunction`] if the registry rejects the call.
    pub fn add_call(&mut self, semantics: &str, function: &str, inputs: &[&str]) -> Result<String> {
        let mut outputs = self.add_call_outputs(&[semantics], function, inputs)?;
        outputs
            .pop()
            .ok_or_else(|| malformed_error!("call to {} produced no result", function))
    }

    /// Emits a call with one fresh variable per entry of `semantics`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnresolvableFunction`] if the registry rejects the call.
    pub fn add_call_outputs(
        &mut self,
        semantics: &[&str],
        function: &str,
        inputs: &[&str],
    ) -> Result<Vec<String>> {
        let data = ProviderData::new(self.input_types(inputs)?).with_output_count(semantics.len());
        let signature = self.registry.resolve(function, &data)?;
        let outputs: Vec<String> = semantics
            .iter()
            .zip(&signature.outputs)
            .map(|(name, ty)| self.instance.make_temporary(name, ty.clone()))
            .collect();
        self.add(Self::call_instruction(
            function,
            signature,
            outputs.clone(),
            inputs,
        ))?;
        Ok(outputs)
    }

    /// Emits a call binding existing variables; their types are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnresolvableFunction`] if the registry rejects the call, or
    /// [`crate::Error::MalformedInput`] if an output has no type.
    pub fn add_call_into(&mut self, function: &str, outputs: &[&str], inputs: &[&str]) -> Result<()> {
        let output_types = self.input_types(outputs)?;
        let data = ProviderData::new(self.input_types(inputs)?).with_outputs(output_types);
        let signature = self.registry.resolve(function, &data)?;
        self.add(Self::call_instruction(
            function,
            signature,
            outputs.iter().map(ToString::to_string).collect(),
            inputs,
        ))
    }

    /// Emits an unchecked scalar read `simple_get base(indices)`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedInput`] if `base` has no type.
    pub fn add_simple_get(&mut self, semantics: &str, base: &str, indices: &[&str]) -> Result<String> {
        let ty = self.type_of(base)?.element_scalar();
        let output = self.temporary(semantics, ty);
        self.add(SsaInstruction::SimpleGet {
            output: output.clone(),
            base: base.to_string(),
            indices: indices.iter().map(ToString::to_string).collect(),
        })?;
        Ok(output)
    }

    /// Emits a checked scalar read `get base(indices)`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedInput`] if `base` has no type.
    pub fn add_get(&mut self, semantics: &str, base: &str, indices: &[&str]) -> Result<String> {
        let ty = self.type_of(base)?.element_scalar();
        let output = self.temporary(semantics, ty);
        self.add(SsaInstruction::MatrixGet {
            output: output.clone(),
            base: base.to_string(),
            indices: indices.iter().map(ToString::to_string).collect(),
        })?;
        Ok(output)
    }

    /// Emits an unchecked scalar write producing a fresh matrix of `base`'s type.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedInput`] if `base` has no type.
    pub fn add_simple_set(
        &mut self,
        semantics: &str,
        base: &str,
        indices: &[&str],
        value: &str,
    ) -> Result<String> {
        let ty = self.type_of(base)?;
        let output = self.temporary(semantics, ty);
        self.add(SsaInstruction::SimpleSet {
            output: output.clone(),
            base: base.to_string(),
            indices: indices.iter().map(ToString::to_string).collect(),
            value: value.to_string(),
        })?;
        Ok(output)
    }

    /// Emits the value of `end` for `axis` of an access with `axis_count` indices.
    ///
    /// When the rank of `base` is known and `axis` is at or past it, the value is the
    /// constant 1.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedInput`] if `base` has no type.
    pub fn add_make_end(&mut self, base: &str, axis: usize, axis_count: usize) -> Result<String> {
        let rank = self.type_of(base)?.shape().and_then(|s| s.rank());
        if rank.is_some_and(|r| axis >= r) {
            return self.add_number("one", 1.0);
        }
        let output = self.temporary("end", VarType::double());
        self.add(SsaInstruction::End {
            output: output.clone(),
            base: base.to_string(),
            axis,
            axis_count,
        })?;
        Ok(output)
    }

    /// Emits `$semantics$n = iter` typed as a double.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedInput`] if the current block does not exist.
    pub fn add_iter(&mut self, semantics: &str) -> Result<String> {
        let output = self.temporary(semantics, VarType::double());
        self.add(SsaInstruction::Iter {
            output: output.clone(),
        })?;
        Ok(output)
    }

    /// Emits `validate_equal left, right`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedInput`] if the current block does not exist.
    pub fn add_validate_equal(&mut self, left: &str, right: &str) -> Result<()> {
        self.add(SsaInstruction::ValidateEqual {
            left: left.to_string(),
            right: right.to_string(),
        })
    }

    /// Inserts `output = phi sources` after the existing phis of `block`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedInput`] if `block` does not exist.
    pub fn insert_phi(&mut self, block: BlockId, output: &str, sources: Vec<PhiSource>) -> Result<()> {
        let target = self.block_mut(block)?;
        let position = target.phi_insertion_point();
        target.insert(
            position,
            SsaInstruction::Phi {
                output: output.to_string(),
                sources,
            },
        );
        Ok(())
    }

    /// Ends the current block with `for start, interval, end` and moves emission into the
    /// new loop body. Call [`set_current`](Self::set_current) with the returned end block once
    /// the body is complete.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedInput`] if the current block does not exist.
    pub fn make_for_loop(&mut self, start: &str, interval: &str, end: &str) -> Result<LoopBlocks> {
        let container = self.current;
        let loop_block = self.instance.body.add_block();
        let end_block = self.instance.body.add_block();
        self.add(SsaInstruction::For {
            start: start.to_string(),
            interval: interval.to_string(),
            end: end.to_string(),
            loop_block,
            end_block,
        })?;
        self.current = loop_block;
        Ok(LoopBlocks {
            container,
            loop_block,
            end_block,
        })
    }

    /// Ends the current block with `branch condition` and moves emission into the then arm.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedInput`] if the current block does not exist.
    pub fn make_branch(&mut self, condition: &str) -> Result<BranchBlocks> {
        let container = self.current;
        let then_block = self.instance.body.add_block();
        let else_block = self.instance.body.add_block();
        let end_block = self.instance.body.add_block();
        self.add(SsaInstruction::Branch {
            condition: condition.to_string(),
            then_block,
            else_block,
            end_block,
        })?;
        self.current = then_block;
        Ok(BranchBlocks {
            container,
            then_block,
            else_block,
            end_block,
        })
    }

    /// Emits a two-armed branch on `condition` whose arms each compute one value, merged by a
    /// phi of type `ty` in the join block. Emission continues in the join block.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by either arm.
    pub fn add_branch_merge(
        &mut self,
        condition: &str,
        semantics: &str,
        ty: VarType,
        then_arm: impl FnOnce(&mut Self) -> Result<String>,
        else_arm: impl FnOnce(&mut Self) -> Result<String>,
    ) -> Result<String> {
        let blocks = self.make_branch(condition)?;
        let then_value = then_arm(self)?;
        let then_end = self.current;

        self.current = blocks.else_block;
        let else_value = else_arm(self)?;
        let else_end = self.current;

        self.current = blocks.end_block;
        let merged = self.temporary(semantics, ty);
        self.insert_phi(
            blocks.end_block,
            &merged,
            vec![
                PhiSource::new(then_end, then_value),
                PhiSource::new(else_end, else_value),
            ],
        )?;
        Ok(merged)
    }

    /// Restores the set-aside tail into the current block and returns that block.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MalformedInput`] if the current block does not exist.
    pub fn finish(mut self) -> Result<BlockId> {
        let current = self.current;
        let tail = std::mem::take(&mut self.tail);
        self.block_mut(current)?.instructions_mut().extend(tail);

        if current != self.origin {
            let origin = self.origin;
            for block in self.instance.body.blocks_mut().iter_mut().take(self.preexisting) {
                for instruction in block.instructions_mut() {
                    instruction.break_block(origin, current);
                }
            }
        }
        Ok(current)
    }
}
