//! Structural SSA invariant checker.
//!
//! [`validate`] runs before the first pass of a recipe, optionally between passes, and after
//! the last one. A violation is fatal for the function being compiled.
//!
//! # Checks
//!
//! 1. Every variable is defined exactly once.
//! 2. Every block referenced by a terminator or phi source exists.
//! 3. Terminators are last in their block; phis lead their block (after metadata).
//! 4. Every phi has at least one source, no duplicated source block, and one source per
//!    predecessor of its (reachable) block.
//! 5. Every read variable is defined, and its definition dominates the read. A phi operand's
//!    definition must dominate the predecessor it flows in from.

use std::collections::{HashMap, HashSet};

use crate::{
    analysis::ssa::{
        cfg::SsaCfg,
        function::FunctionBody,
        instruction::{BlockId, SsaInstruction},
    },
    utils::graph::{
        algorithms::{compute_dominators, DominatorTree},
        NodeId,
    },
    Result,
};

/// Validates the SSA invariants of `body`.
///
/// # Errors
///
/// Returns [`crate::Error::MalformedInput`] describing the first violation found.
pub fn validate(body: &FunctionBody) -> Result<()> {
    SsaValidator::new(body).run()
}

struct SsaValidator<'a> {
    body: &'a FunctionBody,
    definitions: HashMap<&'a str, (BlockId, usize)>,
}

impl<'a> SsaValidator<'a> {
    fn new(body: &'a FunctionBody) -> Self {
        Self {
            body,
            definitions: HashMap::new(),
        }
    }

    fn run(mut self) -> Result<()> {
        if self.body.block_count() == 0 {
            return Err(malformed_error!(
                "function {} has no entry block",
                self.body.name()
            ));
        }

        self.collect_definitions()?;
        self.check_block_layout()?;

        let cfg = SsaCfg::from_body(self.body);
        let dominators = compute_dominators(&cfg, NodeId::new(0));

        self.check_phis(&cfg, &dominators)?;
        self.check_uses(&dominators)?;
        self.check_outputs()
    }

    fn collect_definitions(&mut self) -> Result<()> {
        let body = self.body;
        for (block_id, index, instruction) in body.instructions() {
            for output in instruction.outputs() {
                if let Some((prev_block, _)) = self.definitions.insert(output, (block_id, index)) {
                    return Err(malformed_error!(
                        "variable {} defined in #{} and again in #{}",
                        output,
                        prev_block,
                        block_id
                    ));
                }
            }
        }
        Ok(())
    }

    fn check_block_layout(&self) -> Result<()> {
        let count = self.body.block_count();
        for (block_id, block) in self.body.blocks().iter().enumerate() {
            let instructions = block.instructions();
            let mut seen_body = false;
            for (index, instruction) in instructions.iter().enumerate() {
                if instruction.is_terminator() && index + 1 != instructions.len() {
                    return Err(malformed_error!(
                        "terminator '{}' is not last in block #{}",
                        instruction,
                        block_id
                    ));
                }

                if instruction.is_phi() {
                    if seen_body {
                        return Err(malformed_error!(
                            "phi '{}' follows non-phi instructions in block #{}",
                            instruction,
                            block_id
                        ));
                    }
                } else if !instruction.is_metadata() {
                    seen_body = true;
                }

                for target in instruction.targets() {
                    if target >= count {
                        return Err(malformed_error!(
                            "'{}' in block #{} references missing block #{}",
                            instruction,
                            block_id,
                            target
                        ));
                    }
                }

                if let SsaInstruction::Phi { sources, .. } = instruction {
                    if let Some(source) = sources.iter().find(|s| s.block >= count) {
                        return Err(malformed_error!(
                            "phi '{}' references missing block #{}",
                            instruction,
                            source.block
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn check_phis(&self, cfg: &SsaCfg, dominators: &DominatorTree) -> Result<()> {
        for (block_id, block) in self.body.blocks().iter().enumerate() {
            let predecessors: HashSet<BlockId> =
                cfg.block_predecessors(block_id).into_iter().collect();
            let reachable = dominators.is_reachable(NodeId::new(block_id));

            for instruction in block.phis() {
                let SsaInstruction::Phi { sources, .. } = instruction else {
                    continue;
                };

                if sources.is_empty() {
                    return Err(malformed_error!(
                        "phi '{}' in block #{} has no sources",
                        instruction,
                        block_id
                    ));
                }

                let mut seen = HashSet::new();
                for source in sources {
                    if !seen.insert(source.block) {
                        return Err(malformed_error!(
                            "phi '{}' in block #{} names block #{} twice",
                            instruction,
                            block_id,
                            source.block
                        ));
                    }
                }

                if reachable && seen != predecessors {
                    let mut expected: Vec<_> = predecessors.iter().copied().collect();
                    expected.sort_unstable();
                    return Err(malformed_error!(
                        "phi '{}' in block #{} does not match predecessors {:?}",
                        instruction,
                        block_id,
                        expected
                    ));
                }
            }
        }
        Ok(())
    }

    fn check_uses(&self, dominators: &DominatorTree) -> Result<()> {
        for (block_id, index, instruction) in self.body.instructions() {
            if let SsaInstruction::Phi { sources, .. } = instruction {
                for source in sources {
                    let (def_block, _) = self.definition_of(&source.variable, instruction, block_id)?;
                    let pred = NodeId::new(source.block);
                    if dominators.is_reachable(pred)
                        && !dominators.dominates(NodeId::new(def_block), pred)
                    {
                        return Err(malformed_error!(
                            "phi operand {} of '{}' is not available at the end of block #{}",
                            source.variable,
                            instruction,
                            source.block
                        ));
                    }
                }
                continue;
            }

            for input in instruction.inputs() {
                let (def_block, def_index) = self.definition_of(input, instruction, block_id)?;
                let available = if def_block == block_id {
                    def_index < index
                } else {
                    let use_node = NodeId::new(block_id);
                    !dominators.is_reachable(use_node)
                        || dominators.dominates(NodeId::new(def_block), use_node)
                };

                if !available {
                    return Err(malformed_error!(
                        "{} is used by '{}' in block #{} before its definition dominates it",
                        input,
                        instruction,
                        block_id
                    ));
                }
            }
        }
        Ok(())
    }

    fn check_outputs(&self) -> Result<()> {
        for output in self.body.outputs() {
            if !self.definitions.contains_key(output.as_str()) {
                return Err(malformed_error!(
                    "function output {} is never defined",
                    output
                ));
            }
        }
        Ok(())
    }

    fn definition_of(
        &self,
        variable: &str,
        user: &SsaInstruction,
        block_id: BlockId,
    ) -> Result<(BlockId, usize)> {
        self.definitions.get(variable).copied().ok_or_else(|| {
            malformed_error!(
                "{} is used by '{}' in block #{} but never defined",
                variable,
                user,
                block_id
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{analysis::ssa::builder::FunctionBuilder, Error};

    fn assert_malformed(result: Result<()>, fragment: &str) {
        match result {
            Err(Error::MalformedInput { message, .. }) => {
                assert!(message.contains(fragment), "unexpected message: {message}");
            }
            other => panic!("expected malformed input, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_loop() {
        let instance = FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["x$1", "x$2", "x$3", "x$4", "n$1"]);
            f.outputs(&["x$4"]);
            f.block(0, |b| {
                b.number("one$1", 1.0);
                b.argument("n$1", 0);
                b.number("x$1", 0.0);
                b.for_loop("one$1", "one$1", "n$1", 1, 2);
            });
            f.block(1, |b| {
                b.phi("x$2", &[(0, "x$1"), (1, "x$3")]);
                b.iter("i$1");
                b.call("plus", &["x$3"], &["x$2", "i$1"]);
            });
            f.block(2, |b| {
                b.phi("x$4", &[(0, "x$1"), (1, "x$3")]);
            });
        });
        assert!(validate(&instance.body).is_ok());
    }

    #[test]
    fn test_double_definition() {
        let instance = FunctionBuilder::new("f").build_with(|f| {
            f.block(0, |b| {
                b.number("x$1", 1.0);
                b.number("x$1", 2.0);
            });
        });
        assert_malformed(validate(&instance.body), "defined in");
    }

    #[test]
    fn test_use_before_definition() {
        let instance = FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["y$1"]);
            f.block(0, |b| {
                b.assign("y$1", "x$1");
                b.number("x$1", 1.0);
            });
        });
        assert_malformed(validate(&instance.body), "before its definition");
    }

    #[test]
    fn test_undefined_variable() {
        let instance = FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["y$1"]);
            f.block(0, |b| b.assign("y$1", "missing$1"));
        });
        assert_malformed(validate(&instance.body), "never defined");
    }

    #[test]
    fn test_missing_block() {
        let instance = FunctionBuilder::new("f").build_with(|f| {
            f.logical("c$1");
            f.block(0, |b| {
                b.argument("c$1", 0);
                b.branch("c$1", 1, 2, 7);
            });
            f.block(2, |_| {});
        });
        assert_malformed(validate(&instance.body), "missing block #7");
    }

    #[test]
    fn test_phi_arity_mismatch() {
        let instance = FunctionBuilder::new("f").build_with(|f| {
            f.logical("c$1");
            f.block(0, |b| {
                b.argument("c$1", 0);
                b.number("x$1", 1.0);
                b.branch("c$1", 1, 2, 3);
            });
            f.block(1, |_| {});
            f.block(2, |_| {});
            f.block(3, |b| b.phi("x$2", &[(1, "x$1")]));
        });
        assert_malformed(validate(&instance.body), "does not match predecessors");
    }

    #[test]
    fn test_terminator_not_last() {
        let instance = FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["n$1"]);
            f.block(0, |b| {
                b.number("n$1", 1.0);
                b.for_loop("n$1", "n$1", "n$1", 1, 2);
                b.number("m$1", 1.0);
            });
            f.block(1, |_| {});
            f.block(2, |_| {});
        });
        assert_malformed(validate(&instance.body), "is not last");
    }

    #[test]
    fn test_arm_value_does_not_dominate_join() {
        let instance = FunctionBuilder::new("f").build_with(|f| {
            f.logical("c$1");
            f.scalars(&["y$1"]);
            f.block(0, |b| {
                b.argument("c$1", 0);
                b.branch("c$1", 1, 2, 3);
            });
            f.block(1, |b| b.number("x$1", 1.0));
            f.block(2, |_| {});
            f.block(3, |b| b.assign("y$1", "x$1"));
        });
        assert_malformed(validate(&instance.body), "before its definition");
    }
}
