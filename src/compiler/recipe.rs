//! Pass identifiers and recipes.
//!
//! A [`Recipe`] is an explicit ordered list of [`PassId`]s. Recipes are plain data: they can be
//! parsed from a configuration string, printed back, and instantiated into boxed passes for the
//! [`PassManager`](crate::compiler::PassManager).
//!
//! ```rust
//! use matssa::compiler::{PassId, Recipe};
//!
//! let recipe: Recipe = "dead-code-elimination, block-reordering".parse()?;
//! assert_eq!(recipe.len(), 2);
//! assert_eq!(recipe.iter().next(), Some(&PassId::DeadCodeElimination));
//! assert_eq!(recipe.to_string(), "dead-code-elimination, block-reordering");
//! # Ok::<(), matssa::Error>(())
//! ```

use std::{fmt, str::FromStr};

use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    compiler::{
        pass::SsaPass,
        passes::{
            AccessSizeEliminationPass, AllocationSimplifierPass, AllocationValueEliminationPass,
            BlockReorderingPass, ColonEliminationPass, ConstantBranchEliminationPass,
            CumulativeReductionEliminationPass, DeadCodeEliminationPass,
            DotReductionEliminationPass, EndEliminationPass, FullRangeEliminationPass,
            HorzcatEliminationPass, LoopFusionPass, LoopInterchangePass,
            MinMaxReductionEliminationPass, MultiGetEliminationPass,
            RedundantAllocationEliminationPass, RedundantAssignmentEliminationPass,
            SsaValidatorPass, TrivialLoopEliminationPass,
        },
    },
    Error, Result,
};

/// Identifier of a catalog pass.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum PassId {
    /// Rewrites `colon` indices of multi-index accesses into range accesses.
    ColonElimination,
    /// Replaces `:` axes of range accesses by explicit `1:end` ranges.
    FullRangeElimination,
    /// Computes `access_size` from static shapes or runtime checks.
    AccessSizeElimination,
    /// Lowers matrix-indexed and over/under-indexed reads.
    MultiGetElimination,
    /// Lowers `end` of an access to `numel`, `size` or a product of sizes.
    EndElimination,
    /// Expands row concatenations into allocation and element writes.
    HorzcatElimination,
    /// Expands `dot` of two vectors into an accumulator loop.
    DotReductionElimination,
    /// Expands `sum` and `mean` of vectors into accumulator loops.
    CumulativeReductionElimination,
    /// Expands `min`/`max` along a dimension into a loop nest.
    MinMaxReductionElimination,
    /// Reuses the arguments of the allocation a `size` vector came from.
    AllocationSimplifier,
    /// Drops the fill of allocations that a loop overwrites completely.
    AllocationValueElimination,
    /// Removes allocations only queried for their size.
    RedundantAllocationElimination,
    /// Removes loops that never run and inlines loops that run once.
    TrivialLoopElimination,
    /// Merges adjacent loops with equal bounds.
    LoopFusion,
    /// Swaps two-level nests to column-major traversal order.
    LoopInterchange,
    /// Inlines the taken arm of branches on constant conditions.
    ConstantBranchElimination,
    /// Merges variables that are plain copies of one another.
    RedundantAssignmentElimination,
    /// Removes pure instructions whose results are unused.
    DeadCodeElimination,
    /// Renumbers blocks densely in structured order.
    BlockReordering,
    /// Checks SSA invariants.
    SsaValidator,
}

impl PassId {
    /// Instantiates the pass this identifier names.
    #[must_use]
    pub fn create(self) -> Box<dyn SsaPass> {
        match self {
            PassId::ColonElimination => Box::new(ColonEliminationPass::new()),
            PassId::FullRangeElimination => Box::new(FullRangeEliminationPass::new()),
            PassId::AccessSizeElimination => Box::new(AccessSizeEliminationPass::new()),
            PassId::MultiGetElimination => Box::new(MultiGetEliminationPass::new()),
            PassId::EndElimination => Box::new(EndEliminationPass::new()),
            PassId::HorzcatElimination => Box::new(HorzcatEliminationPass::new()),
            PassId::DotReductionElimination => Box::new(DotReductionEliminationPass::new()),
            PassId::CumulativeReductionElimination => {
                Box::new(CumulativeReductionEliminationPass::new())
            }
            PassId::MinMaxReductionElimination => Box::new(MinMaxReductionEliminationPass::new()),
            PassId::AllocationSimplifier => Box::new(AllocationSimplifierPass::new()),
            PassId::AllocationValueElimination => Box::new(AllocationValueEliminationPass::new()),
            PassId::RedundantAllocationElimination => {
                Box::new(RedundantAllocationEliminationPass::new())
            }
            PassId::TrivialLoopElimination => Box::new(TrivialLoopEliminationPass::new()),
            PassId::LoopFusion => Box::new(LoopFusionPass::new()),
            PassId::LoopInterchange => Box::new(LoopInterchangePass::new()),
            PassId::ConstantBranchElimination => Box::new(ConstantBranchEliminationPass::new()),
            PassId::RedundantAssignmentElimination => {
                Box::new(RedundantAssignmentEliminationPass::new())
            }
            PassId::DeadCodeElimination => Box::new(DeadCodeEliminationPass::new()),
            PassId::BlockReordering => Box::new(BlockReorderingPass::new()),
            PassId::SsaValidator => Box::new(SsaValidatorPass::new()),
        }
    }

    /// Returns the identifier as written in recipes.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// An ordered list of passes, each run exactly once per invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Recipe {
    passes: Vec<PassId>,
}

impl Recipe {
    /// Creates a recipe from identifiers.
    #[must_use]
    pub fn new(passes: Vec<PassId>) -> Self {
        Self { passes }
    }

    /// The default post-type-inference pipeline.
    ///
    /// Accesses are normalized first, then reductions and concatenations become loops,
    /// loops are fused and interchanged, allocations are simplified, and the result is
    /// cleaned up and renumbered.
    #[must_use]
    pub fn optimizing() -> Self {
        use PassId::*;
        Self::new(vec![
            SsaValidator,
            DeadCodeElimination,
            ConstantBranchElimination,
            HorzcatElimination,
            FullRangeElimination,
            ColonElimination,
            MultiGetElimination,
            TrivialLoopElimination,
            DotReductionElimination,
            CumulativeReductionElimination,
            MinMaxReductionElimination,
            DeadCodeElimination,
            AllocationValueElimination,
            SsaValidator,
            HorzcatElimination,
            TrivialLoopElimination,
            BlockReordering,
            LoopInterchange,
            LoopFusion,
            SsaValidator,
            AllocationSimplifier,
            AccessSizeElimination,
            DeadCodeElimination,
            RedundantAllocationElimination,
            DeadCodeElimination,
            LoopInterchange,
            SsaValidator,
            MultiGetElimination,
            FullRangeElimination,
            EndElimination,
            AccessSizeElimination,
            RedundantAssignmentElimination,
            DeadCodeElimination,
            BlockReordering,
        ])
    }

    /// Dead-code elimination followed by block reordering.
    #[must_use]
    pub fn cleanup() -> Self {
        Self::new(vec![PassId::DeadCodeElimination, PassId::BlockReordering])
    }

    /// Parses a list of identifiers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownPass`] for the first identifier that names no pass.
    pub fn from_ids(ids: &[&str]) -> Result<Self> {
        ids.iter()
            .map(|id| PassId::from_str(id.trim()).map_err(|_| Error::UnknownPass((*id).to_string())))
            .collect::<Result<Vec<_>>>()
            .map(Self::new)
    }

    /// Returns the number of passes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    /// Returns `true` if the recipe runs no pass.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Iterates over the identifiers in order.
    pub fn iter(&self) -> std::slice::Iter<'_, PassId> {
        self.passes.iter()
    }

    /// Appends a pass.
    pub fn push(&mut self, pass: PassId) {
        self.passes.push(pass);
    }

    /// Instantiates every pass in order.
    #[must_use]
    pub fn instantiate(&self) -> Vec<Box<dyn SsaPass>> {
        self.passes.iter().map(|id| id.create()).collect()
    }
}

impl FromStr for Recipe {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let ids: Vec<&str> = s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|id| !id.is_empty())
            .collect();
        Self::from_ids(&ids)
    }
}

impl fmt::Display for Recipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<&str> = self.passes.iter().map(|id| id.as_str()).collect();
        f.write_str(&ids.join(", "))
    }
}

impl<'a> IntoIterator for &'a Recipe {
    type Item = &'a PassId;
    type IntoIter = std::slice::Iter<'a, PassId>;

    fn into_iter(self) -> Self::IntoIter {
        self.passes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_identifiers_round_trip() {
        for id in PassId::iter() {
            let text = id.to_string();
            assert_eq!(PassId::from_str(&text).ok(), Some(id));
            assert_eq!(id.create().name(), text);
        }
        assert_eq!(PassId::LoopFusion.as_str(), "loop-fusion");
    }

    #[test]
    fn test_unknown_identifier() {
        match "loop-fusion warp-drive".parse::<Recipe>() {
            Err(Error::UnknownPass(id)) => assert_eq!(id, "warp-drive"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_mixed_separators() {
        let recipe: Recipe = " loop-fusion,,\n ssa-validator ,block-reordering"
            .parse()
            .expect("valid recipe");
        assert_eq!(
            recipe.iter().copied().collect::<Vec<_>>(),
            vec![PassId::LoopFusion, PassId::SsaValidator, PassId::BlockReordering]
        );
    }

    #[test]
    fn test_optimizing_recipe_shape() {
        let recipe = Recipe::optimizing();
        assert_eq!(recipe.iter().next(), Some(&PassId::SsaValidator));
        assert_eq!(recipe.iter().last(), Some(&PassId::BlockReordering));
        for id in PassId::iter() {
            assert!(recipe.iter().any(|p| *p == id), "{id} missing");
        }
        assert_eq!(recipe.instantiate().len(), recipe.len());
    }

    #[test]
    fn test_end_lowered_after_last_full_range() {
        let passes = Recipe::optimizing().iter().copied().collect::<Vec<_>>();
        let last_full_range = passes
            .iter()
            .rposition(|p| *p == PassId::FullRangeElimination)
            .expect("full-range-elimination scheduled");
        let end = passes
            .iter()
            .position(|p| *p == PassId::EndElimination)
            .expect("end-elimination scheduled");
        assert!(end > last_full_range);
    }
}
