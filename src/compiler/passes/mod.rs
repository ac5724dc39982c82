//! The pass catalog.
//!
//! Every pass rewrites one [`FunctionInstance`](crate::analysis::FunctionInstance) in place,
//! reports whether it changed anything, and leaves the body valid SSA with every variable typed.
//!
//! | Identifier                           | Pass                                    |
//! |--------------------------------------|-----------------------------------------|
//! | `colon-elimination`                  | [`ColonEliminationPass`]                |
//! | `full-range-elimination`             | [`FullRangeEliminationPass`]            |
//! | `access-size-elimination`            | [`AccessSizeEliminationPass`]           |
//! | `multi-get-elimination`              | [`MultiGetEliminationPass`]             |
//! | `end-elimination`                    | [`EndEliminationPass`]                  |
//! | `horzcat-elimination`                | [`HorzcatEliminationPass`]              |
//! | `dot-reduction-elimination`          | [`DotReductionEliminationPass`]         |
//! | `cumulative-reduction-elimination`   | [`CumulativeReductionEliminationPass`]  |
//! | `min-max-reduction-elimination`      | [`MinMaxReductionEliminationPass`]      |
//! | `allocation-simplifier`              | [`AllocationSimplifierPass`]            |
//! | `allocation-value-elimination`       | [`AllocationValueEliminationPass`]      |
//! | `redundant-allocation-elimination`   | [`RedundantAllocationEliminationPass`]  |
//! | `trivial-loop-elimination`           | [`TrivialLoopEliminationPass`]          |
//! | `loop-fusion`                        | [`LoopFusionPass`]                      |
//! | `loop-interchange`                   | [`LoopInterchangePass`]                 |
//! | `constant-branch-elimination`        | [`ConstantBranchEliminationPass`]       |
//! | `redundant-assignment-elimination`   | [`RedundantAssignmentEliminationPass`]  |
//! | `dead-code-elimination`              | [`DeadCodeEliminationPass`]             |
//! | `block-reordering`                   | [`BlockReorderingPass`]                 |
//! | `ssa-validator`                      | [`SsaValidatorPass`]                    |

mod accesssize;
mod allocsimplifier;
mod allocvalue;
mod colon;
mod constbranch;
mod deadcode;
mod endelim;
mod fullrange;
mod fusion;
mod horzcat;
mod interchange;
mod multiget;
mod reduction;
mod redundantalloc;
mod redundantassign;
mod reorder;
mod trivialloop;
pub(crate) mod utils;
mod validate;

pub use accesssize::AccessSizeEliminationPass;
pub use allocsimplifier::AllocationSimplifierPass;
pub use allocvalue::AllocationValueEliminationPass;
pub use colon::ColonEliminationPass;
pub use constbranch::ConstantBranchEliminationPass;
pub use deadcode::DeadCodeEliminationPass;
pub use endelim::EndEliminationPass;
pub use fullrange::FullRangeEliminationPass;
pub use fusion::LoopFusionPass;
pub use horzcat::HorzcatEliminationPass;
pub use interchange::LoopInterchangePass;
pub use multiget::MultiGetEliminationPass;
pub use reduction::{
    CumulativeReductionEliminationPass, DotReductionEliminationPass,
    MinMaxReductionEliminationPass,
};
pub use redundantalloc::RedundantAllocationEliminationPass;
pub use redundantassign::RedundantAssignmentEliminationPass;
pub use reorder::BlockReorderingPass;
pub use trivialloop::TrivialLoopEliminationPass;
pub use validate::SsaValidatorPass;
