//! Compiler infrastructure for SSA-based code transformations.
//!
//! This module sits between type inference and the native backend:
//!
//! - [`crate::analysis`] - typed SSA form, validator, CFG, def-use and value analyses
//! - [`compiler`](self) - the pass contract, function registry, recipes and the pass catalog
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Compiler Pipeline                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  CompilerContext              Shared per-run state               │
//! │    ├─ FunctionRegistry        (signature oracle, memoized)       │
//! │    └─ EventLog                (append-only, thread-safe)         │
//! │                                                                  │
//! │  PassManager                 Runs a Recipe once, in order        │
//! │    ├─ validate input          (TypedReady)                       │
//! │    ├─ pass 1 .. pass n        (each reports changed / unchanged) │
//! │    ├─ validate output         (Validated)                        │
//! │    └─ hand to backend         (HandedToBackend)                  │
//! │                                                                  │
//! │  SsaPass trait               Interface for all passes            │
//! │    ├─ run_on_function()       Per-function transformation        │
//! │    ├─ initialize()            One-time setup before pipeline     │
//! │    └─ finalize()              Cleanup after pipeline completes   │
//! │                                                                  │
//! │  Passes (20 built-in)        Transformations                     │
//! │    ├─ Access: colon, full range, access size, multi get, end     │
//! │    ├─ Expansion: horzcat, dot, sum/mean, min/max                 │
//! │    ├─ Allocation: simplifier, value, redundant                   │
//! │    ├─ Loops: trivial loop, fusion, interchange                   │
//! │    ├─ Branches: constant branch                                  │
//! │    └─ Cleanup: DCE, copies, block reordering, validator          │
//! │                                                                  │
//! │  BlockEditor                 Structured code emission            │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

mod builtins;
mod context;
mod editor;
mod events;
mod pass;
mod passes;
mod providers;
mod recipe;
mod scheduler;

pub use context::CompilerContext;
pub use editor::{BlockEditor, BranchBlocks, LoopBlocks};
pub use events::{Event, EventKind, EventLog};
pub use pass::SsaPass;
pub use passes::{
    AccessSizeEliminationPass, AllocationSimplifierPass, AllocationValueEliminationPass,
    BlockReorderingPass, ColonEliminationPass, ConstantBranchEliminationPass,
    CumulativeReductionEliminationPass, DeadCodeEliminationPass, DotReductionEliminationPass,
    EndEliminationPass, FullRangeEliminationPass, HorzcatEliminationPass, LoopFusionPass,
    LoopInterchangePass, MinMaxReductionEliminationPass, MultiGetEliminationPass,
    RedundantAllocationEliminationPass, RedundantAssignmentEliminationPass, SsaValidatorPass,
    TrivialLoopEliminationPass,
};
pub use providers::{FunctionRegistry, Implementation, InstanceProvider, ProviderData};
pub use recipe::{PassId, Recipe};
pub use scheduler::{PassManager, PipelineConfig, PipelineRun, PipelineState};
