//! SSA representation and the read-only analyses passes build on.
//!
//! # Architecture
//!
//! - [`ssa`] - typed SSA form, validator and fixture builder
//! - [`defuse`] - definition and use sites of variables
//! - [`sizeinfo`] - symbolic equivalence of scalar values and matrix sizes
//! - [`loops`] - structured loop sections and loop-carried variables
//!
//! Analyses never mutate a body. They are snapshots: a pass rebuilds them after editing.

pub mod defuse;
pub mod loops;
pub mod sizeinfo;
pub mod ssa;

pub use defuse::{DefUseIndex, Location};
pub use loops::{
    conventional_loop_variables, has_side_effects, is_simple_section, section_blocks, ForLoop,
    LoopVariable,
};
pub use sizeinfo::{copy_aliases, ScalarValueInfo, ValueKey};
pub use ssa::{
    format_number, validate, AssignedValue, BlockId, BlockScope, ElementKind, FunctionBody,
    FunctionBuilder, FunctionInstance, FunctionScope, FunctionSignature, InstructionFlags,
    PhiSource, RangeIndex, Shape, SsaBlock, SsaCfg, SsaInstruction, TypeMap, VarType,
};
