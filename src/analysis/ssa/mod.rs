//! Typed Static Single Assignment (SSA) form of MATLAB functions.
//!
//! Type inference hands the middle-end one [`FunctionInstance`] per specialized function:
//! a [`FunctionBody`] in SSA form plus a [`TypeMap`] assigning every variable a concrete
//! [`VarType`]. Every pass reads and rewrites this representation.
//!
//! # Architecture
//!
//! - [`types`] - element kinds, shapes and variable types
//! - [`typemap`] - variable name to type mapping and temporary creation
//! - [`instruction`] - the closed instruction catalog
//! - [`block`] - ordered instruction sequences
//! - [`function`] - block arena and typed function instances
//! - [`cfg`] - structured control-flow graph view
//! - [`validator`] - SSA invariant checker
//! - [`builder`] - closure-based fixture construction
//!
//! # Textual Form
//!
//! Bodies render deterministically, which is what tests compare against:
//!
//! ```text
//! Function total -> y$1
//! block #0:
//!   A$1 = arg 0
//!   $numel_result$1 = numel A$1
//!   for $one$1, $one$1, $numel_result$1, #1, #2
//! block #1:
//!   ...
//! ```

pub mod block;
pub mod builder;
pub mod cfg;
pub mod function;
pub mod instruction;
pub mod typemap;
pub mod types;
pub mod validator;

pub use block::SsaBlock;
pub use builder::{BlockScope, FunctionBuilder, FunctionScope};
pub use cfg::SsaCfg;
pub use function::{FunctionBody, FunctionInstance};
pub use instruction::{
    AssignedValue, BlockId, FunctionSignature, InstructionFlags, PhiSource, RangeIndex,
    SsaInstruction,
};
pub use typemap::TypeMap;
pub use types::{format_number, ElementKind, Shape, VarType};
pub use validator::validate;
