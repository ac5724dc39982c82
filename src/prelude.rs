//! # matssa Prelude
//!
//! Convenient access to the types needed to build, validate and optimize a function.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all matssa operations
pub use crate::Error;

/// The result type used throughout matssa
pub use crate::Result;

// ================================================================================================
// SSA Representation
// ================================================================================================

/// Function bodies, blocks and instructions
pub use crate::analysis::{
    AssignedValue, BlockId, FunctionBody, FunctionInstance, FunctionSignature, PhiSource,
    RangeIndex, SsaBlock, SsaInstruction,
};

/// Types and the type map
pub use crate::analysis::{ElementKind, Shape, TypeMap, VarType};

/// Fixture construction
pub use crate::analysis::{BlockScope, FunctionBuilder, FunctionScope};

/// SSA invariant checker
pub use crate::analysis::validate;

// ================================================================================================
// Pass Pipeline
// ================================================================================================

/// Pipeline driver and configuration
pub use crate::compiler::{PassManager, PipelineConfig, PipelineState, Recipe};

/// Pass contract and identifiers
pub use crate::compiler::{PassId, SsaPass};

/// Shared compilation state and transformation log
pub use crate::compiler::{CompilerContext, Event, EventKind, EventLog};

/// Function signature oracle
pub use crate::compiler::{FunctionRegistry, InstanceProvider, ProviderData};
