//! The pass contract.
//!
//! Every optimization implements [`SsaPass`]. A pass receives exclusive access to one
//! [`FunctionInstance`] and shared access to the [`CompilerContext`], rewrites the instance in
//! place and reports whether anything changed.

use crate::{analysis::FunctionInstance, compiler::context::CompilerContext, Result};

/// A transformation over one typed SSA function.
///
/// All passes must be thread-safe (Send + Sync): a recipe may run over several functions at
/// once, each owned by a single thread.
///
/// # Contract
///
/// - A pass only adds type map entries for variables it introduces, through
///   [`FunctionInstance::make_temporary`]; it never alters the type of an existing variable.
/// - A pass is idempotent: running it twice in a row makes no change the second time.
/// - A pass never invokes another pass.
/// - When a candidate rewrite cannot be proven safe, the pass leaves it untouched and records a
///   [`EventKind::PatternDeclined`](crate::compiler::EventKind::PatternDeclined) diagnostic.
///   Only malformed input is an error.
pub trait SsaPass: Send + Sync {
    /// Unique name for logging and debugging; matches the pass identifier.
    fn name(&self) -> &'static str;

    /// Should this pass run on a specific function?
    ///
    /// Called before `run_on_function`. Override to skip functions that cannot contain a
    /// candidate.
    fn should_run(&self, _instance: &FunctionInstance, _ctx: &CompilerContext) -> bool {
        true
    }

    /// Run the pass on a single function.
    ///
    /// Returns `true` if any changes were made, `false` otherwise.
    /// Events should be recorded directly to `ctx.events`.
    ///
    /// # Arguments
    ///
    /// * `instance` - The function body and type map to transform.
    /// * `ctx` - The compiler context (thread-safe, uses shared reference).
    ///
    /// # Errors
    ///
    /// Returns an error if the input is malformed or a call the pass emits cannot be resolved.
    fn run_on_function(&self, instance: &mut FunctionInstance, ctx: &CompilerContext)
        -> Result<bool>;

    /// Called once before the pass runs in a recipe.
    ///
    /// # Errors
    ///
    /// Returns an error if initialization fails.
    fn initialize(&mut self, _ctx: &CompilerContext) -> Result<()> {
        Ok(())
    }

    /// Called once after the pass completes in a recipe.
    ///
    /// # Errors
    ///
    /// Returns an error if finalization fails.
    fn finalize(&mut self, _ctx: &CompilerContext) -> Result<()> {
        Ok(())
    }

    /// Get a description of what this pass does.
    fn description(&self) -> &'static str {
        "No description available"
    }
}
