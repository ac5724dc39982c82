//! Recipe step that checks SSA invariants without changing the body.

use crate::{
    analysis::{validate, FunctionInstance},
    compiler::{
        context::CompilerContext,
        events::{EventKind, EventLog},
        pass::SsaPass,
        passes::utils::commit,
    },
    Result,
};

/// Fails the pipeline if the body breaks an SSA invariant.
pub struct SsaValidatorPass;

impl Default for SsaValidatorPass {
    fn default() -> Self {
        Self::new()
    }
}

impl SsaValidatorPass {
    /// Creates a new validator pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl SsaPass for SsaValidatorPass {
    fn name(&self) -> &'static str {
        "ssa-validator"
    }

    fn description(&self) -> &'static str {
        "Checks SSA invariants and aborts on the first violation"
    }

    fn run_on_function(&self, instance: &mut FunctionInstance, ctx: &CompilerContext) -> Result<bool> {
        validate(&instance.body)?;
        let changes = EventLog::new();
        changes
            .record(EventKind::ValidationPassed)
            .function(instance.name());
        Ok(commit(&changes, &ctx.events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::FunctionBuilder;

    #[test]
    fn test_valid_body_passes_unchanged() {
        let mut instance = FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["a$1", "y$1"]);
            f.outputs(&["y$1"]);
            f.block(0, |b| {
                b.argument("a$1", 0);
                b.call("plus", &["y$1"], &["a$1", "a$1"]);
            });
        });
        let before = instance.clone();
        let ctx = CompilerContext::with_builtins();
        let changed = SsaValidatorPass::new()
            .run_on_function(&mut instance, &ctx)
            .expect("valid");
        assert!(!changed);
        assert_eq!(instance, before);
        assert!(ctx.events.has(EventKind::ValidationPassed));
    }

    #[test]
    fn test_undefined_use_rejected() {
        let mut instance = FunctionBuilder::new("f").build_with(|f| {
            f.scalars(&["a$1", "y$1"]);
            f.block(0, |b| b.call("plus", &["y$1"], &["a$1", "a$1"]));
        });
        let ctx = CompilerContext::with_builtins();
        let result = SsaValidatorPass::new().run_on_function(&mut instance, &ctx);
        assert!(matches!(result, Err(crate::Error::MalformedInput { .. })));
    }
}
