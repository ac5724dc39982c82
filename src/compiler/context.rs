//! Shared compilation state.
//!
//! The [`CompilerContext`] is threaded explicitly through every pass. It holds the only state
//! shared between functions compiled concurrently: the read-only [`FunctionRegistry`] and the
//! append-only [`EventLog`].

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::compiler::{events::EventLog, providers::FunctionRegistry};

/// Compiler context for the SSA pipeline.
///
/// All fields are safe to share between threads; passes only ever receive `&CompilerContext`.
pub struct CompilerContext {
    /// Signature oracle for every call a pass emits.
    pub registry: Arc<FunctionRegistry>,

    /// Accumulated events from all passes.
    pub events: EventLog,

    /// When compilation started.
    start_time: Instant,
}

impl CompilerContext {
    /// Creates a new compiler context.
    ///
    /// # Arguments
    ///
    /// * `registry` - The populated function registry.
    #[must_use]
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self {
            registry,
            events: EventLog::new(),
            start_time: Instant::now(),
        }
    }

    /// Creates a context backed by the builtin registry.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::new(Arc::new(FunctionRegistry::with_builtins()))
    }

    /// Returns the function registry.
    #[must_use]
    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Returns the elapsed time since the context was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Default for CompilerContext {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_shares_registry() {
        let registry = Arc::new(FunctionRegistry::with_builtins());
        let a = CompilerContext::new(Arc::clone(&registry));
        let b = CompilerContext::new(Arc::clone(&registry));
        assert!(Arc::ptr_eq(&a.registry, &b.registry));
        assert!(a.registry().contains("numel"));
        assert!(a.events.is_empty());
    }
}
