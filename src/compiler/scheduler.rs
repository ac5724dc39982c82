//! Pass manager for running recipes over typed functions.
//!
//! The [`PassManager`] runs every pass of a [`Recipe`] exactly once, in order, over one
//! [`FunctionInstance`]. Input and output are checked by the SSA validator according to the
//! [`PipelineConfig`]. A pass error aborts the recipe for that function; changes made by
//! earlier passes are kept.
//!
//! Independent functions can be compiled concurrently with [`PassManager::run_all`]. Each
//! function is owned by exactly one worker; the registry and event log in the
//! [`CompilerContext`] are the only shared state.

use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::{
    analysis::{validate, FunctionInstance},
    compiler::{context::CompilerContext, events::EventKind, pass::SsaPass, recipe::Recipe},
    Error, Result,
};

/// Validation and scheduling switches of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct PipelineConfig {
    /// Validate the body handed in by type inference.
    pub validate_input: bool,
    /// Validate after every pass; a failure is reported against that pass.
    pub validate_after_each_pass: bool,
    /// Validate the body before handing it to the backend.
    pub validate_output: bool,
    /// Compile independent functions on the rayon pool.
    pub parallel: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            validate_input: true,
            validate_after_each_pass: false,
            validate_output: true,
            parallel: true,
        }
    }
}

impl PipelineConfig {
    /// No validation at all.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            validate_input: false,
            validate_after_each_pass: false,
            validate_output: false,
            parallel: true,
        }
    }

    /// Validation before, between and after passes.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            validate_input: true,
            validate_after_each_pass: true,
            validate_output: true,
            parallel: true,
        }
    }
}

/// Where a function is in its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Received from type inference, no pass applied yet.
    TypedReady,
    /// The given number of passes have been applied.
    Applied(usize),
    /// Every pass applied and the output validated.
    Validated,
    /// Handed to the backend; no further pass may run.
    HandedToBackend,
    /// A pass or validation failed.
    Failed,
}

impl PipelineState {
    /// Returns the state a finished run ends in.
    #[must_use]
    pub fn of(result: &Result<PipelineRun>) -> Self {
        match result {
            Ok(run) => run.state,
            Err(_) => PipelineState::Failed,
        }
    }
}

/// Outcome of running a recipe over one function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRun {
    /// Final state of the function.
    pub state: PipelineState,
    /// Names of the passes that reported a change, in run order.
    pub changed_by: Vec<&'static str>,
}

impl PipelineRun {
    /// Returns `true` if any pass changed the function.
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.changed_by.is_empty()
    }

    /// Marks the function as consumed by the backend.
    ///
    /// # Errors
    ///
    /// Returns an error unless every pass has been applied.
    pub fn hand_to_backend(&mut self) -> Result<()> {
        match self.state {
            PipelineState::Validated | PipelineState::Applied(_) => {
                self.state = PipelineState::HandedToBackend;
                Ok(())
            }
            other => Err(Error::Error(format!(
                "cannot hand a function in state {other:?} to the backend"
            ))),
        }
    }
}

/// Runs a recipe over typed functions.
pub struct PassManager {
    recipe: Recipe,
    config: PipelineConfig,
    passes: Vec<Box<dyn SsaPass>>,
}

impl PassManager {
    /// Creates a manager running `recipe`.
    ///
    /// # Arguments
    ///
    /// * `recipe` - The ordered pass list.
    /// * `config` - Validation and scheduling switches.
    ///
    /// # Returns
    ///
    /// A new `PassManager` holding one instance of every pass in the recipe.
    #[must_use]
    pub fn new(recipe: Recipe, config: PipelineConfig) -> Self {
        let passes = recipe.instantiate();
        Self {
            recipe,
            config,
            passes,
        }
    }

    /// Creates a manager running already constructed passes.
    #[must_use]
    pub fn with_passes(passes: Vec<Box<dyn SsaPass>>, config: PipelineConfig) -> Self {
        Self {
            recipe: Recipe::default(),
            config,
            passes,
        }
    }

    /// Returns the recipe this manager was created from.
    ///
    /// Empty when the manager was built with [`with_passes`](Self::with_passes).
    #[must_use]
    pub fn recipe(&self) -> &Recipe {
        &self.recipe
    }

    /// Returns the pipeline configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Calls [`SsaPass::initialize`] on every pass.
    ///
    /// # Errors
    ///
    /// Returns the first initialization error.
    pub fn initialize(&mut self, ctx: &CompilerContext) -> Result<()> {
        for pass in &mut self.passes {
            pass.initialize(ctx)?;
        }
        Ok(())
    }

    /// Calls [`SsaPass::finalize`] on every pass.
    ///
    /// # Errors
    ///
    /// Returns the first finalization error.
    pub fn finalize(&mut self, ctx: &CompilerContext) -> Result<()> {
        for pass in &mut self.passes {
            pass.finalize(ctx)?;
        }
        Ok(())
    }

    /// Runs the recipe once over `instance`.
    ///
    /// # Arguments
    ///
    /// * `instance` - The function to transform; owned exclusively for the duration.
    /// * `ctx` - Shared compiler context.
    ///
    /// # Returns
    ///
    /// The final state and the passes that changed the function.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedInput`] if input validation fails, or [`Error::PassFailed`]
    /// naming the pass whose run or subsequent validation failed.
    pub fn run(&self, instance: &mut FunctionInstance, ctx: &CompilerContext) -> Result<PipelineRun> {
        let name = instance.name().to_string();
        let started = Instant::now();
        ctx.events
            .record(EventKind::FunctionStarted)
            .function(name.as_str())
            .message(format!("{} passes", self.passes.len()));

        if self.config.validate_input {
            validate(&instance.body)?;
        }

        let mut run = PipelineRun {
            state: PipelineState::TypedReady,
            changed_by: Vec::new(),
        };

        for (applied, pass) in self.passes.iter().enumerate() {
            if pass.should_run(instance, ctx) {
                let changed = pass
                    .run_on_function(instance, ctx)
                    .map_err(|source| Self::failure(pass.name(), source))?;
                debug!("{}: {} changed={}", name, pass.name(), changed);
                if changed {
                    run.changed_by.push(pass.name());
                }
                if self.config.validate_after_each_pass {
                    validate(&instance.body).map_err(|source| Self::failure(pass.name(), source))?;
                }
            }
            run.state = PipelineState::Applied(applied + 1);
        }

        if self.config.validate_output {
            validate(&instance.body)?;
            run.state = PipelineState::Validated;
            ctx.events
                .record(EventKind::ValidationPassed)
                .function(name.as_str());
        }

        ctx.events
            .record(EventKind::FunctionCompleted)
            .function(name.as_str())
            .message(format!(
                "{} passes changed the function in {:?}",
                run.changed_by.len(),
                started.elapsed()
            ));
        info!("{}: {} changing passes", name, run.changed_by.len());
        Ok(run)
    }

    /// Runs the recipe over every instance, concurrently when configured.
    ///
    /// Results are returned in the order of `instances`. A failure only affects its own
    /// function.
    pub fn run_all(
        &self,
        instances: &mut [FunctionInstance],
        ctx: &CompilerContext,
    ) -> Vec<Result<PipelineRun>> {
        let results: Vec<Result<PipelineRun>> = if self.config.parallel {
            instances
                .par_iter_mut()
                .map(|instance| self.run(instance, ctx))
                .collect()
        } else {
            instances
                .iter_mut()
                .map(|instance| self.run(instance, ctx))
                .collect()
        };

        for result in &results {
            if let Err(error) = result {
                warn!("function failed: {}", error);
                ctx.events.error(error.to_string());
            }
        }
        results
    }

    fn failure(pass: &str, source: Error) -> Error {
        Error::PassFailed {
            pass: pass.to_string(),
            source: Box::new(source),
        }
    }
}
