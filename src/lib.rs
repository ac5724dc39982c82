// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
#![allow(clippy::too_many_arguments)]

//! # matssa
//!
//! The middle-end of a MATLAB-to-native compiler. Type inference hands over one function at a
//! time in typed Static Single Assignment form; `matssa` rewrites it into an equivalent but
//! cheaper SSA program before a backend emits native code.
//!
//! ## Features
//!
//! - **Typed SSA IR** - closed instruction catalog, block arena, per-variable element/shape types
//! - **Validator** - single definition, dominance, phi arity and block layout checks
//! - **Pass catalog** - colon/range/access lowering, reduction and concatenation expansion,
//!   allocation simplification, trivial loop removal, loop fusion and interchange
//! - **Cleanup** - dead-code elimination and structured block reordering
//! - **Deterministic rendering** - every body, type map and instruction prints stably
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use matssa::prelude::*;
//!
//! // y = numel(zeros(n))
//! let mut instance = FunctionBuilder::new("f").build_with(|f| {
//!     f.scalars(&["n$1", "y$1"]);
//!     f.matrix("X$1", Shape::with_rank(2));
//!     f.outputs(&["y$1"]);
//!     f.block(0, |b| {
//!         b.argument("n$1", 0);
//!         b.call("zeros", &["X$1"], &["n$1"]);
//!         b.call("numel", &["y$1"], &["X$1"]);
//!     });
//! });
//!
//! let ctx = CompilerContext::new(Arc::new(FunctionRegistry::with_builtins()));
//! let manager = PassManager::new(Recipe::optimizing(), PipelineConfig::default());
//! manager.run(&mut instance, &ctx)?;
//!
//! assert!(!instance.body.to_string().contains("zeros"));
//! # Ok::<(), matssa::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`analysis`] - the SSA representation and read-only analyses (CFG, dominators, def-use,
//!   scalar value equivalence, loop structure)
//! - [`compiler`] - the pass framework, the function registry and the pass catalog
//! - [`utils`] - generic graph traits and algorithms
//!
//! ## Error Handling
//!
//! Only fatal conditions are errors: malformed input, a function no provider can resolve, an
//! unknown pass identifier. A pass that cannot prove the preconditions of a rewrite leaves the
//! code untouched and records a [`compiler::EventKind::PatternDeclined`] diagnostic instead.

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use matssa::prelude::*;
///
/// let instance = FunctionBuilder::new("empty").build_with(|_| {});
/// assert!(validate(&instance.body).is_ok());
/// ```
pub mod prelude;

/// Typed SSA form and the analyses passes are built on.
///
/// # Key Types
///
/// - [`analysis::FunctionInstance`] - a function body paired with its type map
/// - [`analysis::SsaInstruction`] - the closed instruction catalog
/// - [`analysis::ScalarValueInfo`] - proves two scalars hold the same value
/// - [`analysis::FunctionBuilder`] - fixture construction for tests and benchmarks
pub mod analysis;

/// Pass framework, function registry and pass catalog.
///
/// # Key Types
///
/// - [`compiler::SsaPass`] - the pass contract
/// - [`compiler::Recipe`] - an ordered list of passes
/// - [`compiler::PassManager`] - runs a recipe over one or many functions
/// - [`compiler::FunctionRegistry`] - resolves signatures of the functions passes emit
pub mod compiler;

/// Generic graph infrastructure.
pub mod utils;

/// `matssa` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `matssa` Error type
///
/// # Examples
///
/// ```rust
/// use matssa::{compiler::Recipe, Error};
///
/// match "loop-fusion, warp-drive".parse::<Recipe>() {
///     Err(Error::UnknownPass(name)) => assert_eq!(name, "warp-drive"),
///     other => panic!("unexpected {:?}", other.map(|r| r.len())),
/// }
/// ```
pub use error::Error;
