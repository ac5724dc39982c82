//! Graph algorithms for program analysis.
//!
//! ## Traversal
//!
//! - [`postorder`] - Postorder traversal
//! - [`reverse_postorder`] - Reverse postorder traversal (useful for data flow)
//!
//! ## Dominator Analysis
//!
//! - [`compute_dominators`] - Compute the dominator tree
//! - [`DominatorTree`] - Result of dominator computation

mod dominators;
mod traversal;

pub use dominators::{compute_dominators, compute_dominators_rooted, DominatorTree};
pub use traversal::{postorder, reverse_postorder};
