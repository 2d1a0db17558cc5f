//! Autograd operations with hand-written backward passes.
//!
//! The merge update and the relaxed-sampling estimators have no numr
//! counterpart, so they are registered as custom `GradFn` nodes here, next to
//! a contiguous copy that stays on the graph.

pub mod autograd_contiguous;
pub mod autograd_estimators;
pub mod autograd_merge;
pub(crate) mod host;

pub use autograd_contiguous::var_contiguous;
pub use autograd_estimators::{var_clamp_grad, var_straight_through};
pub use autograd_merge::{MergeOperands, var_tree_merge};
