//! Client trait alias shared by every forward pass in the crate.

use numr::ops::{
    ActivationOps, BinaryOps, CompareOps, RandomOps, ReduceOps, ScalarOps, ShapeOps, TensorOps, UnaryOps,
};
use numr::runtime::{Runtime, RuntimeClient};

/// Trait alias for the full set of client bounds required by the parser,
/// its leaf encoders and the masked categorical policy.
pub trait ParserClient<R: Runtime>:
    RuntimeClient<R>
    + TensorOps<R>
    + ScalarOps<R>
    + ReduceOps<R>
    + ShapeOps<R>
    + ActivationOps<R>
    + BinaryOps<R>
    + UnaryOps<R>
    + RandomOps<R>
    + CompareOps<R>
{
}

impl<R, C> ParserClient<R> for C
where
    R: Runtime,
    C: RuntimeClient<R>
        + TensorOps<R>
        + ScalarOps<R>
        + ReduceOps<R>
        + ShapeOps<R>
        + ActivationOps<R>
        + BinaryOps<R>
        + UnaryOps<R>
        + RandomOps<R>
        + CompareOps<R>,
{
}
