//! Node states and the composition seam of the merge loop.

use crate::client::ParserClient;
use crate::error::{Error, Result};
use crate::ops::var_contiguous;
use numr::autograd::{Var, var_narrow};
use numr::dtype::DType;
use numr::ops::TensorOps;
use numr::runtime::Runtime;

/// `(h, c)` pair for a row of tree nodes. Both parts share one shape,
/// `[B, N, H]` inside the merge loop and `[B, H]` for the root.
#[derive(Clone)]
pub struct NodeStates<R: Runtime> {
    pub h: Var<R>,
    pub c: Var<R>,
}

impl<R: Runtime<DType = DType>> NodeStates<R> {
    pub fn new(h: Var<R>, c: Var<R>) -> Result<Self> {
        Error::check_shape("c", c.shape(), h.shape())?;
        Ok(Self { h, c })
    }

    pub fn shape(&self) -> &[usize] {
        self.h.shape()
    }

    /// Number of node positions (dim 1).
    pub fn len(&self) -> usize {
        self.h.shape().get(1).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Positions `start..start + len` along dim 1, still on the graph.
    pub fn narrow(&self, start: usize, len: usize) -> Result<Self>
    where
        R::Client: TensorOps<R>,
    {
        let h = var_contiguous(&var_narrow(&self.h, 1, start, len).map_err(Error::Numr)?);
        let c = var_contiguous(&var_narrow(&self.c, 1, start, len).map_err(Error::Numr)?);
        Ok(Self { h, c })
    }
}

/// Composition function of the merge loop: two child states in, one parent
/// state out, position by position.
///
/// `left` and `right` are `[B, N, H]`; the result must be `[B, N, H]` as well.
pub trait NodeComposer<R: Runtime> {
    fn compose<C>(&self, client: &C, left: &NodeStates<R>, right: &NodeStates<R>) -> Result<NodeStates<R>>
    where
        C: ParserClient<R>,
        R::Client: ParserClient<R>;

    /// Width `H` of the states this composer consumes and produces.
    fn hidden_dim(&self) -> usize;

    /// Switch between training and evaluation behavior.
    fn set_training(&mut self, _training: bool) {}

    /// Learnable parameters, if any.
    fn named_parameters(&self) -> Vec<(String, &Var<R>)> {
        Vec::new()
    }
}
