//! Gradient estimators for relaxed discrete choices.
//!
//! Both ops are identities (or substitutions) in the forward pass and only
//! reshape the gradient on the way back:
//!
//! - [`var_straight_through`]: forward value is the hard one-hot sample,
//!   gradient flows to the relaxed sample unchanged.
//! - [`var_clamp_grad`]: forward value is unchanged, gradient is clamped
//!   element-wise into `[min, max]`.

use crate::error::{Error, Result};
use crate::ops::host::read_f32;
use numr::autograd::{GradFn, TensorId, Var};
use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;
use std::sync::Arc;

/// Backward for [`var_straight_through`]: identity into the soft sample.
struct StraightThroughBackward<R: Runtime> {
    input_ids: [TensorId; 1],
    input_grad_fns: [Option<Arc<dyn GradFn<R>>>; 1],
}

impl<R: Runtime<DType = DType>> GradFn<R> for StraightThroughBackward<R> {
    fn backward(&self, grad_output: &Tensor<R>) -> numr::error::Result<Vec<Option<Tensor<R>>>> {
        // reduction backwards hand out broadcast views
        Ok(vec![Some(grad_output.contiguous())])
    }

    fn backward_var(&self, grad_output: &Var<R>) -> numr::error::Result<Vec<Option<Var<R>>>> {
        Ok(vec![Some(Var::new(
            grad_output.tensor().contiguous(),
            grad_output.requires_grad(),
        ))])
    }

    fn inputs(&self) -> &[TensorId] {
        &self.input_ids
    }

    fn input_grad_fns(&self) -> Vec<Option<Arc<dyn GradFn<R>>>> {
        self.input_grad_fns.to_vec()
    }

    fn saved_tensors(&self) -> &[Tensor<R>] {
        &[]
    }

    fn name(&self) -> &'static str {
        "StraightThroughBackward"
    }
}

/// Substitute `hard` for `soft` in the forward pass while routing the
/// gradient through `soft`.
///
/// The returned value is exactly `hard` (no `hard - soft + soft` rounding).
pub fn var_straight_through<R: Runtime<DType = DType>>(
    soft: &Var<R>,
    hard: &Tensor<R>,
) -> Result<Var<R>> {
    Error::check_shape("hard", hard.shape(), soft.shape())?;
    if !soft.requires_grad() {
        return Ok(Var::new(hard.clone(), false));
    }
    let grad_fn = StraightThroughBackward {
        input_ids: [soft.id()],
        input_grad_fns: [soft.grad_fn().cloned()],
    };
    Ok(Var::from_op(hard.clone(), Arc::new(grad_fn)))
}

/// Backward for [`var_clamp_grad`].
struct ClampGradBackward<R: Runtime> {
    min: f32,
    max: f32,
    input_ids: [TensorId; 1],
    input_grad_fns: [Option<Arc<dyn GradFn<R>>>; 1],
}

impl<R: Runtime<DType = DType>> GradFn<R> for ClampGradBackward<R> {
    fn backward(&self, grad_output: &Tensor<R>) -> numr::error::Result<Vec<Option<Tensor<R>>>> {
        let clamped: Vec<f32> = read_f32(grad_output)
            .into_iter()
            .map(|g| g.clamp(self.min, self.max))
            .collect();
        Ok(vec![Some(Tensor::<R>::from_slice(
            &clamped,
            grad_output.shape(),
            grad_output.device(),
        ))])
    }

    fn backward_var(&self, grad_output: &Var<R>) -> numr::error::Result<Vec<Option<Var<R>>>> {
        let grads = self.backward(grad_output.tensor())?;
        Ok(grads
            .into_iter()
            .map(|g| g.map(|t| Var::new(t, false)))
            .collect())
    }

    fn inputs(&self) -> &[TensorId] {
        &self.input_ids
    }

    fn input_grad_fns(&self) -> Vec<Option<Arc<dyn GradFn<R>>>> {
        self.input_grad_fns.to_vec()
    }

    fn saved_tensors(&self) -> &[Tensor<R>] {
        &[]
    }

    fn name(&self) -> &'static str {
        "ClampGradBackward"
    }
}

/// Identity in the forward pass; clamps the incoming gradient into `[min, max]`.
pub fn var_clamp_grad<R: Runtime<DType = DType>>(x: &Var<R>, min: f32, max: f32) -> Result<Var<R>> {
    if min > max {
        return Err(Error::InvalidArgument {
            arg: "min",
            reason: format!("gradient clamp range is empty: [{min}, {max}]"),
        });
    }
    if !x.requires_grad() {
        return Ok(x.clone());
    }
    let grad_fn = ClampGradBackward {
        min,
        max,
        input_ids: [x.id()],
        input_grad_fns: [x.grad_fn().cloned()],
    };
    Ok(Var::from_op(x.tensor().clone(), Arc::new(grad_fn)))
}
