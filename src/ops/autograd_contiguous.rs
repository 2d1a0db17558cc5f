//! Gradient-preserving contiguous copy.

use numr::autograd::{GradFn, TensorId, Var};
use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;
use std::sync::Arc;

/// Backward for [`var_contiguous`]: identity, packed into a contiguous buffer.
struct ContiguousBackward<R: Runtime> {
    input_ids: [TensorId; 1],
    input_grad_fns: [Option<Arc<dyn GradFn<R>>>; 1],
}

impl<R: Runtime<DType = DType>> GradFn<R> for ContiguousBackward<R> {
    fn backward(&self, grad_output: &Tensor<R>) -> numr::error::Result<Vec<Option<Tensor<R>>>> {
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
        "ContiguousBackward"
    }
}

/// Make a Var contiguous, keeping it connected to the graph.
///
/// Views produced by `var_narrow` must be made contiguous before `var_reshape`;
/// unlike re-wrapping the copy as a fresh leaf, this routes the gradient back
/// to the original view.
pub fn var_contiguous<R: Runtime<DType = DType>>(v: &Var<R>) -> Var<R> {
    if v.tensor().is_contiguous() {
        return v.clone();
    }
    let output = v.tensor().contiguous();
    if !v.requires_grad() {
        return Var::new(output, false);
    }
    let grad_fn = ContiguousBackward {
        input_ids: [v.id()],
        input_grad_fns: [v.grad_fn().cloned()],
    };
    Var::from_op(output, Arc::new(grad_fn))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::cpu_setup;
    use numr::autograd::{backward, var_narrow, var_sum};
    use numr::runtime::cpu::CpuRuntime;

    #[test]
    fn test_contiguous_keeps_gradient_path() {
        let (client, device) = cpu_setup();
        let x = Var::new(
            Tensor::<CpuRuntime>::from_slice(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3], &device),
            true,
        );
        let view = var_narrow(&x, 1, 1, 2).unwrap();
        let packed = var_contiguous(&view);
        assert!(packed.tensor().is_contiguous());
        let data: Vec<f32> = packed.tensor().to_vec();
        assert_eq!(data, vec![2.0, 3.0, 5.0, 6.0]);

        let loss = var_sum(&packed, &[], false, &client).unwrap();
        let grads = backward(&loss, &client).unwrap();
        let dx: Vec<f32> = grads.get(x.id()).unwrap().to_vec();
        assert_eq!(dx, vec![0.0, 1.0, 1.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_contiguous_of_packed_var_is_same_node() {
        let (_client, device) = cpu_setup();
        let x = Var::new(Tensor::<CpuRuntime>::from_slice(&[1.0f32, 2.0], &[2], &device), true);
        assert_eq!(var_contiguous(&x).id(), x.id());
    }
}
