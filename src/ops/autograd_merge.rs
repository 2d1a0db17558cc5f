//! Masked merge update for one bottom-up round.
//!
//! Given the round's action `a` (`[B, N]`), left/right operands and the
//! composed parent candidate (`[B, N, H]`), and the round mask `m` (`[B, N]`):
//!
//! ```text
//! cumsum     = running sum of a along N
//! mask_left  = 1 - cumsum        // slots strictly left of the merge point
//! mask_right = cumsum - a        // slots strictly right of the merge point
//! out = (mask_left * left + a * parent + mask_right * right) * m + left * (1 - m)
//! ```
//!
//! The output is the next round's state sequence (length N, one shorter than
//! the round input). Where `m == 0` the left state is copied through, so
//! padding never reaches a composition.
//!
//! Backward (with `g = dL/d out`, per slot j and feature h):
//!
//! ```text
//! d_left[j]   = g[j] * (mask_left[j] * m[j] + 1 - m[j])
//! d_right[j]  = g[j] * mask_right[j] * m[j]
//! d_parent[j] = g[j] * a[j] * m[j]
//! s[j]        = m[j] * sum_h g[j] * (right[j] - left[j])
//! d_a[i]      = m[i] * sum_h g[i] * (parent[i] - right[i]) + sum_{j >= i} s[j]
//! ```

use crate::error::{Error, Result};
use crate::ops::host::read_f32;
use numr::autograd::{GradFn, TensorId, Var};
use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;
use std::sync::Arc;

/// Operands of a merge round, all shaped `[B, N, H]` except `actions`.
pub struct MergeOperands<'a, R: Runtime> {
    pub actions: &'a Var<R>,
    pub left: &'a Var<R>,
    pub right: &'a Var<R>,
    pub parent: &'a Var<R>,
}

/// Dimensions of a merge round.
#[derive(Debug, Clone, Copy)]
struct MergeDims {
    batch: usize,
    slots: usize,
    hidden: usize,
}

/// Left/right selector masks derived from the action's running sum.
fn selector_masks(actions: &[f32], dims: MergeDims) -> (Vec<f32>, Vec<f32>) {
    let mut mask_left = vec![0.0f32; actions.len()];
    let mut mask_right = vec![0.0f32; actions.len()];
    for b in 0..dims.batch {
        let mut cumsum = 0.0f32;
        for j in 0..dims.slots {
            let idx = b * dims.slots + j;
            let a = actions[idx];
            cumsum += a;
            mask_left[idx] = 1.0 - cumsum;
            mask_right[idx] = cumsum - a;
        }
    }
    (mask_left, mask_right)
}

/// Pure host evaluation of the merge rule on row-major buffers.
fn merge_forward(
    actions: &[f32],
    left: &[f32],
    right: &[f32],
    parent: &[f32],
    mask: &[f32],
    dims: MergeDims,
) -> Vec<f32> {
    let (mask_left, mask_right) = selector_masks(actions, dims);
    let mut out = vec![0.0f32; left.len()];
    for slot in 0..dims.batch * dims.slots {
        let (a, ml, mr, m) = (actions[slot], mask_left[slot], mask_right[slot], mask[slot]);
        let base = slot * dims.hidden;
        for h in base..base + dims.hidden {
            out[h] = (ml * left[h] + a * parent[h] + mr * right[h]) * m + left[h] * (1.0 - m);
        }
    }
    out
}

/// Backward for [`var_tree_merge`]. Inputs: `[actions, left, right, parent]`.
/// Saved: `[actions, left, right, parent, mask]`.
struct TreeMergeBackward<R: Runtime> {
    dims: MergeDims,
    input_ids: [TensorId; 4],
    saved_tensors: Vec<Tensor<R>>,
    input_grad_fns: [Option<Arc<dyn GradFn<R>>>; 4],
}

impl<R: Runtime<DType = DType>> GradFn<R> for TreeMergeBackward<R> {
    fn backward(&self, grad_output: &Tensor<R>) -> numr::error::Result<Vec<Option<Tensor<R>>>> {
        let dims = self.dims;
        let g = read_f32(grad_output);
        let actions = read_f32(&self.saved_tensors[0]);
        let left = read_f32(&self.saved_tensors[1]);
        let right = read_f32(&self.saved_tensors[2]);
        let parent = read_f32(&self.saved_tensors[3]);
        let mask = read_f32(&self.saved_tensors[4]);
        let (mask_left, mask_right) = selector_masks(&actions, dims);

        let mut d_left = vec![0.0f32; g.len()];
        let mut d_right = vec![0.0f32; g.len()];
        let mut d_parent = vec![0.0f32; g.len()];
        let mut d_actions = vec![0.0f32; actions.len()];

        for b in 0..dims.batch {
            // suffix sum of s[j] for j >= i, walked right to left
            let mut suffix = 0.0f32;
            for j in (0..dims.slots).rev() {
                let slot = b * dims.slots + j;
                let (a, ml, mr, m) = (actions[slot], mask_left[slot], mask_right[slot], mask[slot]);
                let base = slot * dims.hidden;
                let mut s = 0.0f32;
                let mut direct = 0.0f32;
                for h in base..base + dims.hidden {
                    d_left[h] = g[h] * (ml * m + 1.0 - m);
                    d_right[h] = g[h] * mr * m;
                    d_parent[h] = g[h] * a * m;
                    s += g[h] * (right[h] - left[h]);
                    direct += g[h] * (parent[h] - right[h]);
                }
                suffix += m * s;
                d_actions[slot] = m * direct + suffix;
            }
        }

        let device = grad_output.device();
        let state_shape = [dims.batch, dims.slots, dims.hidden];
        let action_shape = [dims.batch, dims.slots];
        Ok(vec![
            Some(Tensor::<R>::from_slice(&d_actions, &action_shape, device)),
            Some(Tensor::<R>::from_slice(&d_left, &state_shape, device)),
            Some(Tensor::<R>::from_slice(&d_right, &state_shape, device)),
            Some(Tensor::<R>::from_slice(&d_parent, &state_shape, device)),
        ])
    }

    fn backward_var(&self, grad_output: &Var<R>) -> numr::error::Result<Vec<Option<Var<R>>>> {
        // First-order only: wrap Tensor results as detached Vars
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
        &self.saved_tensors
    }

    fn name(&self) -> &'static str {
        "TreeMergeBackward"
    }
}

/// Fold a round's action into the next round's state sequence.
///
/// `mask` is the round validity mask `[B, N]`; it carries no gradient.
/// Returns `[B, N, H]`.
pub fn var_tree_merge<R: Runtime<DType = DType>>(
    operands: &MergeOperands<'_, R>,
    mask: &Tensor<R>,
) -> Result<Var<R>> {
    let state_shape = operands.left.shape().to_vec();
    if state_shape.len() != 3 {
        return Err(Error::InvalidArgument {
            arg: "left",
            reason: format!("expected [batch, slots, hidden], got {state_shape:?}"),
        });
    }
    let dims = MergeDims {
        batch: state_shape[0],
        slots: state_shape[1],
        hidden: state_shape[2],
    };
    Error::check_shape("right", operands.right.shape(), &state_shape)?;
    Error::check_shape("parent", operands.parent.shape(), &state_shape)?;
    Error::check_shape("actions", operands.actions.shape(), &state_shape[..2])?;
    Error::check_shape("mask", mask.shape(), &state_shape[..2])?;

    let actions_t = operands.actions.tensor().contiguous();
    let left_t = operands.left.tensor().contiguous();
    let right_t = operands.right.tensor().contiguous();
    let parent_t = operands.parent.tensor().contiguous();
    let mask_t = mask.contiguous();

    let out = merge_forward(
        &read_f32(&actions_t),
        &read_f32(&left_t),
        &read_f32(&right_t),
        &read_f32(&parent_t),
        &read_f32(&mask_t),
        dims,
    );
    let output = Tensor::<R>::from_slice(&out, &state_shape, left_t.device());

    let inputs = [
        operands.actions,
        operands.left,
        operands.right,
        operands.parent,
    ];
    if inputs.iter().any(|v| v.requires_grad()) {
        let grad_fn = TreeMergeBackward {
            dims,
            input_ids: inputs.map(|v| v.id()),
            saved_tensors: vec![actions_t, left_t, right_t, parent_t, mask_t],
            input_grad_fns: inputs.map(|v| v.grad_fn().cloned()),
        };
        Ok(Var::from_op(output, Arc::new(grad_fn)))
    } else {
        Ok(Var::new(output, false))
    }
}
