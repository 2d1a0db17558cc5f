//! Binary Tree-LSTM cell: the default node composer.

use crate::client::ParserClient;
use crate::error::{Error, Result};
use crate::nn::dropout::Dropout;
use crate::nn::init::Init;
use crate::nn::linear::Linear;
use crate::nn::module::{Module, TrainMode, prefixed};
use crate::nn::var_builder::VarBuilder;
use crate::ops::var_contiguous;
use crate::parser::{NodeComposer, NodeStates};
use numr::autograd::{Var, var_add, var_cat, var_mul, var_narrow, var_sigmoid, var_tanh};
use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;

/// Binary Tree-LSTM composition.
///
/// `[h_l; h_r]` goes through one linear map `2H -> 5H`, split into
/// `(g, i, f_l, f_r, o)`:
///
/// ```text
/// c = σ(i)·tanh(g) + σ(f_l)·c_l + σ(f_r)·c_r
/// h = σ(o)·tanh(c)
/// ```
///
/// Dropout, when configured, is applied to `tanh(g)` in training mode.
/// Freshly initialized forget-gate biases start at 1.
pub struct BinaryTreeLstmCell<R: Runtime> {
    linear: Linear<R>,
    dropout: Option<Dropout>,
    hidden_dim: usize,
}

impl<R: Runtime<DType = DType>> BinaryTreeLstmCell<R> {
    pub fn from_varbuilder<C>(
        vb: &mut VarBuilder<'_, R>,
        client: &C,
        hidden_dim: usize,
        dropout_prob: Option<f64>,
        trainable: bool,
    ) -> Result<Self>
    where
        C: ParserClient<R>,
    {
        let mut vb = vb.pp("linear");
        let weight = vb.take_or_init(
            client,
            "weight",
            &[5 * hidden_dim, 2 * hidden_dim],
            Init::XavierUniform,
        )?;
        let bias = if vb.contains("bias") {
            vb.take_or_init(client, "bias", &[5 * hidden_dim], Init::Zeros)?
        } else {
            Tensor::<R>::from_slice(&forget_bias(hidden_dim), &[5 * hidden_dim], vb.device())
        };
        let dropout = dropout_prob.map(Dropout::new).transpose()?;
        Ok(Self {
            linear: Linear::new(weight, Some(bias), trainable),
            dropout,
            hidden_dim,
        })
    }
}

/// Bias vector with 1.0 on both forget-gate chunks.
fn forget_bias(hidden: usize) -> Vec<f32> {
    let mut bias = vec![0.0f32; 5 * hidden];
    bias[2 * hidden..4 * hidden].fill(1.0);
    bias
}

impl<R: Runtime<DType = DType>> NodeComposer<R> for BinaryTreeLstmCell<R> {
    fn compose<C>(&self, client: &C, left: &NodeStates<R>, right: &NodeStates<R>) -> Result<NodeStates<R>>
    where
        C: ParserClient<R>,
        R::Client: ParserClient<R>,
    {
        Error::check_shape("right", right.shape(), left.shape())?;
        let width = left.shape().last().copied().unwrap_or(0);
        if width != self.hidden_dim {
            return Err(Error::InvalidArgument {
                arg: "left",
                reason: format!("expected hidden width {}, got {width}", self.hidden_dim),
            });
        }

        let last = left.shape().len() as isize - 1;
        let x = var_cat(&[&left.h, &right.h], last, client).map_err(Error::Numr)?;
        let z = self.linear.forward(client, &x)?;
        let hidden = self.hidden_dim;
        let chunk = |k: usize| -> Result<Var<R>> {
            let part = var_narrow(&z, last, k * hidden, hidden).map_err(Error::Numr)?;
            Ok(var_contiguous(&part))
        };

        let mut g = var_tanh(&chunk(0)?, client).map_err(Error::Numr)?;
        if let Some(dropout) = &self.dropout {
            g = dropout.forward(client, &g)?;
        }
        let i = var_sigmoid(&chunk(1)?, client).map_err(Error::Numr)?;
        let f_l = var_sigmoid(&chunk(2)?, client).map_err(Error::Numr)?;
        let f_r = var_sigmoid(&chunk(3)?, client).map_err(Error::Numr)?;
        let o = var_sigmoid(&chunk(4)?, client).map_err(Error::Numr)?;

        let c = var_mul(&i, &g, client).map_err(Error::Numr)?;
        let c = var_add(&c, &var_mul(&f_l, &left.c, client).map_err(Error::Numr)?, client)
            .map_err(Error::Numr)?;
        let c = var_add(&c, &var_mul(&f_r, &right.c, client).map_err(Error::Numr)?, client)
            .map_err(Error::Numr)?;
        let h = var_mul(&o, &var_tanh(&c, client).map_err(Error::Numr)?, client).map_err(Error::Numr)?;
        Ok(NodeStates { h, c })
    }

    fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    fn set_training(&mut self, training: bool) {
        TrainMode::set_training(self, training);
    }

    fn named_parameters(&self) -> Vec<(String, &Var<R>)> {
        Module::named_parameters(self)
    }
}

impl<R: Runtime> Module<R> for BinaryTreeLstmCell<R> {
    fn named_parameters(&self) -> Vec<(String, &Var<R>)> {
        prefixed("linear", self.linear.named_parameters())
    }
}

impl<R: Runtime> TrainMode for BinaryTreeLstmCell<R> {
    fn set_training(&mut self, training: bool) {
        if let Some(dropout) = &mut self.dropout {
            dropout.set_training(training);
        }
    }

    fn is_training(&self) -> bool {
        self.dropout.as_ref().is_some_and(|d| d.is_training())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::VarMap;
    use crate::test_utils::cpu_setup;
    use numr::autograd::{backward, var_sum};
    use numr::runtime::cpu::{CpuDevice, CpuRuntime};

    fn states(device: &CpuDevice, h: &[f32], c: &[f32], shape: &[usize]) -> NodeStates<CpuRuntime> {
        NodeStates::new(
            Var::new(Tensor::<CpuRuntime>::from_slice(h, shape, device), false),
            Var::new(Tensor::<CpuRuntime>::from_slice(c, shape, device), false),
        )
        .unwrap()
    }

    #[test]
    fn test_forget_bias_layout() {
        assert_eq!(
            forget_bias(1),
            vec![0.0, 0.0, 1.0, 1.0, 0.0]
        );
    }

    #[test]
    fn test_compose_zero_weights() {
        let (client, device) = cpu_setup();
        let mut varmap = VarMap::<CpuRuntime>::new();
        varmap.insert("linear.weight", Tensor::<CpuRuntime>::zeros(&[10, 4], DType::F32, &device));
        varmap.insert("linear.bias", Tensor::<CpuRuntime>::zeros(&[10], DType::F32, &device));
        let mut vb = VarBuilder::new(&mut varmap, &device);
        let cell = BinaryTreeLstmCell::from_varbuilder(&mut vb, &client, 2, None, false).unwrap();

        let left = states(&device, &[1.0, 2.0], &[2.0, 0.0], &[1, 1, 2]);
        let right = states(&device, &[3.0, 4.0], &[0.0, 4.0], &[1, 1, 2]);
        let parent = cell.compose(&client, &left, &right).unwrap();
        assert_eq!(parent.shape(), &[1, 1, 2]);

        // every gate is σ(0) = 0.5 and g = tanh(0) = 0
        let c: Vec<f32> = parent.c.tensor().to_vec();
        let h: Vec<f32> = parent.h.tensor().to_vec();
        assert!((c[0] - 1.0).abs() < 1e-6 && (c[1] - 2.0).abs() < 1e-6);
        assert!((h[0] - 0.5 * 1.0f32.tanh()).abs() < 1e-6);
        assert!((h[1] - 0.5 * 2.0f32.tanh()).abs() < 1e-6);
    }

    #[test]
    fn test_compose_rejects_mismatched_children() {
        let (client, device) = cpu_setup();
        let mut varmap = VarMap::<CpuRuntime>::new();
        let mut vb = VarBuilder::new(&mut varmap, &device);
        let cell = BinaryTreeLstmCell::from_varbuilder(&mut vb, &client, 2, None, false).unwrap();
        let left = states(&device, &[0.0; 4], &[0.0; 4], &[1, 2, 2]);
        let right = states(&device, &[0.0; 2], &[0.0; 2], &[1, 1, 2]);
        assert!(matches!(
            cell.compose(&client, &left, &right),
            Err(Error::ShapeMismatch { arg: "right", .. })
        ));
    }

    #[test]
    fn test_compose_gradients_reach_weights() {
        let (client, device) = cpu_setup();
        let mut varmap = VarMap::<CpuRuntime>::new();
        let mut vb = VarBuilder::new(&mut varmap, &device);
        let cell = BinaryTreeLstmCell::from_varbuilder(&mut vb, &client, 3, None, true).unwrap();
        assert_eq!(cell.num_parameters(), 5 * 3 * 6 + 5 * 3);

        let left = states(&device, &[0.1, 0.2, 0.3], &[0.0, 0.5, -0.5], &[1, 1, 3]);
        let right = states(&device, &[-0.3, 0.2, 0.1], &[0.5, 0.0, 0.5], &[1, 1, 3]);
        let parent = cell.compose(&client, &left, &right).unwrap();
        let loss = var_sum(&parent.h, &[], false, &client).unwrap();
        let grads = backward(&loss, &client).unwrap();
        for (name, param) in Module::named_parameters(&cell) {
            assert!(grads.get(param.id()).is_some(), "missing gradient for {name}");
        }
    }

    #[test]
    fn test_train_mode_follows_dropout() {
        let (client, device) = cpu_setup();
        let mut varmap = VarMap::<CpuRuntime>::new();
        let mut vb = VarBuilder::new(&mut varmap, &device);
        let mut cell =
            BinaryTreeLstmCell::from_varbuilder(&mut vb, &client, 2, Some(0.1), false).unwrap();
        assert!(TrainMode::is_training(&cell));
        NodeComposer::set_training(&mut cell, false);
        assert!(!TrainMode::is_training(&cell));
    }
}
