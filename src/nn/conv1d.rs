//! 1D convolution layer over sequence-major inputs

use crate::client::ParserClient;
use crate::error::{Error, Result};
use crate::nn::init::Init;
use crate::nn::module::Module;
use crate::nn::var_builder::VarBuilder;
use crate::ops::var_contiguous;
use numr::autograd::{Var, var_add, var_cat, var_matmul, var_narrow, var_reshape, var_transpose};
use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;

/// 1D convolution with stride 1 and "same" zero padding.
///
/// Weight: `[out_channels, in_channels, kernel_size]` (odd kernel)
/// Input:  `[batch, length, in_channels]`
/// Output: `[batch, length, out_channels]`
///
/// The input stays sequence-major, so no permute is needed around the call.
/// Each kernel tap is one batched matmul over a shifted window of the padded
/// input; everything is composed from autograd ops, so gradients reach both
/// the input and the weights.
pub struct Conv1d<R: Runtime> {
    weight: Var<R>,
    bias: Option<Var<R>>,
}

impl<R: Runtime<DType = DType>> Conv1d<R> {
    pub fn new(weight: Tensor<R>, bias: Option<Tensor<R>>, trainable: bool) -> Result<Self> {
        let shape = weight.shape();
        if shape.len() != 3 {
            return Err(Error::InvalidArgument {
                arg: "weight",
                reason: format!("expected [out, in, kernel], got {shape:?}"),
            });
        }
        if shape[2] % 2 == 0 {
            return Err(Error::InvalidArgument {
                arg: "weight",
                reason: format!("same padding needs an odd kernel, got {}", shape[2]),
            });
        }
        if let Some(b) = &bias {
            Error::check_shape("bias", b.shape(), &shape[..1])?;
        }
        Ok(Self {
            weight: Var::new(weight, trainable),
            bias: bias.map(|b| Var::new(b, trainable)),
        })
    }

    /// Build from `{prefix}.weight` / `{prefix}.bias` with PyTorch's default
    /// uniform initialization for anything missing.
    pub fn from_varbuilder<C>(
        vb: &mut VarBuilder<'_, R>,
        client: &C,
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        trainable: bool,
    ) -> Result<Self>
    where
        C: ParserClient<R>,
    {
        let weight = vb.take_or_init(
            client,
            "weight",
            &[out_channels, in_channels, kernel_size],
            Init::PyTorchLinear,
        )?;
        let bound = 1.0 / ((in_channels * kernel_size).max(1) as f32).sqrt();
        let bias = vb.take_or_init(client, "bias", &[out_channels], Init::Uniform(bound))?;
        Self::new(weight, Some(bias), trainable)
    }

    pub fn in_channels(&self) -> usize {
        self.weight.shape()[1]
    }

    pub fn out_channels(&self) -> usize {
        self.weight.shape()[0]
    }

    pub fn kernel_size(&self) -> usize {
        self.weight.shape()[2]
    }

    /// Forward pass.
    ///
    /// Input: `[batch, length, in_channels]`
    /// Output: `[batch, length, out_channels]`
    pub fn forward<C>(&self, client: &C, input: &Var<R>) -> Result<Var<R>>
    where
        C: ParserClient<R>,
        R::Client: ParserClient<R>,
    {
        let shape = input.shape().to_vec();
        if shape.len() != 3 || shape[2] != self.in_channels() {
            return Err(Error::ShapeMismatch {
                arg: "input",
                expected: vec![shape.first().copied().unwrap_or(0), 0, self.in_channels()],
                got: shape,
            });
        }
        let (batch, len) = (shape[0], shape[1]);
        let (c_in, c_out, kernel) = (self.in_channels(), self.out_channels(), self.kernel_size());
        let pad = kernel / 2;

        let padded = if pad > 0 {
            let zeros = Var::new(
                Tensor::<R>::zeros(&[batch, pad, c_in], DType::F32, input.tensor().device()),
                false,
            );
            var_cat(&[&zeros, input, &zeros], 1, client).map_err(Error::Numr)?
        } else {
            input.clone()
        };

        let mut acc: Option<Var<R>> = None;
        for tap in 0..kernel {
            let window = var_contiguous(&var_narrow(&padded, 1, tap, len).map_err(Error::Numr)?);
            let w_tap = var_contiguous(&var_narrow(&self.weight, 2, tap, 1).map_err(Error::Numr)?);
            let w_tap = var_reshape(&w_tap, &[c_out, c_in]).map_err(Error::Numr)?;
            let w_t = var_transpose(&w_tap).map_err(Error::Numr)?;
            let y = var_matmul(&window, &w_t, client).map_err(Error::Numr)?;
            acc = Some(match acc {
                Some(sum) => var_add(&sum, &y, client).map_err(Error::Numr)?,
                None => y,
            });
        }
        let output = acc.ok_or_else(|| Error::InvalidArgument {
            arg: "weight",
            reason: "kernel size must be positive".into(),
        })?;

        match &self.bias {
            Some(bias) => var_add(&output, bias, client).map_err(Error::Numr),
            None => Ok(output),
        }
    }

    pub fn weight(&self) -> &Var<R> {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Var<R>> {
        self.bias.as_ref()
    }
}

impl<R: Runtime> Module<R> for Conv1d<R> {
    fn named_parameters(&self) -> Vec<(String, &Var<R>)> {
        let mut params = vec![("weight".to_string(), &self.weight)];
        if let Some(b) = &self.bias {
            params.push(("bias".to_string(), b));
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::cpu_setup;
    use numr::autograd::{backward, var_sum};
    use numr::runtime::cpu::CpuRuntime;

    #[test]
    fn test_conv1d_same_padding_shape() {
        let (client, device) = cpu_setup();
        // weight: [out=4, in=3, kernel=5]
        let weight = Tensor::<CpuRuntime>::from_slice(&[0.1f32; 60], &[4, 3, 5], &device);
        let conv = Conv1d::new(weight, None, false).unwrap();

        // input: [batch=2, length=10, channels=3]
        let input = Var::new(
            Tensor::<CpuRuntime>::from_slice(&[0.1f32; 60], &[2, 10, 3], &device),
            false,
        );
        let out = conv.forward(&client, &input).unwrap();
        assert_eq!(out.shape(), &[2, 10, 4]);
    }

    #[test]
    fn test_conv1d_known_values() {
        let (client, device) = cpu_setup();
        // Single channel, kernel [1, 2, 3]: y[t] = x[t-1] + 2 x[t] + 3 x[t+1]
        let weight = Tensor::<CpuRuntime>::from_slice(&[1.0f32, 2.0, 3.0], &[1, 1, 3], &device);
        let bias = Tensor::<CpuRuntime>::from_slice(&[10.0f32], &[1], &device);
        let conv = Conv1d::new(weight, Some(bias), false).unwrap();

        let input = Var::new(
            Tensor::<CpuRuntime>::from_slice(&[1.0f32, 2.0, 3.0], &[1, 3, 1], &device),
            false,
        );
        let out = conv.forward(&client, &input).unwrap();
        let data: Vec<f32> = out.tensor().to_vec();
        // before bias: t=0: 0 + 2 + 6 = 8; t=1: 1 + 4 + 9 = 14; t=2: 2 + 6 + 0 = 8
        assert_eq!(data, vec![18.0, 24.0, 18.0]);
    }

    #[test]
    fn test_conv1d_rejects_even_kernel() {
        let (_client, device) = cpu_setup();
        let weight = Tensor::<CpuRuntime>::from_slice(&[0.1f32; 4], &[1, 1, 4], &device);
        assert!(Conv1d::new(weight, None, false).is_err());
    }

    #[test]
    fn test_conv1d_gradients_reach_weight() {
        let (client, device) = cpu_setup();
        let weight = Tensor::<CpuRuntime>::from_slice(&[1.0f32, 1.0, 1.0], &[1, 1, 3], &device);
        let conv = Conv1d::new(weight, None, true).unwrap();
        let input = Var::new(
            Tensor::<CpuRuntime>::from_slice(&[1.0f32, 2.0, 3.0], &[1, 3, 1], &device),
            false,
        );
        let out = conv.forward(&client, &input).unwrap();
        let loss = var_sum(&out, &[], false, &client).unwrap();
        let grads = backward(&loss, &client).unwrap();
        let dw: Vec<f32> = grads.get(conv.weight().id()).unwrap().to_vec();
        // tap 0 sees [0, 1, 2], tap 1 sees [1, 2, 3], tap 2 sees [2, 3, 0]
        assert_eq!(dw, vec![3.0, 6.0, 5.0]);
    }
}
