//! Linear layer

use crate::error::Result;
use crate::nn::init::Init;
use crate::nn::module::Module;
use crate::nn::var_builder::VarBuilder;
use numr::autograd::{Var, var_add, var_matmul, var_transpose};
use numr::dtype::DType;
use numr::ops::{RandomOps, TensorOps};
use numr::runtime::{Runtime, RuntimeClient};
use numr::tensor::Tensor;

/// Dense linear layer: output = input @ weight^T + bias
///
/// Uses `Var<R>` throughout, so autograd works during training with
/// near-zero overhead during inference.
pub struct Linear<R: Runtime> {
    weight: Var<R>,
    bias: Option<Var<R>>,
}

impl<R: Runtime> Linear<R> {
    /// Create from loaded tensors. `trainable` controls gradient tracking.
    pub fn new(weight: Tensor<R>, bias: Option<Tensor<R>>, trainable: bool) -> Self {
        Self {
            weight: Var::new(weight, trainable),
            bias: bias.map(|b| Var::new(b, trainable)),
        }
    }

    /// Forward: input @ weight^T + bias
    ///
    /// input: `[..., in_features]`, output: `[..., out_features]`
    pub fn forward<C>(&self, client: &C, input: &Var<R>) -> Result<Var<R>>
    where
        C: RuntimeClient<R> + TensorOps<R>,
        R::Client: TensorOps<R>,
    {
        let w_t = var_transpose(&self.weight).map_err(crate::error::Error::Numr)?;
        let output = var_matmul(input, &w_t, client).map_err(crate::error::Error::Numr)?;
        match &self.bias {
            Some(bias) => var_add(&output, bias, client).map_err(crate::error::Error::Numr),
            None => Ok(output),
        }
    }

    pub fn weight(&self) -> &Var<R> {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Var<R>> {
        self.bias.as_ref()
    }

    /// Output width (rows of the weight).
    pub fn out_features(&self) -> usize {
        self.weight.shape()[0]
    }

    /// Input width (columns of the weight).
    pub fn in_features(&self) -> usize {
        self.weight.shape()[1]
    }
}

impl<R: Runtime<DType = DType>> Linear<R> {
    /// Build from `{prefix}.weight` / `{prefix}.bias`, initializing whatever
    /// the builder does not hold. Bias defaults to zeros.
    pub fn from_varbuilder<C>(
        vb: &mut VarBuilder<'_, R>,
        client: &C,
        in_features: usize,
        out_features: usize,
        bias: bool,
        init: Init,
        trainable: bool,
    ) -> Result<Self>
    where
        C: RuntimeClient<R> + RandomOps<R>,
    {
        let weight = vb.take_or_init(client, "weight", &[out_features, in_features], init)?;
        let bias = if bias {
            Some(vb.take_or_init(client, "bias", &[out_features], Init::Zeros)?)
        } else {
            None
        };
        Ok(Self::new(weight, bias, trainable))
    }
}

impl<R: Runtime> Module<R> for Linear<R> {
    fn named_parameters(&self) -> Vec<(String, &Var<R>)> {
        let mut params = vec![("weight".to_string(), &self.weight)];
        if let Some(b) = &self.bias {
            params.push(("bias".to_string(), b));
        }
        params
    }
}
