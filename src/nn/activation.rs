//! Activation function selector

use crate::client::ParserClient;
use crate::error::{Error, Result};
use numr::autograd::{Var, var_relu, var_sigmoid, var_tanh};
use numr::dtype::DType;
use numr::ops::{ActivationOps, UnaryOps};
use numr::runtime::{Runtime, RuntimeClient};
use numr::tensor::Tensor;

/// Activation function selector.
///
/// `Tanh` doubles as the range limiter that keeps leaf states in the same
/// range as composed node states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Sigmoid,
    Tanh,
}

impl Activation {
    /// Apply this activation to a tensor.
    pub fn forward<R, C>(&self, client: &C, x: &Tensor<R>) -> numr::error::Result<Tensor<R>>
    where
        R: Runtime,
        C: ActivationOps<R> + UnaryOps<R> + RuntimeClient<R>,
    {
        match self {
            Activation::Relu => client.relu(x),
            Activation::Sigmoid => client.sigmoid(x),
            Activation::Tanh => client.tanh(x),
        }
    }

    /// Apply this activation to a Var, recording it for autograd.
    pub fn forward_var<R, C>(&self, client: &C, x: &Var<R>) -> Result<Var<R>>
    where
        R: Runtime<DType = DType>,
        C: ParserClient<R>,
        R::Client: ParserClient<R>,
    {
        let y = match self {
            Activation::Relu => var_relu(x, client),
            Activation::Sigmoid => var_sigmoid(x, client),
            Activation::Tanh => var_tanh(x, client),
        };
        y.map_err(Error::Numr)
    }
}

impl std::fmt::Display for Activation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Activation::Relu => write!(f, "relu"),
            Activation::Sigmoid => write!(f, "sigmoid"),
            Activation::Tanh => write!(f, "tanh"),
        }
    }
}
