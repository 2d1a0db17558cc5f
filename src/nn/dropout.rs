//! Inverted dropout with a training switch

use crate::client::ParserClient;
use crate::error::{Error, Result};
use crate::nn::module::TrainMode;
use numr::autograd::{Var, var_dropout};
use numr::dtype::DType;
use numr::runtime::Runtime;

/// Dropout layer.
///
/// In training mode each element is zeroed with probability `p` and the
/// survivors are scaled by `1/(1-p)`. In evaluation mode the input passes
/// through unchanged. Starts in training mode.
#[derive(Debug, Clone)]
pub struct Dropout {
    p: f64,
    training: bool,
}

impl Dropout {
    pub fn new(p: f64) -> Result<Self> {
        if !(0.0..1.0).contains(&p) {
            return Err(Error::config(format!(
                "dropout probability must be in [0, 1), got {p}"
            )));
        }
        Ok(Self { p, training: true })
    }

    pub fn p(&self) -> f64 {
        self.p
    }

    pub fn forward<R, C>(&self, client: &C, input: &Var<R>) -> Result<Var<R>>
    where
        R: Runtime<DType = DType>,
        C: ParserClient<R>,
        R::Client: ParserClient<R>,
    {
        if !self.training || self.p == 0.0 {
            return Ok(input.clone());
        }
        let (output, _mask) = var_dropout(input, self.p, client).map_err(Error::Numr)?;
        Ok(output)
    }
}

impl TrainMode for Dropout {
    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}
