//! Per-call sampling options and action resolution for one merge round.

use crate::client::ParserClient;
use crate::distribution::MaskedCategorical;
use crate::error::{Error, Result};
use crate::ops::host::{one_hot_argmax, read_f32};
use crate::ops::{var_clamp_grad, var_straight_through};
use numr::autograd::{Var, var_add, var_exp, var_matmul, var_reshape};
use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;

/// Gradient clamp applied to relaxed actions.
const ACTION_GRAD_CLAMP: f32 = 0.5;

/// Learned temperature schedule `(t0, t1, t2)`.
///
/// For a round with `N` valid slots: `τ = t0 + exp(t1)·ln(N + 1) + exp(t2)·N`.
pub struct TemperatureWeights<R: Runtime> {
    weights: Var<R>,
}

impl<R: Runtime<DType = DType>> TemperatureWeights<R> {
    /// Wrap a `[3]` tensor.
    pub fn new(weights: Tensor<R>, trainable: bool) -> Result<Self> {
        Error::check_shape("temperature", weights.shape(), &[3])?;
        Ok(Self {
            weights: Var::new(weights, trainable),
        })
    }

    pub fn from_values(t0: f32, t1: f32, t2: f32, device: &R::Device, trainable: bool) -> Self {
        Self {
            weights: Var::new(Tensor::<R>::from_slice(&[t0, t1, t2], &[3], device), trainable),
        }
    }

    pub fn var(&self) -> &Var<R> {
        &self.weights
    }

    /// `[B, 1]` temperatures for the given per-row valid-slot counts.
    pub fn temperature<C>(&self, client: &C, valid_counts: &[f32]) -> Result<Var<R>>
    where
        C: ParserClient<R>,
        R::Client: ParserClient<R>,
    {
        let batch = valid_counts.len();
        let device = self.weights.tensor().device();

        // Per-row features: [1, 0, 0] against the raw weights and
        // [0, ln(N + 1), N] against their exponentials.
        let mut linear = Vec::with_capacity(batch * 3);
        let mut scaled = Vec::with_capacity(batch * 3);
        for &n in valid_counts {
            linear.extend_from_slice(&[1.0, 0.0, 0.0]);
            scaled.extend_from_slice(&[0.0, (n + 1.0).ln(), n]);
        }
        let linear = Var::new(Tensor::<R>::from_slice(&linear, &[batch, 3], device), false);
        let scaled = Var::new(Tensor::<R>::from_slice(&scaled, &[batch, 3], device), false);

        let w = var_reshape(&self.weights, &[3, 1]).map_err(Error::Numr)?;
        let w_exp = var_exp(&w, client).map_err(Error::Numr)?;
        let tau = var_matmul(&linear, &w, client).map_err(Error::Numr)?;
        let tau_exp = var_matmul(&scaled, &w_exp, client).map_err(Error::Numr)?;
        var_add(&tau, &tau_exp, client).map_err(Error::Numr)
    }
}

/// Flags of one parser evaluation.
///
/// `noise` and `eval_actions`, when given, hold one `[B, L-1-k]` tensor per
/// merge round `k` (so `L-1` entries in total).
pub struct ForwardOptions<'a, R: Runtime> {
    /// Relaxed (Gumbel-softmax) actions instead of hard samples
    pub relaxed: bool,
    /// Temperature schedule; required exactly when `relaxed`
    pub temperature: Option<&'a TemperatureWeights<R>>,
    /// Harden relaxed samples in the forward value
    pub straight_through: bool,
    /// Gumbel noise to replay, per round
    pub noise: Option<&'a [Tensor<R>]>,
    /// Actions to use instead of sampling, per round
    pub eval_actions: Option<&'a [Tensor<R>]>,
}

impl<'a, R: Runtime> ForwardOptions<'a, R> {
    /// Hard categorical sampling.
    pub fn discrete() -> Self {
        Self {
            relaxed: false,
            temperature: None,
            straight_through: false,
            noise: None,
            eval_actions: None,
        }
    }

    /// Relaxed sampling with the given temperature schedule.
    pub fn relaxed(temperature: &'a TemperatureWeights<R>) -> Self {
        Self {
            relaxed: true,
            temperature: Some(temperature),
            ..Self::discrete()
        }
    }

    pub fn with_straight_through(mut self, straight_through: bool) -> Self {
        self.straight_through = straight_through;
        self
    }

    pub fn with_noise(mut self, noise: &'a [Tensor<R>]) -> Self {
        self.noise = Some(noise);
        self
    }

    pub fn with_eval_actions(mut self, eval_actions: &'a [Tensor<R>]) -> Self {
        self.eval_actions = Some(eval_actions);
        self
    }

    /// Check the flag combination and resolve it into a [`SamplingMode`].
    pub fn mode(&self) -> Result<SamplingMode<'a, R>> {
        match (self.relaxed, self.temperature) {
            (false, temperature) => {
                if self.straight_through || temperature.is_some() {
                    return Err(Error::config(
                        "straight_through and temperature require relaxed sampling",
                    ));
                }
                Ok(SamplingMode::Discrete)
            }
            (true, None) => Err(Error::config("relaxed sampling requires temperature weights")),
            (true, Some(temperature)) => Ok(SamplingMode::Relaxed {
                temperature,
                straight_through: self.straight_through,
            }),
        }
    }
}

impl<R: Runtime> Default for ForwardOptions<'_, R> {
    fn default() -> Self {
        Self::discrete()
    }
}

/// Validated sampling regime.
pub enum SamplingMode<'a, R: Runtime> {
    Discrete,
    Relaxed {
        temperature: &'a TemperatureWeights<R>,
        straight_through: bool,
    },
}

impl<R: Runtime> SamplingMode<'_, R> {
    pub fn is_relaxed(&self) -> bool {
        matches!(self, Self::Relaxed { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Discrete => "discrete",
            Self::Relaxed {
                straight_through: true,
                ..
            } => "straight_through",
            Self::Relaxed { .. } => "relaxed",
        }
    }
}

/// Action of one round plus the noise that produced it, if any.
pub(crate) struct RoundAction<R: Runtime> {
    pub action: Var<R>,
    pub noise: Option<Tensor<R>>,
}

/// Pick the round's action from `dist`.
///
/// In evaluation mode this is the arg-max one-hot. In training mode it is a
/// Gumbel-max sample (discrete) or a Gumbel-softmax sample whose gradient is
/// clamped to `[-0.5, 0.5]` (relaxed), optionally hardened to one-hot in the
/// forward value.
pub(crate) fn resolve_action<R, C>(
    client: &C,
    dist: &MaskedCategorical<R>,
    mode: &SamplingMode<'_, R>,
    training: bool,
    noise: Option<&Tensor<R>>,
) -> Result<RoundAction<R>>
where
    R: Runtime<DType = DType>,
    C: ParserClient<R>,
    R::Client: ParserClient<R>,
{
    if !training {
        return Ok(RoundAction {
            action: Var::new(dist.mode(), false),
            noise: None,
        });
    }
    match mode {
        SamplingMode::Discrete => {
            let (action, noise) = dist.hard_sample(client, noise)?;
            Ok(RoundAction {
                action: Var::new(action, false),
                noise: Some(noise),
            })
        }
        SamplingMode::Relaxed {
            temperature,
            straight_through,
        } => {
            let tau = temperature.temperature(client, dist.valid_counts())?;
            let (mut action, noise) = dist.relaxed_sample(client, &tau, noise)?;
            if *straight_through {
                let hard = one_hot_argmax(&read_f32(action.tensor()), dist.slots());
                let hard = Tensor::<R>::from_slice(&hard, action.shape(), action.tensor().device());
                action = var_straight_through(&action, &hard)?;
            }
            let action = var_clamp_grad(&action, -ACTION_GRAD_CLAMP, ACTION_GRAD_CLAMP)?;
            Ok(RoundAction {
                action,
                noise: Some(noise),
            })
        }
    }
}
