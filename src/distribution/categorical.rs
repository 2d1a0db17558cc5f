//! Categorical distribution over the valid slots of a masked score matrix.

use crate::client::ParserClient;
use crate::error::{Error, Result};
use crate::ops::host::{argmax, masked_argmax, read_f32, row_sums};
use numr::autograd::{Var, var_add, var_div, var_exp, var_log_softmax, var_mul, var_softmax, var_sum};
use numr::dtype::DType;
use numr::ops::RandomOps;
use numr::runtime::{Runtime, RuntimeClient};
use numr::tensor::Tensor;

/// Logit that replaces the score of a masked slot.
const MASK_PENALTY: f32 = -1e9;

/// Uniform draws are clamped into `(U_MIN, U_MAX)` before the Gumbel transform.
const U_MIN: f32 = 1e-10;
const U_MAX: f32 = 1.0 - 1e-7;

/// Masked categorical distribution, one row per batch element.
///
/// Built from scores `[B, N]` and a 0/1 mask `[B, N]`. Masked slots get
/// probability 0; a row with no valid slot ignores its scores and
/// degenerates to the uniform distribution. Log-probabilities and the relaxed
/// sample stay on the autograd graph of `scores`.
pub struct MaskedCategorical<R: Runtime> {
    log_probs: Var<R>,
    probs: Var<R>,
    mask: Tensor<R>,
    penalty: Var<R>,
    mask_host: Vec<f32>,
    valid: Vec<f32>,
    batch: usize,
    slots: usize,
}

impl<R: Runtime<DType = DType>> MaskedCategorical<R> {
    pub fn new<C>(client: &C, scores: &Var<R>, mask: &Tensor<R>) -> Result<Self>
    where
        C: ParserClient<R>,
        R::Client: ParserClient<R>,
    {
        let shape = scores.shape().to_vec();
        if shape.len() != 2 {
            return Err(Error::InvalidArgument {
                arg: "scores",
                reason: format!("expected [batch, slots], got {shape:?}"),
            });
        }
        Error::check_shape("mask", mask.shape(), &shape)?;
        let (batch, slots) = (shape[0], shape[1]);

        let mask_host = read_f32(mask);
        let valid = row_sums(&mask_host, slots);

        // Masked slots are replaced by the penalty rather than offset by it.
        // Rows without a valid slot are zeroed instead, which makes them uniform.
        let mut keep = vec![0.0f32; batch * slots];
        let mut penalty = vec![0.0f32; batch * slots];
        if slots > 0 {
            for (row, row_mask) in mask_host.chunks(slots).enumerate() {
                if valid[row] == 0.0 {
                    continue;
                }
                for (j, &m) in row_mask.iter().enumerate() {
                    keep[row * slots + j] = m;
                    penalty[row * slots + j] = (1.0 - m) * MASK_PENALTY;
                }
            }
        }
        let keep = Var::new(Tensor::<R>::from_slice(&keep, &shape, mask.device()), false);
        let penalty = Var::new(Tensor::<R>::from_slice(&penalty, &shape, mask.device()), false);

        let kept = var_mul(scores, &keep, client).map_err(Error::Numr)?;
        let logits = var_add(&kept, &penalty, client).map_err(Error::Numr)?;
        let log_probs = var_log_softmax(&logits, -1, client).map_err(Error::Numr)?;
        let probs = var_exp(&log_probs, client).map_err(Error::Numr)?;

        Ok(Self {
            log_probs,
            probs,
            mask: mask.clone(),
            penalty,
            mask_host,
            valid,
            batch,
            slots,
        })
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Number of valid slots per row.
    pub fn valid_counts(&self) -> &[f32] {
        &self.valid
    }

    /// `[B, N]` probabilities.
    pub fn probs(&self) -> &Var<R> {
        &self.probs
    }

    /// `[B, N]` log-probabilities.
    pub fn log_probs(&self) -> &Var<R> {
        &self.log_probs
    }

    pub fn mask(&self) -> &Tensor<R> {
        &self.mask
    }

    /// `[B]` entropy over valid slots; exactly 0 for rows with a single valid slot.
    pub fn entropy<C>(&self, client: &C) -> Result<Var<R>>
    where
        C: ParserClient<R>,
        R::Client: ParserClient<R>,
    {
        // -mask, zeroed on single-slot rows
        let weight: Vec<f32> = self
            .mask_host
            .chunks(self.slots.max(1))
            .zip(&self.valid)
            .flat_map(|(row, &n)| {
                let keep = if n == 1.0 { 0.0 } else { -1.0 };
                row.iter().map(move |m| m * keep)
            })
            .collect();
        let weight = self.constant(&weight, &[self.batch, self.slots]);
        let plogp = var_mul(&self.log_probs, &self.probs, client).map_err(Error::Numr)?;
        let terms = var_mul(&plogp, &weight, client).map_err(Error::Numr)?;
        var_sum(&terms, &[1], false, client).map_err(Error::Numr)
    }

    /// `[B]` entropy divided by `ln(n)`, the entropy of the uniform
    /// distribution over the row's `n` valid slots.
    pub fn normalized_entropy<C>(&self, client: &C) -> Result<Var<R>>
    where
        C: ParserClient<R>,
        R::Client: ParserClient<R>,
    {
        let entropy = self.entropy(client)?;
        let scale: Vec<f32> = self
            .valid
            .iter()
            .map(|&n| {
                let n = n as f64;
                (1.0 / ((n + 1e-17).ln() + 1e-17)) as f32
            })
            .collect();
        let scale = self.constant(&scale, &[self.batch]);
        var_mul(&entropy, &scale, client).map_err(Error::Numr)
    }

    /// `[B]` log-probability of the slot each action row points at (its arg-max).
    /// Rows without a valid slot contribute 0.
    pub fn log_prob<C>(&self, client: &C, action: &Tensor<R>) -> Result<Var<R>>
    where
        C: ParserClient<R>,
        R::Client: ParserClient<R>,
    {
        Error::check_shape("action", action.shape(), &[self.batch, self.slots])?;
        let action_host = read_f32(action);
        let mut select = vec![0.0f32; self.batch * self.slots];
        if self.slots > 0 {
            for (row, chunk) in action_host.chunks(self.slots).enumerate() {
                if self.valid[row] != 0.0 {
                    select[row * self.slots + argmax(chunk)] = 1.0;
                }
            }
        }
        let select = self.constant(&select, &[self.batch, self.slots]);
        let picked = var_mul(&self.log_probs, &select, client).map_err(Error::Numr)?;
        var_sum(&picked, &[1], false, client).map_err(Error::Numr)
    }

    /// Hard one-hot sample via Gumbel-max over valid slots.
    ///
    /// Returns `(action [B, N], noise [B, N])`. Supplied noise is used
    /// verbatim; otherwise fresh Gumbel noise is drawn and returned.
    pub fn hard_sample<C>(&self, client: &C, noise: Option<&Tensor<R>>) -> Result<(Tensor<R>, Tensor<R>)>
    where
        C: ParserClient<R>,
    {
        let noise = self.resolve_noise(client, noise)?;
        let perturbed: Vec<f32> = read_f32(self.log_probs.tensor())
            .iter()
            .zip(read_f32(&noise))
            .map(|(lp, g)| lp + g)
            .collect();
        let action = self.one_hot_masked_argmax(&perturbed);
        Ok((action, noise))
    }

    /// Arg-max one-hot of the probabilities, restricted to valid slots.
    pub fn mode(&self) -> Tensor<R> {
        self.one_hot_masked_argmax(&read_f32(self.probs.tensor()))
    }

    /// Relaxed (Gumbel-softmax) sample at per-row temperature `tau: [B, 1]`.
    ///
    /// `softmax((log p + g) / tau)` over valid slots. Gradients flow to both
    /// the scores and `tau`. Returns `(sample [B, N], noise [B, N])`.
    pub fn relaxed_sample<C>(
        &self,
        client: &C,
        tau: &Var<R>,
        noise: Option<&Tensor<R>>,
    ) -> Result<(Var<R>, Tensor<R>)>
    where
        C: ParserClient<R>,
        R::Client: ParserClient<R>,
    {
        Error::check_shape("tau", tau.shape(), &[self.batch, 1])?;
        let noise = self.resolve_noise(client, noise)?;
        let g = Var::new(noise.clone(), false);
        let perturbed = var_add(&self.log_probs, &g, client).map_err(Error::Numr)?;
        let scaled = var_div(&perturbed, tau, client).map_err(Error::Numr)?;
        let logits = var_add(&scaled, &self.penalty, client).map_err(Error::Numr)?;
        let sample = var_softmax(&logits, -1, client).map_err(Error::Numr)?;
        Ok((sample, noise))
    }

    fn resolve_noise<C>(&self, client: &C, noise: Option<&Tensor<R>>) -> Result<Tensor<R>>
    where
        C: RuntimeClient<R> + RandomOps<R>,
    {
        match noise {
            Some(n) => {
                Error::check_shape("noise", n.shape(), &[self.batch, self.slots])?;
                Ok(n.clone())
            }
            None => gumbel_noise(client, &[self.batch, self.slots], self.mask.device()),
        }
    }

    fn one_hot_masked_argmax(&self, values: &[f32]) -> Tensor<R> {
        let mut out = vec![0.0f32; self.batch * self.slots];
        if self.slots > 0 {
            for (row, (vals, mask)) in values
                .chunks(self.slots)
                .zip(self.mask_host.chunks(self.slots))
                .enumerate()
            {
                out[row * self.slots + masked_argmax(vals, mask)] = 1.0;
            }
        }
        Tensor::<R>::from_slice(&out, &[self.batch, self.slots], self.mask.device())
    }

    fn constant(&self, data: &[f32], shape: &[usize]) -> Var<R> {
        Var::new(Tensor::<R>::from_slice(data, shape, self.mask.device()), false)
    }
}

/// Standard Gumbel noise `-ln(-ln u)` with `u ~ U(0, 1)` drawn on the client.
pub fn gumbel_noise<R, C>(client: &C, shape: &[usize], device: &R::Device) -> Result<Tensor<R>>
where
    R: Runtime<DType = DType>,
    C: RuntimeClient<R> + RandomOps<R>,
{
    let u = read_f32(&client.rand(shape, DType::F32)?);
    let g: Vec<f32> = u
        .iter()
        .map(|&u| -(-(u.clamp(U_MIN, U_MAX)).ln()).ln())
        .collect();
    Ok(Tensor::<R>::from_slice(&g, shape, device))
}
