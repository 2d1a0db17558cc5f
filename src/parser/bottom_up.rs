//! Bottom-up merge driver.
//!
//! Starting from `L` leaf states, every round composes each adjacent pair,
//! scores the candidates, picks one merge per sequence and folds it into a
//! sequence one shorter. After `L - 1` rounds one state per sequence remains:
//! the tree root. Right padding is carried through unchanged, so a padded
//! sequence reaches its root early and keeps it.

use crate::client::ParserClient;
use crate::distribution::MaskedCategorical;
use crate::error::{Error, Result};
use crate::nn::init::Init;
use crate::nn::module::{Module, TrainMode, prefixed};
use crate::nn::tree_lstm::BinaryTreeLstmCell;
use crate::nn::var_builder::VarBuilder;
use crate::nn::varmap::VarMap;
use crate::ops::host::{read_f32, slice_columns};
use crate::ops::{MergeOperands, var_contiguous, var_tree_merge};
use crate::parser::config::ParserConfig;
use crate::parser::encoder::LeafEncoder;
use crate::parser::sampling::{ForwardOptions, RoundAction, resolve_action};
use crate::parser::trace::{MergeTrace, RoundRecord};
use crate::parser::traits::{NodeComposer, NodeStates};
use numr::autograd::{Var, var_add, var_matmul, var_mul, var_reshape};
use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;
use tracing::{debug, trace, warn};

/// Guards the length normalization when no round past the first has a valid slot.
const NORM_EPS: f64 = 1e-17;

/// Aggregates of one evaluation.
pub struct ParseSummary<R: Runtime> {
    /// Root states, `[B, H]` each
    pub root: NodeStates<R>,
    /// `[B]` entropy summed over rounds
    pub entropy: Var<R>,
    /// `[B]` normalized entropy summed over rounds, divided by the number of
    /// valid slots from position 2 on
    pub normalized_entropy: Var<R>,
    /// `[B]` log-probability of the realized merges; `None` in relaxed mode
    pub log_prob: Option<Var<R>>,
}

/// Result of [`BottomUpParser::forward`].
pub struct ParseOutput<R: Runtime> {
    pub root: NodeStates<R>,
    pub entropy: Var<R>,
    pub normalized_entropy: Var<R>,
    pub log_prob: Option<Var<R>>,
    pub trace: MergeTrace<R>,
}

/// Latent-tree parser: leaf encoder, node composer and the learned query
/// vector that scores merge candidates.
pub struct BottomUpParser<R: Runtime, K: NodeComposer<R> = BinaryTreeLstmCell<R>> {
    config: ParserConfig,
    encoder: LeafEncoder<R>,
    composer: K,
    query: Var<R>,
    training: bool,
}

impl<R: Runtime<DType = DType>> BottomUpParser<R> {
    /// Freshly initialized parser with the Tree-LSTM composer.
    pub fn new<C>(client: &C, config: ParserConfig, device: &R::Device, trainable: bool) -> Result<Self>
    where
        C: ParserClient<R>,
    {
        let mut varmap = VarMap::new();
        let mut vb = VarBuilder::new(&mut varmap, device);
        Self::from_varbuilder(&mut vb, client, config, trainable)
    }

    /// Parser with the Tree-LSTM composer, taking named weights from `vb`.
    pub fn from_varbuilder<C>(
        vb: &mut VarBuilder<'_, R>,
        client: &C,
        config: ParserConfig,
        trainable: bool,
    ) -> Result<Self>
    where
        C: ParserClient<R>,
    {
        config.validate()?;
        let composer = BinaryTreeLstmCell::from_varbuilder(
            &mut vb.pp("tree_lstm_cell"),
            client,
            config.hidden_dim,
            config.dropout_prob,
            trainable,
        )?;
        Self::with_composer(vb, client, config, composer, trainable)
    }
}

impl<R: Runtime<DType = DType>, K: NodeComposer<R>> BottomUpParser<R, K> {
    /// Parser around any composer of matching width.
    pub fn with_composer<C>(
        vb: &mut VarBuilder<'_, R>,
        client: &C,
        config: ParserConfig,
        composer: K,
        trainable: bool,
    ) -> Result<Self>
    where
        C: ParserClient<R>,
    {
        config.validate()?;
        if composer.hidden_dim() != config.hidden_dim {
            return Err(Error::config(format!(
                "composer width {} does not match hidden_dim {}",
                composer.hidden_dim(),
                config.hidden_dim
            )));
        }
        let encoder = LeafEncoder::from_varbuilder(vb, client, &config, trainable)?;
        let query = vb.take_or_init(client, "q", &[config.hidden_dim], Init::Normal { std: 0.01 })?;
        Ok(Self {
            config,
            encoder,
            composer,
            query: Var::new(query, trainable),
            training: true,
        })
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn encoder(&self) -> &LeafEncoder<R> {
        &self.encoder
    }

    pub fn composer(&self) -> &K {
        &self.composer
    }

    /// `[H]` merge-scoring vector.
    pub fn query(&self) -> &Var<R> {
        &self.query
    }

    /// Parse a batch.
    ///
    /// `x: [B, L, D]` leaf features, `mask: [B, L]` prefix-dense validity
    /// (1.0 valid, 0.0 padding).
    pub fn forward<C>(
        &self,
        client: &C,
        x: &Var<R>,
        mask: &Tensor<R>,
        options: &ForwardOptions<'_, R>,
    ) -> Result<ParseOutput<R>>
    where
        C: ParserClient<R>,
        R::Client: ParserClient<R>,
    {
        let len = x.shape().get(1).copied().unwrap_or(0);
        let mut trace = MergeTrace::for_length(len);
        let summary = self.forward_into(client, x, mask, options, &mut trace)?;
        Ok(ParseOutput {
            root: summary.root,
            entropy: summary.entropy,
            normalized_entropy: summary.normalized_entropy,
            log_prob: summary.log_prob,
            trace,
        })
    }

    /// Parse a batch, writing the per-round records into `trace`.
    pub fn forward_into<C>(
        &self,
        client: &C,
        x: &Var<R>,
        mask: &Tensor<R>,
        options: &ForwardOptions<'_, R>,
        trace: &mut MergeTrace<R>,
    ) -> Result<ParseSummary<R>>
    where
        C: ParserClient<R>,
        R::Client: ParserClient<R>,
    {
        let mode = options.mode()?;
        let (batch, len) = self.check_inputs(x, mask)?;
        let rounds = len - 1;
        check_round_list("noise", options.noise, rounds)?;
        check_round_list("eval_actions", options.eval_actions, rounds)?;
        if !self.training && options.noise.is_some() && options.eval_actions.is_none() {
            warn!("noise is ignored in evaluation mode");
        }
        debug!(
            batch,
            len,
            mode = mode.name(),
            training = self.training,
            forced_actions = options.eval_actions.is_some(),
            "bottom-up parse"
        );

        trace.reset(len);
        let device = x.tensor().device();
        let hidden = self.config.hidden_dim;
        let mask_host = read_f32(mask);
        let zeros = || Var::new(Tensor::<R>::zeros(&[batch], DType::F32, device), false);

        let mut states = self.encoder.encode(client, x, mask)?;
        let query = var_reshape(&self.query, &[hidden, 1]).map_err(Error::Numr)?;
        let mut entropy = zeros();
        let mut normalized_entropy = zeros();
        let mut log_prob = (!mode.is_relaxed()).then(zeros);

        for round in 1..len {
            let slots = len - round;
            let left = states.narrow(0, slots)?;
            let right = states.narrow(1, slots)?;
            let parent = self.composer.compose(client, &left, &right)?;

            let score = var_matmul(&parent.h, &query, client).map_err(Error::Numr)?;
            let score = var_reshape(&var_contiguous(&score), &[batch, slots]).map_err(Error::Numr)?;
            let round_mask = Tensor::<R>::from_slice(
                &slice_columns(&mask_host, len, round),
                &[batch, slots],
                device,
            );
            let dist = MaskedCategorical::new(client, &score, &round_mask)?;

            let RoundAction { action, noise } = match options.eval_actions {
                Some(actions) => {
                    let given = &actions[round - 1];
                    Error::check_shape("eval_actions", given.shape(), &[batch, slots])?;
                    RoundAction {
                        action: Var::new(given.clone(), false),
                        noise: None,
                    }
                }
                None => resolve_action(
                    client,
                    &dist,
                    &mode,
                    self.training,
                    options.noise.map(|n| &n[round - 1]),
                )?,
            };

            let h = var_tree_merge(
                &MergeOperands {
                    actions: &action,
                    left: &left.h,
                    right: &right.h,
                    parent: &parent.h,
                },
                &round_mask,
            )?;
            let c = var_tree_merge(
                &MergeOperands {
                    actions: &action,
                    left: &left.c,
                    right: &right.c,
                    parent: &parent.c,
                },
                &round_mask,
            )?;
            states = NodeStates { h, c };

            let round_entropy = dist.entropy(client)?;
            let round_normalized = dist.normalized_entropy(client)?;
            entropy = var_add(&entropy, &round_entropy, client).map_err(Error::Numr)?;
            normalized_entropy =
                var_add(&normalized_entropy, &round_normalized, client).map_err(Error::Numr)?;
            let round_log_prob = match log_prob {
                Some(_) => Some(dist.log_prob(client, action.tensor())?),
                None => None,
            };
            if let (Some(total), Some(lp)) = (log_prob.take(), &round_log_prob) {
                log_prob = Some(var_add(&total, lp, client).map_err(Error::Numr)?);
            }

            trace!(round, slots, sampled = noise.is_some(), "merge round");
            trace.record(
                round - 1,
                RoundRecord {
                    probs: dist.probs().clone(),
                    action,
                    entropy: round_entropy,
                    normalized_entropy: round_normalized,
                    log_prob: round_log_prob,
                    noise,
                },
            )?;
        }

        // valid slots from position 2 on: one per decision that can carry entropy
        let skip = len.min(2);
        let scale: Vec<f32> = mask_host
            .chunks(len)
            .map(|row| {
                let n: f32 = row[skip..].iter().sum();
                (1.0 / (n as f64 + NORM_EPS)) as f32
            })
            .collect();
        let scale = Var::new(Tensor::<R>::from_slice(&scale, &[batch], device), false);
        let normalized_entropy = var_mul(&normalized_entropy, &scale, client).map_err(Error::Numr)?;

        let root = NodeStates {
            h: var_reshape(&var_contiguous(&states.h), &[batch, hidden]).map_err(Error::Numr)?,
            c: var_reshape(&var_contiguous(&states.c), &[batch, hidden]).map_err(Error::Numr)?,
        };
        Ok(ParseSummary {
            root,
            entropy,
            normalized_entropy,
            log_prob,
        })
    }

    fn check_inputs(&self, x: &Var<R>, mask: &Tensor<R>) -> Result<(usize, usize)> {
        let shape = x.shape();
        if shape.len() != 3 || shape[2] != self.config.input_dim {
            return Err(Error::ShapeMismatch {
                arg: "x",
                expected: vec![
                    shape.first().copied().unwrap_or(0),
                    shape.get(1).copied().unwrap_or(0),
                    self.config.input_dim,
                ],
                got: shape.to_vec(),
            });
        }
        let (batch, len) = (shape[0], shape[1]);
        Error::check_shape("mask", mask.shape(), &[batch, len])?;
        if len == 0 {
            return Err(Error::InvalidArgument {
                arg: "x",
                reason: "sequence length must be at least 1".into(),
            });
        }
        Ok((batch, len))
    }
}

fn check_round_list<R: Runtime>(arg: &'static str, list: Option<&[Tensor<R>]>, rounds: usize) -> Result<()> {
    match list {
        Some(items) if items.len() != rounds => Err(Error::InvalidArgument {
            arg,
            reason: format!("expected {rounds} per-round entries, got {}", items.len()),
        }),
        _ => Ok(()),
    }
}

impl<R: Runtime, K: NodeComposer<R>> Module<R> for BottomUpParser<R, K> {
    fn named_parameters(&self) -> Vec<(String, &Var<R>)> {
        let mut params = self.encoder.named_parameters();
        params.extend(prefixed("tree_lstm_cell", self.composer.named_parameters()));
        params.push(("q".to_string(), &self.query));
        params
    }
}

impl<R: Runtime, K: NodeComposer<R>> TrainMode for BottomUpParser<R, K> {
    fn set_training(&mut self, training: bool) {
        self.training = training;
        self.composer.set_training(training);
    }

    fn is_training(&self) -> bool {
        self.training
    }
}
