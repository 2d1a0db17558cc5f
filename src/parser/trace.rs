//! Per-round record of a parser evaluation.

use crate::error::{Error, Result};
use crate::ops::host::{argmax, read_f32};
use numr::autograd::Var;
use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;

/// What one merge round decided. `N` is the number of candidate merges in
/// the round (`L-1-k` for round `k`).
#[derive(Clone)]
pub struct RoundRecord<R: Runtime> {
    /// `[B, N]` policy probabilities
    pub probs: Var<R>,
    /// `[B, N]` action that was applied (one-hot, or relaxed simplex)
    pub action: Var<R>,
    /// `[B]` policy entropy
    pub entropy: Var<R>,
    /// `[B]` entropy over `ln(valid slots)`
    pub normalized_entropy: Var<R>,
    /// `[B]` log-probability of the action; discrete mode only
    pub log_prob: Option<Var<R>>,
    /// `[B, N]` Gumbel noise, when the action was sampled
    pub noise: Option<Tensor<R>>,
}

/// Round records of one evaluation, owned by the caller.
///
/// Holds one slot per merge round; round `k` is written into slot `k`.
/// [`forward_into`](super::BottomUpParser::forward_into) resets it to the
/// length of the batch first, so one trace can be reused across calls.
pub struct MergeTrace<R: Runtime> {
    rounds: Vec<Option<RoundRecord<R>>>,
}

impl<R: Runtime<DType = DType>> MergeTrace<R> {
    pub fn new() -> Self {
        Self { rounds: Vec::new() }
    }

    /// Empty slots for sequences of length `len` (`len - 1` rounds).
    pub fn for_length(len: usize) -> Self {
        let mut trace = Self::new();
        trace.reset(len);
        trace
    }

    /// Drop all records and size the trace for sequences of length `len`.
    pub fn reset(&mut self, len: usize) {
        self.rounds.clear();
        self.rounds.resize_with(len.saturating_sub(1), || None);
    }

    pub fn clear(&mut self) {
        self.rounds.clear();
    }

    /// Store the record of round `index`, replacing any earlier one.
    pub(crate) fn record(&mut self, index: usize, record: RoundRecord<R>) -> Result<()> {
        let slots = self.rounds.len();
        let slot = self.rounds.get_mut(index).ok_or_else(|| Error::InvalidArgument {
            arg: "index",
            reason: format!("round {index} out of range for {slots} rounds"),
        })?;
        *slot = Some(record);
        Ok(())
    }

    /// Number of round slots.
    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    /// Whether every round slot holds a record.
    pub fn is_complete(&self) -> bool {
        self.rounds.iter().all(Option::is_some)
    }

    /// Recorded rounds in round order.
    pub fn rounds(&self) -> Vec<&RoundRecord<R>> {
        self.rounds.iter().flatten().collect()
    }

    pub fn round(&self, index: usize) -> Result<&RoundRecord<R>> {
        match self.rounds.get(index) {
            Some(Some(record)) => Ok(record),
            Some(None) => Err(Error::InvalidArgument {
                arg: "index",
                reason: format!("round {index} has not been recorded"),
            }),
            None => Err(Error::InvalidArgument {
                arg: "index",
                reason: format!("round {index} out of range for {} rounds", self.rounds.len()),
            }),
        }
    }

    pub fn probs(&self) -> Vec<&Var<R>> {
        self.rounds.iter().flatten().map(|r| &r.probs).collect()
    }

    pub fn actions(&self) -> Vec<&Var<R>> {
        self.rounds.iter().flatten().map(|r| &r.action).collect()
    }

    /// Actions as plain tensors, usable as `eval_actions` of another call.
    pub fn action_tensors(&self) -> Vec<Tensor<R>> {
        self.rounds
            .iter()
            .flatten()
            .map(|r| r.action.tensor().clone())
            .collect()
    }

    /// Noise of every round, if every round was recorded and sampled. Usable
    /// as the `noise` of another call to replay the same draws.
    pub fn noise(&self) -> Option<Vec<Tensor<R>>> {
        self.rounds
            .iter()
            .map(|r| r.as_ref().and_then(|r| r.noise.clone()))
            .collect()
    }

    /// `[round][batch]` slot index chosen in each recorded round (arg-max of the action).
    pub fn merge_indices(&self) -> Vec<Vec<usize>> {
        self.rounds
            .iter()
            .flatten()
            .map(|r| {
                let slots = r.action.shape().get(1).copied().unwrap_or(0);
                if slots == 0 {
                    return Vec::new();
                }
                read_f32(r.action.tensor()).chunks(slots).map(argmax).collect()
            })
            .collect()
    }
}

impl<R: Runtime<DType = DType>> Default for MergeTrace<R> {
    fn default() -> Self {
        Self::new()
    }
}
