//! # latent-tree
//!
//! **Latent binary tree induction by bottom-up merging, built on numr.**
//!
//! A sequence of leaf feature vectors is folded into a single root state by
//! `L - 1` merge rounds. Each round composes every adjacent pair of states,
//! scores the candidates with a learned query vector and picks one merge per
//! sequence, either by sampling (hard Gumbel-max, or a relaxed Gumbel-softmax
//! with optional straight-through) or by arg-max at evaluation time.
//!
//! ```text
//! features [B, L, D] ──► LeafEncoder ──► states [B, L, H]
//!                                           │
//!               ┌───────────── round k ─────┘
//!               │  compose(left, right) ─► score ─► MaskedCategorical
//!               │  action ─► merge update ─► states [B, L-k, H]
//!               └──────────► root [B, H] + MergeTrace
//! ```
//!
//! ## Layout
//!
//! - [`parser`]: the driver ([`BottomUpParser`]), configuration, sampling options, trace
//! - [`distribution`]: masked categorical policy over merge slots
//! - [`nn`]: layers (linear, conv, LSTM, Tree-LSTM) and parameter plumbing
//! - [`ops`]: autograd ops with hand-written backward passes (merge update,
//!   straight-through, gradient clamp)
//!
//! Everything runs on any numr runtime; tests use the CPU backend.

pub mod client;
pub mod distribution;
pub mod error;
pub mod nn;
pub mod ops;
pub mod parser;

pub use client::ParserClient;
pub use distribution::MaskedCategorical;
pub use error::{Error, Result};
pub use parser::{
    BottomUpParser, ForwardOptions, LeafTransformKind, MergeTrace, NodeComposer, NodeStates,
    ParseOutput, ParserConfig, SamplingMode, TemperatureWeights,
};

// Re-export numr types that users will commonly need
pub use numr::autograd::Var;
pub use numr::dtype::DType;
pub use numr::runtime::{Runtime, RuntimeClient};
pub use numr::tensor::Tensor;

#[cfg(test)]
pub(crate) mod test_utils {
    use numr::runtime::cpu::{CpuClient, CpuDevice};

    /// Create a CPU client and device for use in unit tests.
    pub(crate) fn cpu_setup() -> (CpuClient, CpuDevice) {
        let device = CpuDevice::new();
        let client = CpuClient::new(device.clone());
        (client, device)
    }
}
