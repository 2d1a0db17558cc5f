//! Latent-tree parser: leaf encoding, merge rounds, sampling and the trace.

mod bottom_up;
pub mod config;
mod encoder;
mod sampling;
mod trace;
mod traits;

pub use bottom_up::{BottomUpParser, ParseOutput, ParseSummary};
pub use config::{LeafTransformKind, ParserConfig};
pub use encoder::{LeafEncoder, LeafTransform};
pub use sampling::{ForwardOptions, SamplingMode, TemperatureWeights};
pub use trace::{MergeTrace, RoundRecord};
pub use traits::{NodeComposer, NodeStates};
