//! Policy distributions over merge slots.

mod categorical;

pub use categorical::{MaskedCategorical, gumbel_noise};
