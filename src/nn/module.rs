//! Neural network module traits for parameter access and mode switching.

use numr::autograd::Var;
use numr::runtime::Runtime;

/// Core trait for neural network modules.
///
/// Provides access to trainable parameters for optimizers and named
/// parameters for inspection or export.
///
/// Forward passes stay as inherent methods on each layer because
/// signatures differ (different client bounds, input types).
pub trait Module<R: Runtime> {
    /// Named parameters. Names use dot notation for nested modules:
    /// `"encoder.projection.weight"`.
    fn named_parameters(&self) -> Vec<(String, &Var<R>)>;

    /// All trainable parameters (for optimizer).
    fn parameters(&self) -> Vec<&Var<R>> {
        self.named_parameters().into_iter().map(|(_, v)| v).collect()
    }

    /// Total number of scalar parameters.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|v| v.tensor().numel()).sum()
    }
}

/// Training / evaluation mode switch.
pub trait TrainMode {
    fn set_training(&mut self, training: bool);

    fn is_training(&self) -> bool;
}

/// Prefix every name of a child's parameter list with `prefix.`.
pub(crate) fn prefixed<'a, R: Runtime>(
    prefix: &str,
    params: Vec<(String, &'a Var<R>)>,
) -> Vec<(String, &'a Var<R>)> {
    params
        .into_iter()
        .map(|(name, var)| (format!("{prefix}.{name}"), var))
        .collect()
}
