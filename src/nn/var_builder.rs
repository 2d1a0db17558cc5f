//! VarBuilder: scoped access to weights in a VarMap.
//!
//! Provides prefix-based navigation for hierarchical weight names
//! (e.g., "encoder.lstm_f.cell.weight_ih.weight").

use crate::error::{Error, Result};
use crate::nn::init::Init;
use crate::nn::varmap::VarMap;
use numr::dtype::DType;
use numr::ops::RandomOps;
use numr::runtime::{Runtime, RuntimeClient};
use numr::tensor::Tensor;

/// Scoped access to weights in a `VarMap`.
///
/// Weights present in the map are taken (and shape-checked); missing ones
/// are created with the requested [`Init`].
pub struct VarBuilder<'a, R: Runtime> {
    varmap: &'a mut VarMap<R>,
    prefix: String,
    device: &'a R::Device,
}

impl<'a, R: Runtime<DType = DType>> VarBuilder<'a, R> {
    /// Create a root VarBuilder.
    pub fn new(varmap: &'a mut VarMap<R>, device: &'a R::Device) -> Self {
        Self {
            varmap,
            prefix: String::new(),
            device,
        }
    }

    /// Create a sub-builder with an additional prefix component.
    pub fn push_prefix(&mut self, segment: &str) -> VarBuilder<'_, R> {
        let prefix = self.full_name(segment);
        VarBuilder {
            varmap: self.varmap,
            prefix,
            device: self.device,
        }
    }

    /// Alias for `push_prefix`.
    pub fn pp(&mut self, segment: &str) -> VarBuilder<'_, R> {
        self.push_prefix(segment)
    }

    /// Full name for a weight relative to this builder's prefix.
    pub fn full_name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }

    /// Take the named tensor if the map has it, otherwise initialize one.
    ///
    /// A supplied tensor whose shape differs from `shape` is rejected.
    pub fn take_or_init<C>(
        &mut self,
        client: &C,
        name: &str,
        shape: &[usize],
        init: Init,
    ) -> Result<Tensor<R>>
    where
        C: RuntimeClient<R> + RandomOps<R>,
    {
        let full = self.full_name(name);
        if self.varmap.contains(&full) {
            let t = self.varmap.take(&full)?;
            if t.shape() != shape {
                return Err(Error::ShapeMismatch {
                    arg: "weight",
                    expected: shape.to_vec(),
                    got: t.shape().to_vec(),
                });
            }
            return Ok(t);
        }
        init.tensor(client, shape, self.device)
    }

    /// Device for this builder.
    pub fn device(&self) -> &R::Device {
        self.device
    }

    /// Check if a name exists (relative to prefix).
    pub fn contains(&self, name: &str) -> bool {
        self.varmap.contains(&self.full_name(name))
    }

    /// Current prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}
