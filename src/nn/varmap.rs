//! VarMap: named collection of model weights.

use crate::error::{Error, Result};
use numr::runtime::Runtime;
use numr::tensor::Tensor;
use std::collections::HashMap;

/// Named collection of model weights.
///
/// Used to hand exact weights to a parser at construction time; anything
/// missing from the map is freshly initialized by the [`VarBuilder`](super::VarBuilder).
pub struct VarMap<R: Runtime> {
    data: HashMap<String, Tensor<R>>,
}

impl<R: Runtime> VarMap<R> {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
        }
    }

    /// Insert a tensor.
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor<R>) {
        self.data.insert(name.into(), tensor);
    }

    /// Get a tensor by name.
    pub fn get(&self, name: &str) -> Result<&Tensor<R>> {
        self.data.get(name).ok_or_else(|| Error::InvalidArgument {
            arg: "name",
            reason: format!("weight not found: {name}"),
        })
    }

    /// Remove and return a tensor by name (zero-copy extraction).
    pub fn take(&mut self, name: &str) -> Result<Tensor<R>> {
        self.data.remove(name).ok_or_else(|| Error::InvalidArgument {
            arg: "name",
            reason: format!("weight not found: {name}"),
        })
    }

    /// All weight names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(|s| s.as_str())
    }

    /// Number of weights.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check if a name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.data.contains_key(name)
    }
}

impl<R: Runtime> Default for VarMap<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use numr::runtime::cpu::{CpuDevice, CpuRuntime};

    #[test]
    fn test_varmap_insert_take() {
        let d = CpuDevice::new();
        let mut map = VarMap::<CpuRuntime>::new();
        map.insert("w", Tensor::from_slice(&[1.0f32, 2.0], &[2], &d));
        assert!(map.contains("w"));
        assert_eq!(map.get("w").unwrap().shape(), &[2]);
        assert_eq!(map.len(), 1);

        let t = map.take("w").unwrap();
        assert_eq!(t.shape(), &[2]);
        assert!(map.is_empty());
        assert!(map.take("w").is_err());
    }
}
