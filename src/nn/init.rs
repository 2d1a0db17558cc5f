//! Parameter initialization strategies.

use crate::error::{Error, Result};
use numr::dtype::DType;
use numr::ops::RandomOps;
use numr::runtime::{Runtime, RuntimeClient};
use numr::tensor::Tensor;

/// Initialization strategy for new tensors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Init {
    /// All zeros
    Zeros,
    /// Constant value
    Const(f32),
    /// Uniform random in `[-bound, bound]`
    Uniform(f32),
    /// Kaiming uniform (PyTorch Linear default): U(-1/sqrt(fan_in), 1/sqrt(fan_in))
    PyTorchLinear,
    /// Glorot uniform: U(-a, a) with a = sqrt(6 / (fan_in + fan_out))
    XavierUniform,
    /// Gaussian with zero mean
    Normal { std: f32 },
}

/// `(fan_in, fan_out)` for a weight shape. Linear weights are `[out, in]`,
/// conv weights `[out, in, kernel]`.
pub fn fans(shape: &[usize]) -> (usize, usize) {
    match shape {
        [] => (1, 1),
        [n] => (*n, *n),
        [out, inp] => (*inp, *out),
        [out, inp, rest @ ..] => {
            let receptive: usize = rest.iter().product();
            (inp * receptive, out * receptive)
        }
    }
}

impl Init {
    /// Materialize a tensor of `shape` on `device`.
    ///
    /// Randomness comes from `RandomOps::rand` uniforms on the client.
    pub fn tensor<R, C>(&self, client: &C, shape: &[usize], device: &R::Device) -> Result<Tensor<R>>
    where
        R: Runtime<DType = DType>,
        C: RuntimeClient<R> + RandomOps<R>,
    {
        let numel: usize = shape.iter().product();
        let (fan_in, fan_out) = fans(shape);
        match *self {
            Init::Zeros => Ok(Tensor::<R>::zeros(shape, DType::F32, device)),
            Init::Const(value) => Ok(Tensor::<R>::from_slice(&vec![value; numel], shape, device)),
            Init::Uniform(bound) => uniform(client, shape, bound, device),
            Init::PyTorchLinear => {
                let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
                uniform(client, shape, bound, device)
            }
            Init::XavierUniform => {
                let bound = (6.0 / (fan_in + fan_out).max(1) as f32).sqrt();
                uniform(client, shape, bound, device)
            }
            Init::Normal { std } => {
                if std < 0.0 {
                    return Err(Error::InvalidArgument {
                        arg: "std",
                        reason: format!("standard deviation must be non-negative, got {std}"),
                    });
                }
                // Box-Muller over two uniform draws
                let u1: Vec<f32> = client.rand(shape, DType::F32)?.to_vec();
                let u2: Vec<f32> = client.rand(shape, DType::F32)?.to_vec();
                let data: Vec<f32> = u1
                    .iter()
                    .zip(&u2)
                    .map(|(a, b)| {
                        let r = (-2.0 * a.max(f32::MIN_POSITIVE).ln()).sqrt();
                        std * r * (2.0 * std::f32::consts::PI * b).cos()
                    })
                    .collect();
                Ok(Tensor::<R>::from_slice(&data, shape, device))
            }
        }
    }
}

fn uniform<R, C>(client: &C, shape: &[usize], bound: f32, device: &R::Device) -> Result<Tensor<R>>
where
    R: Runtime<DType = DType>,
    C: RuntimeClient<R> + RandomOps<R>,
{
    let u: Vec<f32> = client.rand(shape, DType::F32)?.to_vec();
    let data: Vec<f32> = u.iter().map(|x| (2.0 * x - 1.0) * bound).collect();
    Ok(Tensor::<R>::from_slice(&data, shape, device))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::cpu_setup;
    use numr::runtime::cpu::CpuRuntime;

    #[test]
    fn test_fans() {
        assert_eq!(fans(&[8, 4]), (4, 8));
        assert_eq!(fans(&[8, 4, 3]), (12, 24));
        assert_eq!(fans(&[5]), (5, 5));
    }

    #[test]
    fn test_const_and_zeros() {
        let (client, device) = cpu_setup();
        let z = Init::Zeros.tensor::<CpuRuntime, _>(&client, &[2, 3], &device).unwrap();
        assert_eq!(z.to_vec::<f32>(), vec![0.0; 6]);
        let c = Init::Const(1.5).tensor::<CpuRuntime, _>(&client, &[3], &device).unwrap();
        assert_eq!(c.to_vec::<f32>(), vec![1.5; 3]);
    }

    #[test]
    fn test_uniform_bounds() {
        let (client, device) = cpu_setup();
        let t = Init::XavierUniform
            .tensor::<CpuRuntime, _>(&client, &[16, 8], &device)
            .unwrap();
        let bound = (6.0f32 / 24.0).sqrt();
        assert!(t.to_vec::<f32>().iter().all(|v| v.abs() <= bound));
    }

    #[test]
    fn test_normal_is_finite_and_small() {
        let (client, device) = cpu_setup();
        let t = Init::Normal { std: 0.01 }
            .tensor::<CpuRuntime, _>(&client, &[256], &device)
            .unwrap();
        let data = t.to_vec::<f32>();
        assert!(data.iter().all(|v| v.is_finite() && v.abs() < 0.1));
    }
}
