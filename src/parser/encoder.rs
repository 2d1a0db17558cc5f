//! Leaf encoder: raw features `[B, L, D]` to initial node states `[B, L, H]`.

use crate::client::ParserClient;
use crate::error::{Error, Result};
use crate::nn::activation::Activation;
use crate::nn::conv1d::Conv1d;
use crate::nn::init::Init;
use crate::nn::linear::Linear;
use crate::nn::lstm::{MaskedLstm, ScanDirection};
use crate::nn::module::{Module, prefixed};
use crate::nn::var_builder::VarBuilder;
use crate::ops::var_contiguous;
use crate::parser::config::{LeafTransformKind, ParserConfig};
use crate::parser::traits::NodeStates;
use numr::autograd::{Var, var_cat, var_narrow};
use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;

/// Feature transformation applied before the shared leaf projection.
pub enum LeafTransform<R: Runtime> {
    Identity,
    Lstm(MaskedLstm<R>),
    BiLstm {
        forward: MaskedLstm<R>,
        backward: MaskedLstm<R>,
    },
    /// Applied without regard to the mask.
    Conv { conv1: Conv1d<R>, conv2: Conv1d<R> },
}

impl<R: Runtime<DType = DType>> LeafTransform<R> {
    pub fn from_varbuilder<C>(
        vb: &mut VarBuilder<'_, R>,
        client: &C,
        config: &ParserConfig,
        trainable: bool,
    ) -> Result<Self>
    where
        C: ParserClient<R>,
    {
        let trans = config.trans_hidden_dim.unwrap_or(0);
        let input = config.input_dim;
        Ok(match config.leaf_transformation {
            LeafTransformKind::Identity => Self::Identity,
            LeafTransformKind::Lstm => Self::Lstm(MaskedLstm::from_varbuilder(
                &mut vb.pp("lstm"),
                client,
                input,
                trans,
                trainable,
            )?),
            LeafTransformKind::BiLstm => Self::BiLstm {
                forward: MaskedLstm::from_varbuilder(&mut vb.pp("lstm_f"), client, input, trans, trainable)?,
                backward: MaskedLstm::from_varbuilder(&mut vb.pp("lstm_b"), client, input, trans, trainable)?,
            },
            LeafTransformKind::Conv => Self::Conv {
                conv1: Conv1d::from_varbuilder(&mut vb.pp("conv1"), client, input, trans, 5, trainable)?,
                conv2: Conv1d::from_varbuilder(&mut vb.pp("conv2"), client, trans, trans, 3, trainable)?,
            },
        })
    }

    pub fn kind(&self) -> LeafTransformKind {
        match self {
            Self::Identity => LeafTransformKind::Identity,
            Self::Lstm(_) => LeafTransformKind::Lstm,
            Self::BiLstm { .. } => LeafTransformKind::BiLstm,
            Self::Conv { .. } => LeafTransformKind::Conv,
        }
    }

    /// `[B, L, D]` to `[B, L, D']`.
    pub fn apply<C>(&self, client: &C, x: &Var<R>, mask: &Tensor<R>) -> Result<Var<R>>
    where
        C: ParserClient<R>,
        R::Client: ParserClient<R>,
    {
        match self {
            Self::Identity => Ok(x.clone()),
            Self::Lstm(lstm) => lstm.forward(client, x, mask, ScanDirection::Forward),
            Self::BiLstm { forward, backward } => {
                let h_f = forward.forward(client, x, mask, ScanDirection::Forward)?;
                let h_b = backward.forward(client, x, mask, ScanDirection::Backward)?;
                var_cat(&[&h_f, &h_b], 2, client).map_err(Error::Numr)
            }
            Self::Conv { conv1, conv2 } => {
                let y = Activation::Relu.forward_var(client, &conv1.forward(client, x)?)?;
                Activation::Tanh.forward_var(client, &conv2.forward(client, &y)?)
            }
        }
    }
}

impl<R: Runtime> Module<R> for LeafTransform<R> {
    fn named_parameters(&self) -> Vec<(String, &Var<R>)> {
        match self {
            Self::Identity => Vec::new(),
            Self::Lstm(lstm) => prefixed("lstm", lstm.named_parameters()),
            Self::BiLstm { forward, backward } => {
                let mut params = prefixed("lstm_f", forward.named_parameters());
                params.extend(prefixed("lstm_b", backward.named_parameters()));
                params
            }
            Self::Conv { conv1, conv2 } => {
                let mut params = prefixed("conv1", conv1.named_parameters());
                params.extend(prefixed("conv2", conv2.named_parameters()));
                params
            }
        }
    }
}

/// Leaf transform followed by the shared `tanh(W x + b)` projection to `2H`,
/// split into `(h, c)`. The tanh keeps leaves in the range of composed nodes.
pub struct LeafEncoder<R: Runtime> {
    transform: LeafTransform<R>,
    projection: Linear<R>,
    hidden_dim: usize,
}

impl<R: Runtime<DType = DType>> LeafEncoder<R> {
    pub fn from_varbuilder<C>(
        vb: &mut VarBuilder<'_, R>,
        client: &C,
        config: &ParserConfig,
        trainable: bool,
    ) -> Result<Self>
    where
        C: ParserClient<R>,
    {
        config.validate()?;
        let transform = LeafTransform::from_varbuilder(vb, client, config, trainable)?;
        let projection = Linear::from_varbuilder(
            &mut vb.pp("linear"),
            client,
            config.leaf_feature_dim(),
            2 * config.hidden_dim,
            true,
            Init::XavierUniform,
            trainable,
        )?;
        Ok(Self {
            transform,
            projection,
            hidden_dim: config.hidden_dim,
        })
    }

    pub fn transform(&self) -> &LeafTransform<R> {
        &self.transform
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    /// `x: [B, L, D]`, `mask: [B, L]` to node states `[B, L, H]`.
    pub fn encode<C>(&self, client: &C, x: &Var<R>, mask: &Tensor<R>) -> Result<NodeStates<R>>
    where
        C: ParserClient<R>,
        R::Client: ParserClient<R>,
    {
        let features = self.transform.apply(client, x, mask)?;
        let z = Activation::Tanh.forward_var(client, &self.projection.forward(client, &features)?)?;
        let half = |start: usize| -> Result<Var<R>> {
            let part = var_narrow(&z, 2, start, self.hidden_dim).map_err(Error::Numr)?;
            Ok(var_contiguous(&part))
        };
        NodeStates::new(half(0)?, half(self.hidden_dim)?)
    }
}

impl<R: Runtime> Module<R> for LeafEncoder<R> {
    fn named_parameters(&self) -> Vec<(String, &Var<R>)> {
        let mut params = self.transform.named_parameters();
        params.extend(prefixed("linear", self.projection.named_parameters()));
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::VarMap;
    use crate::test_utils::cpu_setup;
    use numr::runtime::cpu::CpuRuntime;

    fn encoder(config: &ParserConfig, varmap: &mut VarMap<CpuRuntime>) -> LeafEncoder<CpuRuntime> {
        let (client, device) = cpu_setup();
        let mut vb = VarBuilder::new(varmap, &device);
        LeafEncoder::from_varbuilder(&mut vb, &client, config, false).unwrap()
    }

    #[test]
    fn test_identity_encoder_is_tanh_projection() {
        let (client, device) = cpu_setup();
        let mut varmap = VarMap::<CpuRuntime>::new();
        // W = [[1, 0], [0, 1], [1, 1], [1, -1]], b = 0
        varmap.insert(
            "linear.weight",
            Tensor::<CpuRuntime>::from_slice(&[1.0f32, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, -1.0], &[4, 2], &device),
        );
        let enc = encoder(&ParserConfig::new(2, 2), &mut varmap);
        assert_eq!(enc.transform().kind(), LeafTransformKind::Identity);

        let x = Var::new(Tensor::<CpuRuntime>::from_slice(&[0.5f32, 0.25], &[1, 1, 2], &device), false);
        let mask = Tensor::<CpuRuntime>::from_slice(&[1.0f32], &[1, 1], &device);
        let states = enc.encode(&client, &x, &mask).unwrap();
        assert_eq!(states.shape(), &[1, 1, 2]);

        let h: Vec<f32> = states.h.tensor().to_vec();
        let c: Vec<f32> = states.c.tensor().to_vec();
        assert!((h[0] - 0.5f32.tanh()).abs() < 1e-6 && (h[1] - 0.25f32.tanh()).abs() < 1e-6);
        assert!((c[0] - 0.75f32.tanh()).abs() < 1e-6 && (c[1] - 0.25f32.tanh()).abs() < 1e-6);
    }

    #[test]
    fn test_every_transform_produces_hidden_states() {
        let (client, device) = cpu_setup();
        let x = Var::new(
            Tensor::<CpuRuntime>::from_slice(&[0.1f32; 2 * 4 * 3], &[2, 4, 3], &device),
            false,
        );
        let mask = Tensor::<CpuRuntime>::from_slice(
            &[1.0f32, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0],
            &[2, 4],
            &device,
        );
        for kind in LeafTransformKind::ALL {
            let config = ParserConfig::new(3, 5)
                .with_leaf_transformation(kind)
                .with_trans_hidden_dim(6);
            let mut varmap = VarMap::<CpuRuntime>::new();
            let enc = encoder(&config, &mut varmap);
            assert_eq!(enc.transform().kind(), kind);
            let states = enc.encode(&client, &x, &mask).unwrap();
            assert_eq!(states.shape(), &[2, 4, 5], "{kind}");
            let h: Vec<f32> = states.h.tensor().to_vec();
            assert!(h.iter().all(|v| v.abs() <= 1.0));
        }
    }

    #[test]
    fn test_parameter_names() {
        let config = ParserConfig::new(3, 2)
            .with_leaf_transformation(LeafTransformKind::BiLstm)
            .with_trans_hidden_dim(4);
        let mut varmap = VarMap::<CpuRuntime>::new();
        let enc = encoder(&config, &mut varmap);
        let names: Vec<String> = enc.named_parameters().into_iter().map(|(n, _)| n).collect();
        assert!(names.contains(&"lstm_f.cell.ih.weight".to_string()));
        assert!(names.contains(&"lstm_b.h0".to_string()));
        assert!(names.contains(&"linear.weight".to_string()));
        // ih/hh weight+bias per direction, h0/c0 per direction, projection weight+bias
        assert_eq!(names.len(), 2 * (4 + 2) + 2);
    }

    #[test]
    fn test_invalid_config_is_rejected_before_building() {
        let (client, device) = cpu_setup();
        let mut varmap = VarMap::<CpuRuntime>::new();
        let mut vb = VarBuilder::new(&mut varmap, &device);
        let config = ParserConfig::new(3, 2).with_leaf_transformation(LeafTransformKind::Lstm);
        assert!(matches!(
            LeafEncoder::from_varbuilder(&mut vb, &client, &config, false),
            Err(Error::InvalidConfig { .. })
        ));
    }
}
