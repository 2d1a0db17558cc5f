//! Parser configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// How raw leaf features become initial node states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LeafTransformKind {
    /// Affine projection only.
    #[default]
    #[serde(rename = "no_transformation")]
    Identity,
    /// Left-to-right masked LSTM before the projection.
    #[serde(rename = "lstm_transformation")]
    Lstm,
    /// Forward and backward masked LSTMs, concatenated.
    #[serde(rename = "bi_lstm_transformation")]
    BiLstm,
    /// Conv(k=5) -> relu -> Conv(k=3) -> tanh.
    #[serde(rename = "conv_transformation")]
    Conv,
}

impl LeafTransformKind {
    pub const ALL: [LeafTransformKind; 4] = [Self::Identity, Self::Lstm, Self::BiLstm, Self::Conv];

    /// Configuration name of the variant.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "no_transformation",
            Self::Lstm => "lstm_transformation",
            Self::BiLstm => "bi_lstm_transformation",
            Self::Conv => "conv_transformation",
        }
    }

    /// Whether this transform needs `trans_hidden_dim`.
    pub fn needs_trans_hidden_dim(&self) -> bool {
        !matches!(self, Self::Identity)
    }
}

impl fmt::Display for LeafTransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeafTransformKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                Error::config(format!(
                    "\"{s}\" is not in the list of possible leaf transformations"
                ))
            })
    }
}

/// Configuration of a [`BottomUpParser`](super::BottomUpParser).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Width `D` of the raw leaf features
    pub input_dim: usize,
    /// Width `H` of node states
    pub hidden_dim: usize,
    /// Leaf transformation strategy
    #[serde(default)]
    pub leaf_transformation: LeafTransformKind,
    /// Width of the recurrent/convolutional leaf encoder (per direction for bi-LSTM)
    #[serde(default)]
    pub trans_hidden_dim: Option<usize>,
    /// Dropout on the composer's candidate cell input
    #[serde(default)]
    pub dropout_prob: Option<f64>,
}

impl ParserConfig {
    /// Identity leaf transform, no dropout.
    pub fn new(input_dim: usize, hidden_dim: usize) -> Self {
        Self {
            input_dim,
            hidden_dim,
            leaf_transformation: LeafTransformKind::Identity,
            trans_hidden_dim: None,
            dropout_prob: None,
        }
    }

    pub fn with_leaf_transformation(mut self, kind: LeafTransformKind) -> Self {
        self.leaf_transformation = kind;
        self
    }

    pub fn with_trans_hidden_dim(mut self, trans_hidden_dim: usize) -> Self {
        self.trans_hidden_dim = Some(trans_hidden_dim);
        self
    }

    pub fn with_dropout_prob(mut self, dropout_prob: f64) -> Self {
        self.dropout_prob = Some(dropout_prob);
        self
    }

    /// Width of the features entering the final leaf projection.
    pub fn leaf_feature_dim(&self) -> usize {
        let trans = self.trans_hidden_dim.unwrap_or(0);
        match self.leaf_transformation {
            LeafTransformKind::Identity => self.input_dim,
            LeafTransformKind::Lstm | LeafTransformKind::Conv => trans,
            LeafTransformKind::BiLstm => 2 * trans,
        }
    }

    /// Validate config constraints. Returns error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.input_dim == 0 {
            return Err(Error::config("input_dim must be > 0"));
        }
        if self.hidden_dim == 0 {
            return Err(Error::config("hidden_dim must be > 0"));
        }
        if self.leaf_transformation.needs_trans_hidden_dim() {
            match self.trans_hidden_dim {
                Some(d) if d > 0 => {}
                _ => {
                    return Err(Error::config(format!(
                        "{} requires trans_hidden_dim > 0",
                        self.leaf_transformation
                    )));
                }
            }
        }
        if let Some(p) = self.dropout_prob {
            if !(0.0..1.0).contains(&p) {
                return Err(Error::config(format!(
                    "dropout_prob must be in [0, 1), got {p}"
                )));
            }
        }
        Ok(())
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| Error::config(format!("YAML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| Error::config(format!("JSON parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_yaml(&read(path.as_ref())?)
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json(&read(path.as_ref())?)
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_transform_names() {
        for kind in LeafTransformKind::ALL {
            assert_eq!(kind.as_str().parse::<LeafTransformKind>().unwrap(), kind);
        }
        let err = "tree_transformation".parse::<LeafTransformKind>().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
        assert!(err.to_string().contains("tree_transformation"));
    }

    #[test]
    fn test_config_builders_and_dims() {
        let config = ParserConfig::new(8, 16)
            .with_leaf_transformation(LeafTransformKind::BiLstm)
            .with_trans_hidden_dim(5)
            .with_dropout_prob(0.1);
        assert!(config.validate().is_ok());
        assert_eq!(config.leaf_feature_dim(), 10);
        assert_eq!(ParserConfig::new(8, 16).leaf_feature_dim(), 8);
    }

    #[test]
    fn test_config_validation() {
        assert!(ParserConfig::new(0, 4).validate().is_err());
        assert!(ParserConfig::new(4, 0).validate().is_err());
        let missing = ParserConfig::new(4, 4).with_leaf_transformation(LeafTransformKind::Conv);
        assert!(matches!(missing.validate(), Err(Error::InvalidConfig { .. })));
        assert!(ParserConfig::new(4, 4).with_dropout_prob(1.0).validate().is_err());
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
input_dim: 300
hidden_dim: 100
leaf_transformation: lstm_transformation
trans_hidden_dim: 50
dropout_prob: 0.1
"#;
        let config = ParserConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.leaf_transformation, LeafTransformKind::Lstm);
        assert_eq!(config.trans_hidden_dim, Some(50));

        let minimal = ParserConfig::from_yaml("input_dim: 3\nhidden_dim: 2\n").unwrap();
        assert_eq!(minimal, ParserConfig::new(3, 2));
    }

    #[test]
    fn test_config_rejects_unknown_transform() {
        let yaml = "input_dim: 3\nhidden_dim: 2\nleaf_transformation: tree_transformation\n";
        assert!(matches!(
            ParserConfig::from_yaml(yaml),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = ParserConfig::new(4, 4)
            .with_leaf_transformation(LeafTransformKind::Conv)
            .with_trans_hidden_dim(6);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("conv_transformation"));
        assert_eq!(ParserConfig::from_json(&json).unwrap(), config);
    }
}
