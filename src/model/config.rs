use serde::{Deserialize, Serialize};

use super::error::ModelError;

/// Shape and regularisation settings of the caption decoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoderConfig {
    pub vocab_size: usize,
    pub hidden_dim: usize,
    /// Width of the incoming image feature vectors
    pub feature_dim: usize,
    pub num_layers: usize,
    #[serde(default = "default_dropout")]
    pub dropout: f32,
    /// Seeds weight initialisation and dropout masks
    #[serde(default)]
    pub seed: u64,
}

fn default_dropout() -> f32 {
    0.5
}

impl DecoderConfig {
    pub fn validate(&self) -> Result<(), ModelError> {
        for (name, value) in [
            ("vocab_size", self.vocab_size),
            ("hidden_dim", self.hidden_dim),
            ("feature_dim", self.feature_dim),
            ("num_layers", self.num_layers),
        ] {
            if value == 0 {
                return Err(ModelError::Config(format!("{name} must be positive")));
            }
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ModelError::Config(format!(
                "dropout ratio {} must be in [0, 1)",
                self.dropout
            )));
        }
        Ok(())
    }

    /// True when parameters of `other` fit a model built from `self`
    pub fn is_compatible(&self, other: &DecoderConfig) -> bool {
        self.vocab_size == other.vocab_size
            && self.hidden_dim == other.hidden_dim
            && self.feature_dim == other.feature_dim
            && self.num_layers == other.num_layers
    }
}
