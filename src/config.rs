use std::fmt;
use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CaptionError;
use crate::model::DecoderConfig;

/// The menu of parameter-update rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum OptimizerType {
    #[value(name = "SGD")]
    Sgd,
    #[value(name = "AdaDelta")]
    AdaDelta,
    #[value(name = "AdaGrad")]
    AdaGrad,
    #[value(name = "Adam")]
    Adam,
    #[value(name = "MomentumSGD")]
    MomentumSgd,
    #[value(name = "NesterovAG")]
    NesterovAg,
    #[value(name = "RMSprop")]
    RmsProp,
    #[value(name = "RMSpropGraves")]
    RmsPropGraves,
    #[value(name = "SMORMS3")]
    Smorms3,
}

impl OptimizerType {
    pub const ALL: [OptimizerType; 9] = [
        OptimizerType::Sgd,
        OptimizerType::AdaDelta,
        OptimizerType::AdaGrad,
        OptimizerType::Adam,
        OptimizerType::MomentumSgd,
        OptimizerType::NesterovAg,
        OptimizerType::RmsProp,
        OptimizerType::RmsPropGraves,
        OptimizerType::Smorms3,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            OptimizerType::Sgd => "SGD",
            OptimizerType::AdaDelta => "AdaDelta",
            OptimizerType::AdaGrad => "AdaGrad",
            OptimizerType::Adam => "Adam",
            OptimizerType::MomentumSgd => "MomentumSGD",
            OptimizerType::NesterovAg => "NesterovAG",
            OptimizerType::RmsProp => "RMSprop",
            OptimizerType::RmsPropGraves => "RMSpropGraves",
            OptimizerType::Smorms3 => "SMORMS3",
        }
    }
}

impl Default for OptimizerType {
    fn default() -> Self {
        Self::Adam
    }
}

impl fmt::Display for OptimizerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where the numeric work runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Host,
    Accelerator(u32),
}

impl Device {
    /// Negative selectors mean host-only compute
    pub fn from_selector(selector: i32) -> Self {
        match u32::try_from(selector) {
            Ok(id) => Device::Accelerator(id),
            Err(_) => Device::Host,
        }
    }

    /// The device computation actually happens on. Only host kernels exist,
    /// so an accelerator request falls back to the host.
    pub fn resolve(self) -> Self {
        if let Device::Accelerator(id) = self {
            warn!(device = id, "no accelerator backend available, training on the host");
        }
        Device::Host
    }
}

/// Everything a training run needs, passed by value into the trainer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub device: i32,
    pub dataset: PathBuf,
    pub feature_root: PathBuf,
    pub output_dir: PathBuf,
    pub preload: bool,
    pub epochs: usize,
    pub batch_size: usize,
    pub hidden_dim: usize,
    pub feature_dim: usize,
    pub optimizer: OptimizerType,
    /// Overrides the optimizer's own default rate
    pub learning_rate: Option<f32>,
    pub dropout: f32,
    pub num_layers: usize,
    /// Epoch of the checkpoint pair to resume from, 0 for a fresh run
    pub resume_epoch: usize,
    pub notify: bool,
    pub notify_url: Option<String>,
    pub shuffle: bool,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            device: 0,
            dataset: PathBuf::from("./data/captions/processed/dataset.bin"),
            feature_root: PathBuf::from("./data/images/features/ResNet50/"),
            output_dir: PathBuf::from("./data/train_data/run"),
            preload: true,
            epochs: 100,
            batch_size: 256,
            hidden_dim: 512,
            feature_dim: 2048,
            optimizer: OptimizerType::Adam,
            learning_rate: None,
            dropout: 0.5,
            num_layers: 1,
            resume_epoch: 0,
            notify: false,
            notify_url: None,
            shuffle: true,
            seed: 0,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<(), CaptionError> {
        for (name, value) in [
            ("epochs", self.epochs),
            ("batch_size", self.batch_size),
            ("hidden_dim", self.hidden_dim),
            ("feature_dim", self.feature_dim),
            ("num_layers", self.num_layers),
        ] {
            if value == 0 {
                return Err(CaptionError::Config(format!("{name} must be positive")));
            }
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(CaptionError::Config(format!(
                "dropout ratio {} must be in [0, 1)",
                self.dropout
            )));
        }
        if let Some(lr) = self.learning_rate {
            if !(lr.is_finite() && lr > 0.0) {
                return Err(CaptionError::Config(format!("learning rate {lr} must be positive")));
            }
        }
        if self.resume_epoch > self.epochs {
            return Err(CaptionError::Config(format!(
                "resume epoch {} is past the last epoch {}",
                self.resume_epoch, self.epochs
            )));
        }
        if self.notify && self.notify_url.as_deref().map_or(true, str::is_empty) {
            return Err(CaptionError::Config(
                "notifications are enabled but no webhook endpoint is set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn device(&self) -> Device {
        Device::from_selector(self.device)
    }

    pub fn decoder_config(&self, vocab_size: usize) -> DecoderConfig {
        DecoderConfig {
            vocab_size,
            hidden_dim: self.hidden_dim,
            feature_dim: self.feature_dim,
            num_layers: self.num_layers,
            dropout: self.dropout,
            seed: self.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TrainConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.optimizer, OptimizerType::Adam);
        assert_eq!(config.batch_size, 256);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            TrainConfig { epochs: 0, ..Default::default() },
            TrainConfig { batch_size: 0, ..Default::default() },
            TrainConfig { dropout: 1.5, ..Default::default() },
            TrainConfig { learning_rate: Some(-1.0), ..Default::default() },
            TrainConfig { resume_epoch: 101, ..Default::default() },
            TrainConfig { notify: true, notify_url: None, ..Default::default() },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(CaptionError::Config(_))), "{config:?}");
        }
    }

    #[test]
    fn test_device_selector() {
        assert_eq!(Device::from_selector(-1), Device::Host);
        assert_eq!(Device::from_selector(2), Device::Accelerator(2));
        assert_eq!(Device::Accelerator(0).resolve(), Device::Host);
    }

    #[test]
    fn test_optimizer_names_parse_back() {
        for kind in OptimizerType::ALL {
            assert_eq!(OptimizerType::from_str(kind.name(), false), Ok(kind));
        }
        assert!(OptimizerType::from_str("LBFGS", false).is_err());
    }
}
