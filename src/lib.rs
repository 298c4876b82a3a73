pub mod config;
pub use config::{Device, OptimizerType, TrainConfig};

pub mod data;
pub use data::{CaptionDataset, DataLoader, DiskFeatureStore, FeatureStore, MemoryFeatureStore};

pub mod error;
pub use error::CaptionError;

pub mod model;
pub use model::{CaptionDecoder, DecoderConfig};

pub mod notify;
pub use notify::{Notifier, SlackNotifier};

pub mod output;
pub use output::OutputDirs;

pub mod training;
pub use training::{build_optimizer, CheckpointManager, Optimizer, Trainer, TrainingReport};

pub mod utils;
