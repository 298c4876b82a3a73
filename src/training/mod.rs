//! Training infrastructure: update rules, checkpoints and the epoch loop

pub mod adadelta;
pub mod adagrad;
pub mod adam;
pub mod checkpoint;
pub mod metrics;
pub mod momentum;
pub mod optimizer;
pub mod rmsprop;
pub mod sgd;
pub mod smorms3;
pub mod trainer;

// Re-export main components
pub use adadelta::AdaDelta;
pub use adagrad::AdaGrad;
pub use adam::Adam;
pub use checkpoint::{
    load_model, load_optimizer, save_model, save_optimizer, CheckpointError, CheckpointHeader,
    CheckpointManager,
};
pub use metrics::{EpochStats, IterationMetrics};
pub use momentum::{MomentumSgd, NesterovAg};
pub use optimizer::{build_optimizer, Optimizer, OptimizerError, OptimizerState};
pub use rmsprop::{RmsProp, RmsPropGraves};
pub use sgd::Sgd;
pub use smorms3::Smorms3;
pub use trainer::{EpochSummary, Trainer, TrainingReport};
