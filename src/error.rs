use thiserror::Error;

use crate::data::DataError;
use crate::model::ModelError;
use crate::training::{CheckpointError, OptimizerError};
use crate::utils::IoError;

/// Failures of a training run
#[derive(Error, Debug)]
pub enum CaptionError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Checkpoint load failed: {0}")]
    Load(#[source] CheckpointError),

    #[error("IO error: {0}")]
    Io(#[from] IoError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Optimizer error: {0}")]
    Optimizer(#[from] OptimizerError),
}

impl From<DataError> for CaptionError {
    fn from(err: DataError) -> Self {
        match err {
            DataError::NotFound(id) => CaptionError::NotFound(id),
            DataError::Config(msg) => CaptionError::Config(msg),
            DataError::Io(err) => CaptionError::Io(err),
        }
    }
}

/// Saving is plain I/O; anything that goes wrong while restoring is a load failure
impl From<CheckpointError> for CaptionError {
    fn from(err: CheckpointError) -> Self {
        match err {
            CheckpointError::Io(err) => CaptionError::Io(err),
            other => CaptionError::Load(other),
        }
    }
}
