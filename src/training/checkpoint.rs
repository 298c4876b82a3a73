use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::optimizer::check_state;
use super::Optimizer;
use crate::model::{CaptionDecoder, DecoderConfig};
use crate::utils::io::{self, IoError};

const FORMAT_VERSION: u32 = 1;

/// Error type for checkpoint operations
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Checkpoint file not found: {0}")]
    Missing(PathBuf),
    #[error("Incompatible checkpoint {path}: {reason}")]
    Incompatible { path: PathBuf, reason: String },
    #[error("IO error: {0}")]
    Io(IoError),
}

impl From<IoError> for CheckpointError {
    fn from(err: IoError) -> Self {
        match err {
            IoError::FileNotFound(path) => CheckpointError::Missing(path),
            other => CheckpointError::Io(other),
        }
    }
}

fn rename(from: &Path, to: &Path) -> Result<(), CheckpointError> {
    fs::rename(from, to).map_err(IoError::from)?;
    Ok(())
}

fn incompatible(path: &Path, reason: impl Into<String>) -> CheckpointError {
    CheckpointError::Incompatible { path: path.to_path_buf(), reason: reason.into() }
}

/// Written at the front of both files of a checkpoint pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointHeader {
    pub version: u32,
    pub epoch: usize,
    /// Shared by the model and optimizer file of one save
    pub pair_id: u64,
}

impl CheckpointHeader {
    pub fn new(epoch: usize) -> Self {
        Self { version: FORMAT_VERSION, epoch, pair_id: rand::random() }
    }
}

#[derive(Serialize, Deserialize)]
pub struct ModelCheckpoint {
    pub header: CheckpointHeader,
    pub config: DecoderConfig,
    pub params: Vec<(String, Array2<f32>)>,
}

#[derive(Serialize)]
struct OptimizerCheckpointRef<'a> {
    header: CheckpointHeader,
    optimizer: &'a dyn Optimizer,
}

#[derive(Deserialize)]
pub struct OptimizerCheckpoint {
    pub header: CheckpointHeader,
    pub optimizer: Box<dyn Optimizer>,
}

/// Writes the model's configuration and parameters
pub fn save_model(
    path: impl AsRef<Path>,
    header: CheckpointHeader,
    model: &CaptionDecoder,
) -> Result<(), CheckpointError> {
    let checkpoint = ModelCheckpoint {
        header,
        config: model.config().clone(),
        params: model.state_dict(),
    };
    io::serialize_to_file(path, &checkpoint)?;
    Ok(())
}

/// Writes the optimizer with its hyper-parameters and full state
pub fn save_optimizer(
    path: impl AsRef<Path>,
    header: CheckpointHeader,
    optimizer: &dyn Optimizer,
) -> Result<(), CheckpointError> {
    io::serialize_to_file(path, &OptimizerCheckpointRef { header, optimizer })?;
    Ok(())
}

fn read_model(path: &Path) -> Result<ModelCheckpoint, CheckpointError> {
    let checkpoint: ModelCheckpoint = io::deserialize_from_file(path)?;
    if checkpoint.header.version != FORMAT_VERSION {
        return Err(incompatible(
            path,
            format!("format version {} is not {FORMAT_VERSION}", checkpoint.header.version),
        ));
    }
    Ok(checkpoint)
}

fn read_optimizer(path: &Path) -> Result<OptimizerCheckpoint, CheckpointError> {
    let checkpoint: OptimizerCheckpoint = io::deserialize_from_file(path)?;
    if checkpoint.header.version != FORMAT_VERSION {
        return Err(incompatible(
            path,
            format!("format version {} is not {FORMAT_VERSION}", checkpoint.header.version),
        ));
    }
    Ok(checkpoint)
}

fn check_model(path: &Path, checkpoint: &ModelCheckpoint, model: &CaptionDecoder) -> Result<(), CheckpointError> {
    if !model.config().is_compatible(&checkpoint.config) {
        return Err(incompatible(
            path,
            format!("saved shape {:?} does not fit model {:?}", checkpoint.config, model.config()),
        ));
    }
    Ok(())
}

fn check_optimizer(
    path: &Path,
    checkpoint: &OptimizerCheckpoint,
    current: &dyn Optimizer,
    model: &CaptionDecoder,
) -> Result<(), CheckpointError> {
    let saved = checkpoint.optimizer.as_ref();
    if saved.kind() != current.kind() {
        return Err(incompatible(
            path,
            format!("saved optimizer is {}, the run uses {}", saved.kind(), current.kind()),
        ));
    }
    check_state(saved.name(), saved.slot_count(), saved.state(), model)
        .map_err(|e| incompatible(path, e.to_string()))
}

/// Restores a single model file into `model`; nothing changes on failure
pub fn load_model(path: impl AsRef<Path>, model: &mut CaptionDecoder) -> Result<CheckpointHeader, CheckpointError> {
    let path = path.as_ref();
    let checkpoint = read_model(path)?;
    check_model(path, &checkpoint, model)?;
    model
        .load_state_dict(&checkpoint.params)
        .map_err(|e| incompatible(path, e.to_string()))?;
    Ok(checkpoint.header)
}

/// Restores a single optimizer file in place of `optimizer`. The saved
/// optimizer must be of the same kind and shaped for `model`.
pub fn load_optimizer(
    path: impl AsRef<Path>,
    optimizer: &mut Box<dyn Optimizer>,
    model: &CaptionDecoder,
) -> Result<CheckpointHeader, CheckpointError> {
    let path = path.as_ref();
    let checkpoint = read_optimizer(path)?;
    check_optimizer(path, &checkpoint, optimizer.as_ref(), model)?;
    *optimizer = checkpoint.optimizer;
    Ok(checkpoint.header)
}

/// Saves and restores model/optimizer pairs keyed by epoch.
///
/// The two files of an epoch are only ever written and read together.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    models_dir: PathBuf,
    optimizers_dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(models_dir: impl Into<PathBuf>, optimizers_dir: impl Into<PathBuf>) -> Self {
        Self { models_dir: models_dir.into(), optimizers_dir: optimizers_dir.into() }
    }

    pub fn model_path(&self, epoch: usize) -> PathBuf {
        self.models_dir.join(format!("caption_model{epoch}.model"))
    }

    pub fn optimizer_path(&self, epoch: usize) -> PathBuf {
        self.optimizers_dir.join(format!("optimizer{epoch}.model"))
    }

    pub fn exists(&self, epoch: usize) -> bool {
        self.model_path(epoch).is_file() && self.optimizer_path(epoch).is_file()
    }

    /// Writes both files to temporaries first and only then moves them into
    /// place, so a crash never leaves a half-written file under a final name.
    /// A failed save removes its temporaries.
    pub fn save(
        &self,
        epoch: usize,
        model: &CaptionDecoder,
        optimizer: &dyn Optimizer,
    ) -> Result<(), CheckpointError> {
        fs::create_dir_all(&self.models_dir).map_err(IoError::from)?;
        fs::create_dir_all(&self.optimizers_dir).map_err(IoError::from)?;

        let header = CheckpointHeader::new(epoch);
        let model_path = self.model_path(epoch);
        let optimizer_path = self.optimizer_path(epoch);
        let model_tmp = io::temp_path(&model_path);
        let optimizer_tmp = io::temp_path(&optimizer_path);

        let written = save_model(&model_tmp, header, model)
            .and_then(|()| save_optimizer(&optimizer_tmp, header, optimizer))
            .and_then(|()| rename(&optimizer_tmp, &optimizer_path))
            .and_then(|()| rename(&model_tmp, &model_path));
        if let Err(err) = written {
            for tmp in [&model_tmp, &optimizer_tmp] {
                let _ = fs::remove_file(tmp);
            }
            return Err(err);
        }

        info!(epoch, model = %model_path.display(), optimizer = %optimizer_path.display(), "checkpoint saved");
        Ok(())
    }

    /// Restores the pair saved for `epoch`. Both files are read and checked
    /// against each other and against the live model and optimizer before
    /// anything is modified.
    pub fn load(
        &self,
        epoch: usize,
        model: &mut CaptionDecoder,
        optimizer: &mut Box<dyn Optimizer>,
    ) -> Result<(), CheckpointError> {
        let model_path = self.model_path(epoch);
        let optimizer_path = self.optimizer_path(epoch);
        for path in [&model_path, &optimizer_path] {
            if !path.is_file() {
                return Err(CheckpointError::Missing(path.clone()));
            }
        }

        let saved_model = read_model(&model_path)?;
        let saved_optimizer = read_optimizer(&optimizer_path)?;

        for (path, header) in [(&model_path, saved_model.header), (&optimizer_path, saved_optimizer.header)] {
            if header.epoch != epoch {
                return Err(incompatible(path, format!("labelled epoch {}, expected {epoch}", header.epoch)));
            }
        }
        if saved_model.header.pair_id != saved_optimizer.header.pair_id {
            return Err(incompatible(
                &optimizer_path,
                format!("not saved together with {}", model_path.display()),
            ));
        }
        check_model(&model_path, &saved_model, model)?;
        check_optimizer(&optimizer_path, &saved_optimizer, optimizer.as_ref(), model)?;

        model
            .load_state_dict(&saved_model.params)
            .map_err(|e| incompatible(&model_path, e.to_string()))?;
        *optimizer = saved_optimizer.optimizer;

        info!(epoch, "checkpoint restored");
        Ok(())
    }
}
