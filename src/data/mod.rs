//! Caption dataset, image feature storage and mini-batch sampling

mod dataset;
mod features;
mod loader;

pub use dataset::{CaptionDataset, CaptionRecord, Split};
pub use features::{DiskFeatureStore, FeatureStore, MemoryFeatureStore};
pub use loader::{Batch, DataLoader};

use thiserror::Error;

use crate::utils::IoError;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Image feature not found: {0}")]
    NotFound(String),

    #[error("Invalid dataset: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] IoError),
}
