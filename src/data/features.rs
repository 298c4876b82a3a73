use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ndarray::Array1;
use tracing::info;

use super::DataError;
use crate::utils::io::{self, IoError};

/// Read-only lookup from image identifier to its fixed-length feature vector
pub trait FeatureStore {
    /// Fails with [`DataError::NotFound`] when the identifier has no stored feature
    fn get(&self, image_id: &str) -> Result<Array1<f32>, DataError>;

    fn feature_dim(&self) -> usize;
}

/// Features kept in a hash map
#[derive(Debug, Clone, Default)]
pub struct MemoryFeatureStore {
    features: HashMap<String, Array1<f32>>,
    feature_dim: usize,
}

impl MemoryFeatureStore {
    pub fn new(feature_dim: usize) -> Self {
        Self { features: HashMap::new(), feature_dim }
    }

    pub fn insert(&mut self, image_id: impl Into<String>, feature: Array1<f32>) -> Result<(), DataError> {
        let image_id = image_id.into();
        check_dim(&image_id, feature.len(), self.feature_dim)?;
        self.features.insert(image_id, feature);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl FeatureStore for MemoryFeatureStore {
    fn get(&self, image_id: &str) -> Result<Array1<f32>, DataError> {
        self.features
            .get(image_id)
            .cloned()
            .ok_or_else(|| DataError::NotFound(image_id.to_string()))
    }

    fn feature_dim(&self) -> usize {
        self.feature_dim
    }
}

/// Features stored one file per image under a root directory.
///
/// The feature of `train/0001.jpg` lives in `<root>/train/0001.bin` as a bincode `Vec<f32>`.
/// With `preload` every listed image is read once at construction; otherwise every
/// [`FeatureStore::get`] goes to disk.
#[derive(Debug)]
pub struct DiskFeatureStore {
    root: PathBuf,
    feature_dim: usize,
    cache: Option<MemoryFeatureStore>,
}

impl DiskFeatureStore {
    pub fn open<'a>(
        root: impl Into<PathBuf>,
        feature_dim: usize,
        preload: bool,
        image_ids: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, DataError> {
        let mut store = Self { root: root.into(), feature_dim, cache: None };
        if preload {
            let mut cache = MemoryFeatureStore::new(feature_dim);
            for image_id in image_ids {
                let feature = store.read(image_id)?;
                cache.insert(image_id, feature)?;
            }
            info!("preloaded {} image features from {}", cache.len(), store.root.display());
            store.cache = Some(cache);
        }
        Ok(store)
    }

    pub fn is_preloaded(&self) -> bool {
        self.cache.is_some()
    }

    pub fn feature_path(&self, image_id: &str) -> PathBuf {
        self.root.join(image_id).with_extension("bin")
    }

    /// Writes one feature file in the layout [`DiskFeatureStore::open`] reads
    pub fn write_feature(root: impl AsRef<Path>, image_id: &str, feature: &[f32]) -> Result<(), DataError> {
        let path = root.as_ref().join(image_id).with_extension("bin");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(IoError::StdIo)?;
        }
        io::serialize_to_file(&path, &feature.to_vec())?;
        Ok(())
    }

    fn read(&self, image_id: &str) -> Result<Array1<f32>, DataError> {
        let values: Vec<f32> = match io::deserialize_from_file(self.feature_path(image_id)) {
            Ok(values) => values,
            Err(IoError::FileNotFound(_)) => return Err(DataError::NotFound(image_id.to_string())),
            Err(e) => return Err(e.into()),
        };
        check_dim(image_id, values.len(), self.feature_dim)?;
        Ok(Array1::from(values))
    }
}

impl FeatureStore for DiskFeatureStore {
    fn get(&self, image_id: &str) -> Result<Array1<f32>, DataError> {
        match &self.cache {
            Some(cache) => cache.get(image_id),
            None => self.read(image_id),
        }
    }

    fn feature_dim(&self) -> usize {
        self.feature_dim
    }
}

fn check_dim(image_id: &str, got: usize, expected: usize) -> Result<(), DataError> {
    if got != expected {
        return Err(DataError::Config(format!(
            "feature of '{image_id}' has {got} values, expected {expected}"
        )));
    }
    Ok(())
}
