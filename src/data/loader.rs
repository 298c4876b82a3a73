use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::{CaptionRecord, DataError, FeatureStore, Split};

/// One mini-batch of image features and their captions
#[derive(Debug, Clone)]
pub struct Batch {
    /// `[batch_size, feature_dim]`
    pub features: Array2<f32>,
    /// Unpadded token sequences, one per feature row
    pub captions: Vec<Vec<usize>>,
    /// Epoch the batch was drawn in
    pub epoch: usize,
    /// True when drawing this batch wrapped the cursor into the next epoch
    pub epoch_advanced: bool,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.captions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captions.is_empty()
    }
}

/// Cursor state that only becomes current once every feature of a batch was resolved
struct Advance {
    position: usize,
    wrap: Option<(Vec<usize>, StdRng)>,
}

/// Epoch-aware sampler over the training captions.
///
/// A batch that reaches the end of the current ordering takes the remaining records and pads
/// itself with the first records of the next ordering (reshuffled when `shuffle` is on). The
/// padding does not count against the next epoch: the cursor restarts at 0, so every epoch
/// takes exactly `ceil(size / batch_size)` draws and every batch has `batch_size` rows.
///
/// Resuming only restores the epoch counter through [`DataLoader::set_epoch`]; the position
/// inside that epoch starts over from the beginning of a fresh ordering.
pub struct DataLoader<S: FeatureStore> {
    records: Vec<CaptionRecord>,
    image_count: usize,
    store: S,
    order: Vec<usize>,
    position: usize,
    epoch: usize,
    shuffle: bool,
    rng: StdRng,
}

impl<S: FeatureStore> DataLoader<S> {
    pub fn new(split: &Split, store: S, shuffle: bool, seed: u64) -> Result<Self, DataError> {
        if split.captions.is_empty() {
            return Err(DataError::Config("cannot sample from an empty split".into()));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..split.captions.len()).collect();
        if shuffle {
            order.shuffle(&mut rng);
        }

        Ok(Self {
            records: split.captions.clone(),
            image_count: split.image_count(),
            store,
            order,
            position: 0,
            epoch: 1,
            shuffle,
            rng,
        })
    }

    /// Draws the next `batch_size` records and resolves their image features.
    ///
    /// On error the cursor is left exactly as it was.
    pub fn get_batch(&mut self, batch_size: usize) -> Result<Batch, DataError> {
        let size = self.records.len();
        if batch_size == 0 || batch_size > size {
            return Err(DataError::Config(format!(
                "batch size {batch_size} must be in 1..={size} (the number of captions)"
            )));
        }

        let (indices, advance) = self.plan(batch_size);

        let feature_dim = self.store.feature_dim();
        let mut features = Array2::zeros((batch_size, feature_dim));
        let mut captions = Vec::with_capacity(batch_size);
        for (row, &index) in indices.iter().enumerate() {
            let record = &self.records[index];
            let feature = self.store.get(&record.image_id)?;
            if feature.len() != feature_dim {
                return Err(DataError::Config(format!(
                    "feature of '{}' has {} values, expected {feature_dim}",
                    record.image_id,
                    feature.len()
                )));
            }
            features.row_mut(row).assign(&feature);
            captions.push(record.caption.clone());
        }

        let epoch = self.epoch;
        let epoch_advanced = advance.wrap.is_some();
        self.commit(advance);

        Ok(Batch { features, captions, epoch, epoch_advanced })
    }

    fn plan(&self, batch_size: usize) -> (Vec<usize>, Advance) {
        let size = self.records.len();
        let end = self.position + batch_size;
        if end < size {
            let indices = self.order[self.position..end].to_vec();
            return (indices, Advance { position: end, wrap: None });
        }

        let mut indices = self.order[self.position..].to_vec();
        let mut rng = self.rng.clone();
        let mut order = self.order.clone();
        if self.shuffle {
            order.shuffle(&mut rng);
        }
        indices.extend_from_slice(&order[..end - size]);
        (indices, Advance { position: 0, wrap: Some((order, rng)) })
    }

    fn commit(&mut self, advance: Advance) {
        self.position = advance.position;
        if let Some((order, rng)) = advance.wrap {
            self.order = order;
            self.rng = rng;
            self.epoch += 1;
        }
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Overrides the epoch counter, used when resuming from a checkpoint
    pub fn set_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn caption_count(&self) -> usize {
        self.records.len()
    }

    pub fn image_count(&self) -> usize {
        self.image_count
    }

    pub fn feature_dim(&self) -> usize {
        self.store.feature_dim()
    }

    pub fn iterations_per_epoch(&self, batch_size: usize) -> usize {
        self.records.len().div_ceil(batch_size.max(1))
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }
}
