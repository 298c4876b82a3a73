use serde::Serialize;
use tracing::{debug, info, warn};

use super::{build_optimizer, CheckpointManager, EpochStats, IterationMetrics, Optimizer};
use crate::config::{Device, TrainConfig};
use crate::data::{CaptionDataset, DataLoader, FeatureStore};
use crate::error::CaptionError;
use crate::model::{zero_state, CaptionDecoder};
use crate::notify::{Notifier, SlackNotifier};
use crate::output::OutputDirs;

/// Result of one finished epoch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochSummary {
    pub epoch: usize,
    pub mean_loss: f32,
    pub iterations: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainingReport {
    pub epochs: Vec<EpochSummary>,
}

impl TrainingReport {
    pub fn last(&self) -> Option<&EpochSummary> {
        self.epochs.last()
    }
}

/// Drives the decoder over the training split until the configured number
/// of epochs is done, checkpointing the model/optimizer pair after every epoch.
pub struct Trainer<S: FeatureStore> {
    config: TrainConfig,
    device: Device,
    loader: DataLoader<S>,
    model: CaptionDecoder,
    optimizer: Box<dyn Optimizer>,
    checkpoints: CheckpointManager,
    output: OutputDirs,
    notifier: Option<Box<dyn Notifier>>,
    stats: EpochStats,
}

impl<S: FeatureStore> Trainer<S> {
    pub fn new(config: TrainConfig, dataset: CaptionDataset, store: S) -> Result<Self, CaptionError> {
        config.validate()?;
        dataset.validate()?;
        if store.feature_dim() != config.feature_dim {
            return Err(CaptionError::Config(format!(
                "feature store holds {}-dim vectors, the model expects {}",
                store.feature_dim(),
                config.feature_dim
            )));
        }
        let train = &dataset.train;
        if config.batch_size > train.caption_count() {
            return Err(CaptionError::Config(format!(
                "batch size {} exceeds the {} training captions",
                config.batch_size,
                train.caption_count()
            )));
        }

        let device = config.device().resolve();
        let output = OutputDirs::create(&config.output_dir)?;

        let mut model = CaptionDecoder::new(config.decoder_config(train.vocab_size()))?;
        model.train();
        let mut optimizer = build_optimizer(config.optimizer, config.learning_rate);
        optimizer.setup(&model);

        let loader = DataLoader::new(train, store, config.shuffle, config.seed)?;
        let checkpoints = CheckpointManager::new(output.models(), output.optimizers());

        let notifier: Option<Box<dyn Notifier>> = match (&config.notify, &config.notify_url) {
            (true, Some(url)) => Some(Box::new(
                SlackNotifier::new(url.clone()).map_err(|e| CaptionError::Config(e.to_string()))?,
            )),
            _ => None,
        };

        let mut trainer = Self {
            config,
            device,
            loader,
            model,
            optimizer,
            checkpoints,
            output,
            notifier,
            stats: EpochStats::new(),
        };

        let lines = trainer.configuration_lines();
        for line in &lines {
            info!("{line}");
        }
        trainer.output.write_configuration(&lines)?;
        info!(parameters = trainer.model.parameter_count(), "decoder built");

        if trainer.config.resume_epoch > 0 {
            trainer.resume(trainer.config.resume_epoch)?;
        }
        Ok(trainer)
    }

    /// Replaces the notification channel
    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    fn configuration_lines(&self) -> Vec<String> {
        let learning_rate = match self.config.learning_rate {
            Some(lr) => lr.to_string(),
            None => format!("{} (default)", self.optimizer.learning_rate()),
        };
        vec![
            "-----configurations-----".to_string(),
            format!("GPU ID: {}", self.config.device),
            format!("Total images: {}", self.loader.image_count()),
            format!("Total captions: {}", self.loader.caption_count()),
            format!("Total epoch: {}", self.config.epochs),
            format!("Batch size: {}", self.config.batch_size),
            format!("The number of hidden dim: {}", self.config.hidden_dim),
            format!("The number of LSTM layers: {}", self.config.num_layers),
            format!("Optimizer: {}", self.optimizer.name()),
            format!("Learning rate: {learning_rate}"),
        ]
    }

    /// Restores the checkpoint pair of `epoch` and continues with the next
    /// epoch. Only the epoch counter is restored; sampling starts from the
    /// beginning of a fresh ordering.
    pub fn resume(&mut self, epoch: usize) -> Result<(), CaptionError> {
        self.checkpoints
            .load(epoch, &mut self.model, &mut self.optimizer)
            .map_err(CaptionError::Load)?;
        self.loader.set_epoch(epoch + 1);
        self.stats.reset();
        info!(epoch, next = epoch + 1, "resumed from checkpoint");
        Ok(())
    }

    /// Trains until the epoch counter passes the configured total
    pub fn run(&mut self) -> Result<TrainingReport, CaptionError> {
        let mut report = TrainingReport::default();
        info!(epoch = self.loader.epoch(), device = ?self.device, "training started");

        while self.loader.epoch() <= self.config.epochs {
            let epoch = self.loader.epoch();
            let (metrics, epoch_advanced) = self.train_step()?;
            debug!(
                grad_norm = metrics.grad_norm,
                lr = metrics.learning_rate,
                "epoch {} iteration {}/{} loss {:.6}",
                metrics.epoch,
                metrics.iteration,
                self.loader.iterations_per_epoch(self.config.batch_size),
                metrics.loss
            );

            if epoch_advanced {
                report.epochs.push(self.finish_epoch(epoch)?);
            }
        }

        info!(epochs = report.epochs.len(), "training finished");
        Ok(report)
    }

    /// One iteration: clear, draw, forward, backward, update
    fn train_step(&mut self) -> Result<(IterationMetrics, bool), CaptionError> {
        self.model.clear_gradients();
        let batch = self.loader.get_batch(self.config.batch_size)?;

        let (hx, cx) = zero_state(self.model.state_shape(batch.len()));
        let cache = self.model.forward(&hx, &cx, &batch.captions, &batch.features)?;
        self.model.backward(&cache)?;
        let grad_norm = self.model.gradient_norm();
        self.optimizer.update(&mut self.model)?;

        self.stats.record(cache.loss(), batch.len());
        let metrics = IterationMetrics {
            epoch: batch.epoch,
            iteration: self.stats.iterations(),
            loss: cache.loss(),
            grad_norm,
            learning_rate: self.optimizer.learning_rate(),
        };
        Ok((metrics, batch.epoch_advanced))
    }

    fn finish_epoch(&mut self, epoch: usize) -> Result<EpochSummary, CaptionError> {
        let mean_loss = self.stats.mean_loss(self.loader.caption_count());
        let summary = EpochSummary { epoch, mean_loss, iterations: self.stats.iterations() };
        info!(epoch, mean_loss, iterations = summary.iterations, "epoch {epoch} result");

        self.output.append_mean_loss(mean_loss)?;
        self.checkpoints.save(epoch, &self.model, self.optimizer.as_ref())?;
        self.notify(&format!("epoch: {epoch} loss: {mean_loss}"));

        self.stats.reset();
        Ok(summary)
    }

    fn notify(&self, text: &str) {
        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.notify(&self.output.label(), text) {
                warn!(error = %e, "notification failed, training continues");
            }
        }
    }

    pub fn model(&self) -> &CaptionDecoder {
        &self.model
    }

    pub fn optimizer(&self) -> &dyn Optimizer {
        self.optimizer.as_ref()
    }

    pub fn loader(&self) -> &DataLoader<S> {
        &self.loader
    }

    pub fn output(&self) -> &OutputDirs {
        &self.output
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use ndarray::Array1;
    use tempfile::{tempdir, TempDir};

    use super::*;
    use crate::config::OptimizerType;
    use crate::data::{CaptionRecord, MemoryFeatureStore, Split};
    use crate::notify::testing::RecordingNotifier;

    const FEATURE_DIM: usize = 3;

    fn split(captions: usize) -> Split {
        let word_ids: HashMap<String, usize> =
            ["<pad>", "<s>", "</s>", "a", "cat", "dog", "sits"]
                .iter()
                .enumerate()
                .map(|(i, w)| (w.to_string(), i))
                .collect();
        let captions = (0..captions)
            .map(|i| CaptionRecord {
                image_id: format!("img{}.jpg", i % 4),
                caption: vec![1, 3, 4 + i % 2, 6, 2][..3 + i % 3].to_vec(),
            })
            .collect();
        Split { word_ids, captions }
    }

    fn dataset(captions: usize) -> CaptionDataset {
        CaptionDataset { train: split(captions), val: split(2), test: split(2) }
    }

    fn store() -> MemoryFeatureStore {
        let mut store = MemoryFeatureStore::new(FEATURE_DIM);
        for i in 0..4 {
            let feature = Array1::from_shape_fn(FEATURE_DIM, |j| (i * FEATURE_DIM + j) as f32 * 0.1);
            store.insert(format!("img{i}.jpg"), feature).unwrap();
        }
        store
    }

    fn config(dir: &TempDir) -> TrainConfig {
        TrainConfig {
            device: -1,
            output_dir: dir.path().join("run"),
            epochs: 2,
            batch_size: 4,
            hidden_dim: 5,
            feature_dim: FEATURE_DIM,
            optimizer: OptimizerType::Adam,
            dropout: 0.0,
            seed: 42,
            ..TrainConfig::default()
        }
    }

    #[test]
    fn test_run_logs_and_checkpoints_every_epoch() {
        let dir = tempdir().unwrap();
        let mut trainer = Trainer::new(config(&dir), dataset(10), store()).unwrap();
        let report = trainer.run().unwrap();

        let epochs: Vec<usize> = report.epochs.iter().map(|e| e.epoch).collect();
        assert_eq!(epochs, [1, 2]);
        assert!(report.epochs.iter().all(|e| e.iterations == 3));
        assert!(report.epochs.iter().all(|e| e.mean_loss.is_finite() && e.mean_loss > 0.0));
        assert_eq!(trainer.loader().epoch(), 3);

        let out = trainer.output();
        let log = fs::read_to_string(out.mean_loss_log()).unwrap();
        assert_eq!(log.lines().count(), 2);
        assert!(trainer.checkpoints().exists(1));
        assert!(trainer.checkpoints().exists(2));
        assert!(!trainer.checkpoints().exists(3));

        let conf = fs::read_to_string(out.configuration_log()).unwrap();
        assert!(conf.contains("Total captions: 10"));
        assert!(conf.contains("Total images: 4"));
        assert!(conf.contains("Optimizer: Adam"));
    }

    #[test]
    fn test_resume_continues_with_next_epoch() {
        let dir = tempdir().unwrap();
        let mut first = Trainer::new(TrainConfig { epochs: 1, ..config(&dir) }, dataset(10), store())
            .unwrap();
        first.run().unwrap();
        let saved = first.model().params()[0].value.clone();

        let resumed_config = TrainConfig { epochs: 3, resume_epoch: 1, ..config(&dir) };
        let mut resumed = Trainer::new(resumed_config, dataset(10), store()).unwrap();
        assert_eq!(resumed.loader().epoch(), 2);
        assert_eq!(resumed.model().params()[0].value, saved);
        assert!(resumed.optimizer().state().step > 0);

        let report = resumed.run().unwrap();
        let epochs: Vec<usize> = report.epochs.iter().map(|e| e.epoch).collect();
        assert_eq!(epochs, [2, 3]);

        let log = fs::read_to_string(resumed.output().mean_loss_log()).unwrap();
        assert_eq!(log.lines().count(), 3);
    }

    #[test]
    fn test_resume_without_checkpoint_is_a_load_error() {
        let dir = tempdir().unwrap();
        let result = Trainer::new(TrainConfig { resume_epoch: 1, ..config(&dir) }, dataset(10), store());
        assert!(matches!(result, Err(CaptionError::Load(_))));
    }

    #[test]
    fn test_resume_with_other_hidden_dim_is_rejected() {
        let dir = tempdir().unwrap();
        let mut first = Trainer::new(TrainConfig { epochs: 1, ..config(&dir) }, dataset(10), store())
            .unwrap();
        first.run().unwrap();

        let wider = TrainConfig { hidden_dim: 7, resume_epoch: 1, ..config(&dir) };
        let result = Trainer::new(wider, dataset(10), store());
        assert!(matches!(result, Err(CaptionError::Load(_))));
    }

    #[test]
    fn test_notifications_are_best_effort() {
        let dir = tempdir().unwrap();
        let notifier = RecordingNotifier { fail: true, ..Default::default() };
        let messages = notifier.messages.clone();

        let mut trainer = Trainer::new(config(&dir), dataset(8), store())
            .unwrap()
            .with_notifier(Box::new(notifier));
        let report = trainer.run().unwrap();

        assert_eq!(report.epochs.len(), 2);
        let messages = messages.borrow();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].0, "run");
        assert!(messages[0].1.starts_with("epoch: 1 loss: "));
    }

    #[test]
    fn test_missing_feature_aborts_run() {
        let dir = tempdir().unwrap();
        let mut store = MemoryFeatureStore::new(FEATURE_DIM);
        store.insert("img0.jpg", Array1::zeros(FEATURE_DIM)).unwrap();

        let mut trainer = Trainer::new(config(&dir), dataset(10), store).unwrap();
        assert!(matches!(trainer.run(), Err(CaptionError::NotFound(_))));
    }

    #[test]
    fn test_rejects_inconsistent_setup() {
        let dir = tempdir().unwrap();
        let too_big = TrainConfig { batch_size: 11, ..config(&dir) };
        assert!(matches!(Trainer::new(too_big, dataset(10), store()), Err(CaptionError::Config(_))));

        let wrong_dim = TrainConfig { feature_dim: 8, ..config(&dir) };
        assert!(matches!(Trainer::new(wrong_dim, dataset(10), store()), Err(CaptionError::Config(_))));
    }

    #[test]
    fn test_rejects_invalid_arguments_before_touching_disk() {
        let dir = tempdir().unwrap();
        let zero_batch = TrainConfig { batch_size: 0, ..config(&dir) };
        assert!(matches!(Trainer::new(zero_batch, dataset(10), store()), Err(CaptionError::Config(_))));
        assert!(!dir.path().join("run").exists());
    }
}
