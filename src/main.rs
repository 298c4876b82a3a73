use std::path::PathBuf;

use anyhow::{Context, Result};
use caption_trainer::{CaptionDataset, DiskFeatureStore, OptimizerType, TrainConfig, Trainer};
use clap::{ArgAction, Parser};
use tracing::info;

/// Train an LSTM caption decoder on precomputed image features
#[derive(Parser, Debug)]
#[command(name = "caption-trainer", version, about)]
struct TrainArgs {
    /// Accelerator id; a negative value means host only
    #[arg(long, short = 'g', default_value_t = 0, allow_negative_numbers = true)]
    gpu: i32,

    /// Preprocessed caption dataset (bincode, or JSON when the name ends in .json)
    #[arg(long, short = 'd', default_value = "./data/captions/processed/dataset.bin")]
    dataset: PathBuf,

    /// Root directory of the image feature files
    #[arg(long, short = 'f', default_value = "./data/images/features/ResNet50/")]
    img_feature_root: PathBuf,

    /// Directory receiving models/, optimizers/ and logs/
    #[arg(long, short = 'o', default_value = "./data/train_data/run")]
    output_dir: PathBuf,

    /// Load every image feature into memory before training
    #[arg(long, short = 'p', default_value_t = true, action = ArgAction::Set)]
    preload: bool,

    #[arg(long, default_value_t = 100)]
    epoch: usize,

    #[arg(long, default_value_t = 256)]
    batch_size: usize,

    /// LSTM hidden size
    #[arg(long, default_value_t = 512)]
    hidden_dim: usize,

    /// Width of the image feature vectors
    #[arg(long, default_value_t = 2048)]
    img_feature_dim: usize,

    #[arg(long, value_enum, default_value_t = OptimizerType::Adam)]
    optimizer: OptimizerType,

    /// Overrides the optimizer's default learning rate
    #[arg(long)]
    learning_rate: Option<f32>,

    #[arg(long, default_value_t = 0.5)]
    dropout_ratio: f32,

    #[arg(long, default_value_t = 1)]
    n_layers: usize,

    /// Epoch of the checkpoint to resume from (0 trains from scratch)
    #[arg(long, default_value_t = 0)]
    load_model: usize,

    /// Post per-epoch results to the webhook
    #[arg(long)]
    slack: bool,

    #[arg(long, env = "CAPTION_TRAINER_WEBHOOK")]
    webhook_url: Option<String>,

    /// Reshuffle the captions at every epoch
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    shuffle: bool,

    #[arg(long, default_value_t = 0)]
    seed: u64,
}

impl From<TrainArgs> for TrainConfig {
    fn from(args: TrainArgs) -> Self {
        TrainConfig {
            device: args.gpu,
            dataset: args.dataset,
            feature_root: args.img_feature_root,
            output_dir: args.output_dir,
            preload: args.preload,
            epochs: args.epoch,
            batch_size: args.batch_size,
            hidden_dim: args.hidden_dim,
            feature_dim: args.img_feature_dim,
            optimizer: args.optimizer,
            learning_rate: args.learning_rate,
            dropout: args.dropout_ratio,
            num_layers: args.n_layers,
            resume_epoch: args.load_model,
            notify: args.slack,
            notify_url: args.webhook_url,
            shuffle: args.shuffle,
            seed: args.seed,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("caption_trainer=info")),
        )
        .init();

    let config: TrainConfig = TrainArgs::parse().into();

    info!("loading preprocessed data from {}", config.dataset.display());
    let dataset = CaptionDataset::load(&config.dataset)
        .with_context(|| format!("failed to load dataset {}", config.dataset.display()))?;

    let store = DiskFeatureStore::open(
        &config.feature_root,
        config.feature_dim,
        config.preload,
        dataset.train.image_ids(),
    )
    .with_context(|| format!("failed to open image features under {}", config.feature_root.display()))?;

    let mut trainer = Trainer::new(config, dataset, store).context("failed to set up training")?;
    let report = trainer.run().context("training aborted")?;

    if let Some(last) = report.last() {
        info!(epoch = last.epoch, mean_loss = last.mean_loss, "done");
    }
    Ok(())
}
