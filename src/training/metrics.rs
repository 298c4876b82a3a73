use serde::Serialize;

/// What one optimisation step reports
#[derive(Debug, Clone, Serialize)]
pub struct IterationMetrics {
    pub epoch: usize,
    pub iteration: usize,
    pub loss: f32,
    pub grad_norm: f32,
    pub learning_rate: f32,
}

/// Running loss of the epoch in progress.
///
/// Each batch loss is a per-caption mean, so it is weighted by the batch
/// size and the epoch mean divides by the number of captions.
#[derive(Debug, Clone, Default)]
pub struct EpochStats {
    sum_loss: f64,
    iterations: usize,
}

impl EpochStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, loss: f32, batch_size: usize) {
        self.sum_loss += f64::from(loss) * batch_size as f64;
        self.iterations += 1;
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn sum_loss(&self) -> f64 {
        self.sum_loss
    }

    pub fn mean_loss(&self, caption_count: usize) -> f32 {
        if caption_count == 0 {
            return 0.0;
        }
        (self.sum_loss / caption_count as f64) as f32
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
