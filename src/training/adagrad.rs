use ndarray::{Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};

use super::{Optimizer, OptimizerState};
use crate::config::OptimizerType;

/// AdaGrad: per-entry rates shrink with the accumulated squared gradient
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaGrad {
    lr: f32,
    eps: f32,
    state: OptimizerState,
}

impl AdaGrad {
    pub fn new(lr: f32, eps: f32) -> Self {
        Self { lr, eps, state: OptimizerState::default() }
    }

    pub fn with_lr(lr: f32) -> Self {
        Self::new(lr, 1e-8)
    }
}

impl Default for AdaGrad {
    fn default() -> Self {
        Self::new(0.001, 1e-8)
    }
}

#[typetag::serde]
impl Optimizer for AdaGrad {
    fn kind(&self) -> OptimizerType {
        OptimizerType::AdaGrad
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }

    fn state(&self) -> &OptimizerState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut OptimizerState {
        &mut self.state
    }

    fn slot_count(&self) -> usize {
        1
    }

    fn update_one(&self, _t: u64, param: &mut Array2<f32>, grad: ArrayView2<f32>, slots: &mut [Array2<f32>]) {
        let [h] = slots else { return };
        Zip::from(param).and(grad).and(h).for_each(|p, &g, h| {
            *h += g * g;
            *p -= self.lr * g / (h.sqrt() + self.eps);
        });
    }
}
