use ndarray::{Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};

use super::{Optimizer, OptimizerState};
use crate::config::OptimizerType;

/// Classical momentum: `v = mu v - lr g; p += v`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentumSgd {
    lr: f32,
    momentum: f32,
    state: OptimizerState,
}

impl MomentumSgd {
    pub fn new(lr: f32, momentum: f32) -> Self {
        Self { lr, momentum, state: OptimizerState::default() }
    }

    pub fn with_lr(lr: f32) -> Self {
        Self::new(lr, 0.9)
    }
}

impl Default for MomentumSgd {
    fn default() -> Self {
        Self::new(0.01, 0.9)
    }
}

#[typetag::serde]
impl Optimizer for MomentumSgd {
    fn kind(&self) -> OptimizerType {
        OptimizerType::MomentumSgd
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
        let [v] = slots else { return };
        Zip::from(param).and(grad).and(v).for_each(|p, &g, v| {
            *v = self.momentum * *v - self.lr * g;
            *p += *v;
        });
    }
}

/// Nesterov's accelerated gradient, in the reformulation that only needs
/// the gradient at the current parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NesterovAg {
    lr: f32,
    momentum: f32,
    state: OptimizerState,
}

impl NesterovAg {
    pub fn new(lr: f32, momentum: f32) -> Self {
        Self { lr, momentum, state: OptimizerState::default() }
    }

    pub fn with_lr(lr: f32) -> Self {
        Self::new(lr, 0.9)
    }
}

impl Default for NesterovAg {
    fn default() -> Self {
        Self::new(0.01, 0.9)
    }
}

#[typetag::serde]
impl Optimizer for NesterovAg {
    fn kind(&self) -> OptimizerType {
        OptimizerType::NesterovAg
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
        let [v] = slots else { return };
        let mu = self.momentum;
        Zip::from(param).and(grad).and(v).for_each(|p, &g, v| {
            *v = mu * *v - self.lr * g;
            *p += mu * mu * *v - (1.0 + mu) * self.lr * g;
        });
    }
}
