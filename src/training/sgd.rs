use ndarray::{Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};

use super::{Optimizer, OptimizerState};
use crate::config::OptimizerType;

/// Plain gradient descent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sgd {
    lr: f32,
    state: OptimizerState,
}

impl Sgd {
    pub fn new(lr: f32) -> Self {
        Self { lr, state: OptimizerState::default() }
    }
}

impl Default for Sgd {
    fn default() -> Self {
        Self::new(0.01)
    }
}

#[typetag::serde]
impl Optimizer for Sgd {
    fn kind(&self) -> OptimizerType {
        OptimizerType::Sgd
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
        0
    }

    fn update_one(&self, _t: u64, param: &mut Array2<f32>, grad: ArrayView2<f32>, _slots: &mut [Array2<f32>]) {
        Zip::from(param).and(grad).for_each(|p, &g| *p -= self.lr * g);
    }
}
