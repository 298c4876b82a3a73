use ndarray::{Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};

use super::{Optimizer, OptimizerState};
use crate::config::OptimizerType;

/// Simon Funk's SMORMS3: RMSprop whose averaging window adapts per entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Smorms3 {
    lr: f32,
    eps: f32,
    state: OptimizerState,
}

impl Smorms3 {
    pub fn new(lr: f32, eps: f32) -> Self {
        Self { lr, eps, state: OptimizerState::default() }
    }

    pub fn with_lr(lr: f32) -> Self {
        Self::new(lr, 1e-16)
    }
}

impl Default for Smorms3 {
    fn default() -> Self {
        Self::new(0.001, 1e-16)
    }
}

const MEM: usize = 0;

#[typetag::serde]
impl Optimizer for Smorms3 {
    fn kind(&self) -> OptimizerType {
        OptimizerType::Smorms3
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

    // [memory, mean, mean square]
    fn slot_count(&self) -> usize {
        3
    }

    fn init_slot(&self, index: usize, shape: (usize, usize)) -> Array2<f32> {
        if index == MEM {
            Array2::ones(shape)
        } else {
            Array2::zeros(shape)
        }
    }

    fn update_one(&self, _t: u64, param: &mut Array2<f32>, grad: ArrayView2<f32>, slots: &mut [Array2<f32>]) {
        let [mem, g_mean, g2_mean] = slots else { return };
        let (lr, eps) = (self.lr, self.eps);
        Zip::from(param).and(grad).and(mem).and(g_mean).and(g2_mean).for_each(
            |p, &grad, mem, g, g2| {
                let r = 1.0 / (*mem + 1.0);
                *g = (1.0 - r) * *g + r * grad;
                *g2 = (1.0 - r) * *g2 + r * grad * grad;
                let x = *g * *g / (*g2 + eps);
                *p -= grad * lr.min(x) / (g2.sqrt() + eps);
                *mem = 1.0 + *mem * (1.0 - x);
            },
        );
    }
}
