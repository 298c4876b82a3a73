use ndarray::{Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};

use super::{Optimizer, OptimizerState};
use crate::config::OptimizerType;

/// Adam optimizer implementation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adam {
    alpha: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    state: OptimizerState,
}

impl Adam {
    pub fn new(alpha: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self { alpha, beta1, beta2, epsilon, state: OptimizerState::default() }
    }

    pub fn with_alpha(alpha: f32) -> Self {
        Self { alpha, ..Self::default() }
    }

    /// Step size with both bias corrections folded in
    pub fn lr_at(&self, t: u64) -> f32 {
        let t = t as i32;
        let fix1 = 1.0 - self.beta1.powi(t);
        let fix2 = 1.0 - self.beta2.powi(t);
        self.alpha * fix2.sqrt() / fix1
    }
}

impl Default for Adam {
    fn default() -> Self {
        Self::new(0.001, 0.9, 0.999, 1e-8)
    }
}

#[typetag::serde]
impl Optimizer for Adam {
    fn kind(&self) -> OptimizerType {
        OptimizerType::Adam
    }

    fn learning_rate(&self) -> f32 {
        self.alpha
    }

    fn state(&self) -> &OptimizerState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut OptimizerState {
        &mut self.state
    }

    // [first moment, second moment]
    fn slot_count(&self) -> usize {
        2
    }

    fn update_one(&self, t: u64, param: &mut Array2<f32>, grad: ArrayView2<f32>, slots: &mut [Array2<f32>]) {
        let [m, v] = slots else { return };
        let lr = self.lr_at(t);
        Zip::from(param).and(grad).and(m).and(v).for_each(|p, &g, m, v| {
            *m += (1.0 - self.beta1) * (g - *m);
            *v += (1.0 - self.beta2) * (g * g - *v);
            *p -= lr * *m / (v.sqrt() + self.epsilon);
        });
    }
}
