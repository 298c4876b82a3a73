use ndarray::{Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};

use super::{Optimizer, OptimizerState};
use crate::config::OptimizerType;

/// RMSprop: gradients are scaled by a running RMS of recent gradients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RmsProp {
    lr: f32,
    alpha: f32,
    eps: f32,
    state: OptimizerState,
}

impl RmsProp {
    pub fn new(lr: f32, alpha: f32, eps: f32) -> Self {
        Self { lr, alpha, eps, state: OptimizerState::default() }
    }

    pub fn with_lr(lr: f32) -> Self {
        Self { lr, ..Self::default() }
    }
}

impl Default for RmsProp {
    fn default() -> Self {
        Self::new(0.01, 0.99, 1e-8)
    }
}

#[typetag::serde]
impl Optimizer for RmsProp {
    fn kind(&self) -> OptimizerType {
        OptimizerType::RmsProp
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
        let [ms] = slots else { return };
        let alpha = self.alpha;
        Zip::from(param).and(grad).and(ms).for_each(|p, &g, ms| {
            *ms = alpha * *ms + (1.0 - alpha) * g * g;
            *p -= self.lr * g / (ms.sqrt() + self.eps);
        });
    }
}

/// Graves' (2013) RMSprop: the gradient variance is centred by a running
/// mean of the gradient and the update carries momentum
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RmsPropGraves {
    lr: f32,
    alpha: f32,
    momentum: f32,
    eps: f32,
    state: OptimizerState,
}

impl RmsPropGraves {
    pub fn new(lr: f32, alpha: f32, momentum: f32, eps: f32) -> Self {
        Self { lr, alpha, momentum, eps, state: OptimizerState::default() }
    }

    pub fn with_lr(lr: f32) -> Self {
        Self { lr, ..Self::default() }
    }
}

impl Default for RmsPropGraves {
    fn default() -> Self {
        Self::new(1e-4, 0.95, 0.9, 1e-4)
    }
}

#[typetag::serde]
impl Optimizer for RmsPropGraves {
    fn kind(&self) -> OptimizerType {
        OptimizerType::RmsPropGraves
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

    // [mean square, mean, delta]
    fn slot_count(&self) -> usize {
        3
    }

    fn update_one(&self, _t: u64, param: &mut Array2<f32>, grad: ArrayView2<f32>, slots: &mut [Array2<f32>]) {
        let [n, g_mean, delta] = slots else { return };
        let alpha = self.alpha;
        Zip::from(param).and(grad).and(n).and(g_mean).and(delta).for_each(|p, &g, n, gm, d| {
            *n = alpha * *n + (1.0 - alpha) * g * g;
            *gm = alpha * *gm + (1.0 - alpha) * g;
            *d = self.momentum * *d - self.lr * g / (*n - *gm * *gm + self.eps).sqrt();
            *p += *d;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_rmsprop_first_step() {
        let opt = RmsProp::new(0.01, 0.9, 0.0);
        let mut param = array![[0.0]];
        let mut slots = [Array2::zeros((1, 1))];

        opt.update_one(1, &mut param, array![[2.0]].view(), &mut slots);
        // ms = 0.4, step = 0.01 * 2 / sqrt(0.4)
        assert_abs_diff_eq!(slots[0][[0, 0]], 0.4, epsilon = 1e-6);
        assert_abs_diff_eq!(param[[0, 0]], -0.02 / 0.4f32.sqrt(), epsilon = 1e-6);
    }

    #[test]
    fn test_graves_first_step() {
        let opt = RmsPropGraves::new(0.1, 0.5, 0.9, 0.0);
        let mut param = array![[1.0]];
        let mut slots = [Array2::zeros((1, 1)), Array2::zeros((1, 1)), Array2::zeros((1, 1))];

        opt.update_one(1, &mut param, array![[1.0]].view(), &mut slots);
        // n = 0.5, mean = 0.5, variance = 0.25 so delta = -0.1 / 0.5
        assert_abs_diff_eq!(slots[2][[0, 0]], -0.2, epsilon = 1e-6);
        assert_abs_diff_eq!(param[[0, 0]], 0.8, epsilon = 1e-6);

        opt.update_one(2, &mut param, array![[1.0]].view(), &mut slots);
        assert!(slots[2][[0, 0]] < -0.2);
    }
}
