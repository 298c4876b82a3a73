use ndarray::{Array2, ArrayView2, Zip};
use serde::{Deserialize, Serialize};

use super::{Optimizer, OptimizerState};
use crate::config::OptimizerType;

/// Zeiler's AdaDelta. The step size comes from the ratio of the running
/// RMS of past updates to the running RMS of gradients, so there is no
/// learning rate to tune.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaDelta {
    rho: f32,
    eps: f32,
    state: OptimizerState,
}

impl AdaDelta {
    pub fn new(rho: f32, eps: f32) -> Self {
        Self { rho, eps, state: OptimizerState::default() }
    }
}

impl Default for AdaDelta {
    fn default() -> Self {
        Self::new(0.95, 1e-6)
    }
}

#[typetag::serde]
impl Optimizer for AdaDelta {
    fn kind(&self) -> OptimizerType {
        OptimizerType::AdaDelta
    }

    fn learning_rate(&self) -> f32 {
        1.0
    }

    fn state(&self) -> &OptimizerState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut OptimizerState {
        &mut self.state
    }

    // [mean square gradient, mean square update]
    fn slot_count(&self) -> usize {
        2
    }

    fn update_one(&self, _t: u64, param: &mut Array2<f32>, grad: ArrayView2<f32>, slots: &mut [Array2<f32>]) {
        let [msg, msdx] = slots else { return };
        let (rho, eps) = (self.rho, self.eps);
        Zip::from(param).and(grad).and(msg).and(msdx).for_each(|p, &g, msg, msdx| {
            *msg = rho * *msg + (1.0 - rho) * g * g;
            let dx = ((*msdx + eps) / (*msg + eps)).sqrt() * g;
            *msdx = rho * *msdx + (1.0 - rho) * dx * dx;
            *p -= dx;
        });
    }
}
