use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use super::{AdaDelta, AdaGrad, Adam, MomentumSgd, NesterovAg, RmsProp, RmsPropGraves, Sgd, Smorms3};
use crate::config::OptimizerType;
use crate::model::{CaptionDecoder, Param};

#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error("Optimizer {0} has not been set up with a model")]
    NotSetUp(&'static str),

    #[error("Parameter shapes do not match the optimizer state: {0}")]
    ShapeMismatch(String),
}

/// Auxiliary state shared by every update rule: the step counter and,
/// per parameter, a fixed number of slot arrays (moments, accumulators).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    pub step: u64,
    pub shapes: Vec<(usize, usize)>,
    pub slots: Vec<Vec<Array2<f32>>>,
}

impl OptimizerState {
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

/// A parameter-update rule.
///
/// Implementors only describe how one parameter moves given its gradient
/// and slots; binding to a model and walking its parameters is shared.
#[typetag::serde]
pub trait Optimizer {
    fn kind(&self) -> OptimizerType;

    fn name(&self) -> &'static str {
        self.kind().name()
    }

    fn learning_rate(&self) -> f32;

    fn state(&self) -> &OptimizerState;

    fn state_mut(&mut self) -> &mut OptimizerState;

    /// Number of slot arrays kept per parameter
    fn slot_count(&self) -> usize;

    /// Initial value of slot `index`; zeros unless the rule says otherwise
    fn init_slot(&self, _index: usize, shape: (usize, usize)) -> Array2<f32> {
        Array2::zeros(shape)
    }

    /// Applies the rule to one parameter; `t` is the 1-based step number
    fn update_one(&self, t: u64, param: &mut Array2<f32>, grad: ArrayView2<f32>, slots: &mut [Array2<f32>]);

    /// Binds to `model`, allocating fresh state for every parameter
    fn setup(&mut self, model: &CaptionDecoder) {
        let shapes = model.param_shapes();
        let slots = shapes
            .iter()
            .map(|&shape| (0..self.slot_count()).map(|i| self.init_slot(i, shape)).collect())
            .collect();
        *self.state_mut() = OptimizerState { step: 0, shapes, slots };
    }

    fn is_setup(&self) -> bool {
        !self.state().is_empty()
    }

    /// One update step from the gradients stored on `model`. Gradients are
    /// left in place; clearing them is the caller's job.
    fn update(&mut self, model: &mut CaptionDecoder) -> Result<(), OptimizerError> {
        check_state(self.name(), self.slot_count(), self.state(), model)?;

        let mut state = std::mem::take(self.state_mut());
        state.step += 1;
        for (param, slots) in model.params_mut().into_iter().zip(state.slots.iter_mut()) {
            let Param { value, grad } = param;
            self.update_one(state.step, value, grad.view(), slots);
        }
        *self.state_mut() = state;
        Ok(())
    }
}

/// Checks that `state` was built for a model shaped like `model`
pub fn check_state(
    name: &'static str,
    slot_count: usize,
    state: &OptimizerState,
    model: &CaptionDecoder,
) -> Result<(), OptimizerError> {
    if state.is_empty() {
        return Err(OptimizerError::NotSetUp(name));
    }
    let shapes = model.param_shapes();
    if state.shapes != shapes {
        return Err(OptimizerError::ShapeMismatch(format!(
            "model has {:?}, state has {:?}",
            shapes, state.shapes
        )));
    }
    if state.slots.len() != shapes.len() {
        return Err(OptimizerError::ShapeMismatch(format!(
            "{} slot groups for {} parameters",
            state.slots.len(),
            shapes.len()
        )));
    }
    for (slots, &shape) in state.slots.iter().zip(&shapes) {
        if slots.len() != slot_count || slots.iter().any(|s| s.dim() != shape) {
            return Err(OptimizerError::ShapeMismatch(format!(
                "{name} expects {slot_count} slots of shape {shape:?}"
            )));
        }
    }
    Ok(())
}

/// Builds the requested update rule with its default hyper-parameters,
/// optionally overriding the learning rate.
pub fn build_optimizer(kind: OptimizerType, learning_rate: Option<f32>) -> Box<dyn Optimizer> {
    match (kind, learning_rate) {
        (OptimizerType::Sgd, lr) => Box::new(lr.map_or_else(Sgd::default, Sgd::new)),
        (OptimizerType::MomentumSgd, lr) => {
            Box::new(lr.map_or_else(MomentumSgd::default, MomentumSgd::with_lr))
        }
        (OptimizerType::NesterovAg, lr) => {
            Box::new(lr.map_or_else(NesterovAg::default, NesterovAg::with_lr))
        }
        (OptimizerType::AdaGrad, lr) => Box::new(lr.map_or_else(AdaGrad::default, AdaGrad::with_lr)),
        (OptimizerType::AdaDelta, lr) => {
            if lr.is_some() {
                warn!("AdaDelta has no learning rate, ignoring the override");
            }
            Box::new(AdaDelta::default())
        }
        (OptimizerType::Adam, lr) => Box::new(lr.map_or_else(Adam::default, Adam::with_alpha)),
        (OptimizerType::RmsProp, lr) => Box::new(lr.map_or_else(RmsProp::default, RmsProp::with_lr)),
        (OptimizerType::RmsPropGraves, lr) => {
            Box::new(lr.map_or_else(RmsPropGraves::default, RmsPropGraves::with_lr))
        }
        (OptimizerType::Smorms3, lr) => Box::new(lr.map_or_else(Smorms3::default, Smorms3::with_lr)),
    }
}
