use ndarray::Array2;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::model::ModelError;

/// A trainable matrix together with its accumulated gradient
#[derive(Debug, Clone)]
pub struct Param {
    pub value: Array2<f32>,
    pub grad: Array2<f32>,
}

impl Param {
    pub fn new(value: Array2<f32>) -> Self {
        let grad = Array2::zeros(value.raw_dim());
        Self { value, grad }
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self::new(Array2::zeros((rows, cols)))
    }

    /// Samples every entry from `N(0, std^2)`
    pub fn normal(rows: usize, cols: usize, std: f32, rng: &mut StdRng) -> Result<Self, ModelError> {
        let normal =
            Normal::new(0.0, std).map_err(|e| ModelError::Initialization(e.to_string()))?;
        Ok(Self::new(Array2::random_using((rows, cols), normal, rng)))
    }

    pub fn shape(&self) -> (usize, usize) {
        self.value.dim()
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    /// Replaces the value, keeping the shape; the gradient is cleared
    pub fn set_value(&mut self, value: Array2<f32>) -> Result<(), ModelError> {
        if value.dim() != self.shape() {
            return Err(ModelError::dims("parameter", self.shape(), value.dim()));
        }
        self.value = value;
        self.zero_grad();
        Ok(())
    }
}
