use ndarray::{Array2, ArrayView2, Axis};
use rand::rngs::StdRng;

use super::Param;
use crate::model::ModelError;

/// A fully-connected layer `y = x W + b`
#[derive(Debug, Clone)]
pub struct Linear {
    pub weight: Param, // [input_dim, output_dim]
    pub bias: Param,   // [1, output_dim]
}

impl Linear {
    pub fn new(input_dim: usize, output_dim: usize, rng: &mut StdRng) -> Result<Self, ModelError> {
        let std = (1.0 / input_dim as f32).sqrt();
        Ok(Self {
            weight: Param::normal(input_dim, output_dim, std, rng)?,
            bias: Param::zeros(1, output_dim),
        })
    }

    /// `x` is `[batch, input_dim]`
    pub fn forward(&self, x: ArrayView2<f32>) -> Array2<f32> {
        x.dot(&self.weight.value) + &self.bias.value
    }

    /// Accumulates weight and bias gradients, returns the gradient w.r.t. `x`
    pub fn backward(&mut self, x: ArrayView2<f32>, grad_output: ArrayView2<f32>) -> Array2<f32> {
        self.weight.grad += &x.t().dot(&grad_output);
        self.bias.grad += &grad_output.sum_axis(Axis(0)).insert_axis(Axis(0));
        grad_output.dot(&self.weight.value.t())
    }

    pub fn params(&self) -> [&Param; 2] {
        [&self.weight, &self.bias]
    }

    pub fn params_mut(&mut self) -> [&mut Param; 2] {
        [&mut self.weight, &mut self.bias]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::SeedableRng;

    fn known() -> Linear {
        Linear {
            weight: Param::new(array![[1.0, 2.0], [0.0, 1.0], [-1.0, 0.0]]),
            bias: Param::new(array![[0.5, -0.5]]),
        }
    }

    #[test]
    fn test_shapes() {
        let linear = Linear::new(4, 3, &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(linear.weight.shape(), (4, 3));
        assert_eq!(linear.bias.shape(), (1, 3));
        assert_eq!(linear.forward(Array2::zeros((5, 4)).view()).dim(), (5, 3));
    }

    #[test]
    fn test_forward_known_weights() {
        // [2, 3, 4] . W + b = [2 - 4 + 0.5, 4 + 3 - 0.5]
        let y = known().forward(array![[2.0, 3.0, 4.0]].view());
        assert_abs_diff_eq!(y, array![[-1.5, 6.5]], epsilon = 1e-6);
    }

    #[test]
    fn test_backward_accumulates() {
        let mut linear = known();
        let x = array![[1.0, 2.0, 3.0]];
        let dy = array![[1.0, -1.0]];

        let dx = linear.backward(x.view(), dy.view());
        assert_abs_diff_eq!(dx, array![[-1.0, -1.0, -1.0]], epsilon = 1e-6);
        assert_abs_diff_eq!(linear.bias.grad, array![[1.0, -1.0]], epsilon = 1e-6);

        linear.backward(x.view(), dy.view());
        assert_abs_diff_eq!(linear.weight.grad.column(0).to_owned(), array![2.0, 4.0, 6.0], epsilon = 1e-6);
    }
}
