use ndarray::{s, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;

use super::Param;
use crate::model::ModelError;
use crate::utils::sigmoid;

/// Activations kept from one forward step, consumed by `backward_step`
#[derive(Debug, Clone)]
pub struct LstmStepCache {
    x: Array2<f32>,
    h_prev: Array2<f32>,
    c_prev: Array2<f32>,
    i: Array2<f32>,
    f: Array2<f32>,
    g: Array2<f32>,
    o: Array2<f32>,
    tanh_c: Array2<f32>,
}

/// Gradients flowing out of one backward step
#[derive(Debug)]
pub struct LstmStepGrads {
    pub dx: Array2<f32>,
    pub dh_prev: Array2<f32>,
    pub dc_prev: Array2<f32>,
}

/// One LSTM layer. The pre-activation columns are laid out as
/// `[input | forget | cell | output]`, each `hidden_dim` wide.
#[derive(Debug, Clone)]
pub struct LstmLayer {
    pub w_x: Param,  // [input_dim, 4 * hidden_dim]
    pub w_h: Param,  // [hidden_dim, 4 * hidden_dim]
    pub bias: Param, // [1, 4 * hidden_dim]
    input_dim: usize,
    hidden_dim: usize,
}

impl LstmLayer {
    pub fn new(input_dim: usize, hidden_dim: usize, rng: &mut StdRng) -> Result<Self, ModelError> {
        let std = (1.0 / input_dim as f32).sqrt();
        let w_x = Param::normal(input_dim, 4 * hidden_dim, std, rng)?;
        let std = (1.0 / hidden_dim as f32).sqrt();
        let w_h = Param::normal(hidden_dim, 4 * hidden_dim, std, rng)?;

        Ok(Self { w_x, w_h, bias: Param::zeros(1, 4 * hidden_dim), input_dim, hidden_dim })
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    /// Advances one timestep, returning the new hidden and cell state
    pub fn step(
        &self,
        x: ArrayView2<f32>,
        h_prev: ArrayView2<f32>,
        c_prev: ArrayView2<f32>,
    ) -> Result<(Array2<f32>, Array2<f32>, LstmStepCache), ModelError> {
        let batch = x.nrows();
        if x.ncols() != self.input_dim {
            return Err(ModelError::dims("lstm input", (batch, self.input_dim), x.dim()));
        }
        if h_prev.dim() != (batch, self.hidden_dim) || c_prev.dim() != h_prev.dim() {
            return Err(ModelError::dims("lstm state", (batch, self.hidden_dim), h_prev.dim()));
        }

        let z = x.dot(&self.w_x.value) + h_prev.dot(&self.w_h.value) + &self.bias.value;
        let h = self.hidden_dim;
        let i = z.slice(s![.., 0..h]).mapv(sigmoid);
        let f = z.slice(s![.., h..2 * h]).mapv(sigmoid);
        let g = z.slice(s![.., 2 * h..3 * h]).mapv(f32::tanh);
        let o = z.slice(s![.., 3 * h..4 * h]).mapv(sigmoid);

        let c = &f * &c_prev + &i * &g;
        let tanh_c = c.mapv(f32::tanh);
        let h_new = &o * &tanh_c;

        let cache = LstmStepCache {
            x: x.to_owned(),
            h_prev: h_prev.to_owned(),
            c_prev: c_prev.to_owned(),
            i,
            f,
            g,
            o,
            tanh_c,
        };
        Ok((h_new, c, cache))
    }

    /// Backpropagates one step. `dh` is the total gradient reaching this
    /// step's hidden output, `dc_next` the gradient carried back through
    /// the cell from the following step.
    pub fn backward_step(
        &mut self,
        cache: &LstmStepCache,
        dh: ArrayView2<f32>,
        dc_next: ArrayView2<f32>,
    ) -> LstmStepGrads {
        let LstmStepCache { x, h_prev, c_prev, i, f, g, o, tanh_c } = cache;

        let dc = &dc_next + &(&dh * o * &tanh_c.mapv(|t| 1.0 - t * t));
        let d_o = &dh * tanh_c;
        let d_i = &dc * g;
        let d_g = &dc * i;
        let d_f = &dc * c_prev;
        let dc_prev = &dc * f;

        let h = self.hidden_dim;
        let mut dz = Array2::<f32>::zeros((x.nrows(), 4 * h));
        dz.slice_mut(s![.., 0..h]).assign(&(d_i * i.mapv(|v| v * (1.0 - v))));
        dz.slice_mut(s![.., h..2 * h]).assign(&(d_f * f.mapv(|v| v * (1.0 - v))));
        dz.slice_mut(s![.., 2 * h..3 * h]).assign(&(d_g * g.mapv(|v| 1.0 - v * v)));
        dz.slice_mut(s![.., 3 * h..4 * h]).assign(&(d_o * o.mapv(|v| v * (1.0 - v))));

        self.w_x.grad += &x.t().dot(&dz);
        self.w_h.grad += &h_prev.t().dot(&dz);
        self.bias.grad += &dz.sum_axis(Axis(0)).insert_axis(Axis(0));

        LstmStepGrads {
            dx: dz.dot(&self.w_x.value.t()),
            dh_prev: dz.dot(&self.w_h.value.t()),
            dc_prev,
        }
    }

    pub fn params(&self) -> [&Param; 3] {
        [&self.w_x, &self.w_h, &self.bias]
    }

    pub fn params_mut(&mut self) -> [&mut Param; 3] {
        [&mut self.w_x, &mut self.w_h, &mut self.bias]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;

    #[test]
    fn test_zero_weights_give_half_gates() {
        let mut layer = LstmLayer::new(3, 2, &mut StdRng::seed_from_u64(0)).unwrap();
        layer.w_x.value.fill(0.0);
        layer.w_h.value.fill(0.0);

        let x = Array2::ones((1, 3));
        let c_prev = Array2::from_elem((1, 2), 2.0);
        let (h, c, _) = layer.step(x.view(), Array2::zeros((1, 2)).view(), c_prev.view()).unwrap();

        // i = f = o = 0.5, g = 0 so c = 0.5 * c_prev
        assert_abs_diff_eq!(c, Array2::from_elem((1, 2), 1.0), epsilon = 1e-6);
        assert_abs_diff_eq!(h, Array2::from_elem((1, 2), 0.5 * 1f32.tanh()), epsilon = 1e-6);
    }

    #[test]
    fn test_step_rejects_bad_shapes() {
        let layer = LstmLayer::new(3, 2, &mut StdRng::seed_from_u64(0)).unwrap();
        let state = Array2::zeros((2, 2));
        assert!(layer.step(Array2::zeros((2, 4)).view(), state.view(), state.view()).is_err());
        assert!(layer
            .step(Array2::zeros((2, 3)).view(), Array2::zeros((1, 2)).view(), state.view())
            .is_err());
    }

    #[test]
    fn test_backward_matches_finite_difference() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut layer = LstmLayer::new(3, 2, &mut rng).unwrap();
        let x = Param::normal(2, 3, 1.0, &mut rng).unwrap().value;
        let h0 = Param::normal(2, 2, 0.5, &mut rng).unwrap().value;
        let c0 = Param::normal(2, 2, 0.5, &mut rng).unwrap().value;

        // loss = sum(h) + sum(c)
        let loss = |layer: &LstmLayer| {
            let (h, c, _) = layer.step(x.view(), h0.view(), c0.view()).unwrap();
            h.sum() + c.sum()
        };

        let (_, _, cache) = layer.step(x.view(), h0.view(), c0.view()).unwrap();
        let ones = Array2::ones((2, 2));
        layer.backward_step(&cache, ones.view(), ones.view());

        let eps = 1e-2;
        for (r, c) in [(0, 0), (1, 5), (2, 7)] {
            let analytic = layer.w_x.grad[[r, c]];
            let mut probe = layer.clone();
            probe.w_x.value[[r, c]] += eps;
            let plus = loss(&probe);
            probe.w_x.value[[r, c]] -= 2.0 * eps;
            let minus = loss(&probe);
            assert_abs_diff_eq!(analytic, (plus - minus) / (2.0 * eps), epsilon = 1e-2);
        }
    }
}
