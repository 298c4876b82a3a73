use ndarray::{Array2, ArrayView2, Axis};
use rand::rngs::StdRng;

use super::Param;
use crate::model::ModelError;

/// Token embedding lookup table
#[derive(Debug, Clone)]
pub struct Embedding {
    pub weight: Param, // [vocab_size, embed_dim]
}

impl Embedding {
    pub fn new(vocab_size: usize, embed_dim: usize, rng: &mut StdRng) -> Result<Self, ModelError> {
        Ok(Self { weight: Param::normal(vocab_size, embed_dim, 1.0, rng)? })
    }

    /// One row per token: `[tokens.len(), embed_dim]`
    pub fn forward(&self, tokens: &[usize]) -> Array2<f32> {
        self.weight.value.select(Axis(0), tokens)
    }

    pub fn backward(&mut self, tokens: &[usize], grad_output: ArrayView2<f32>) {
        for (&token, grad) in tokens.iter().zip(grad_output.rows()) {
            let mut row = self.weight.grad.row_mut(token);
            row += &grad;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;

    #[test]
    fn test_forward_selects_rows() {
        let mut embedding = Embedding::new(3, 2, &mut StdRng::seed_from_u64(1)).unwrap();
        embedding.weight.value = array![[0.0, 1.0], [2.0, 3.0], [4.0, 5.0]];

        let out = embedding.forward(&[2, 0, 2]);
        assert_eq!(out, array![[4.0, 5.0], [0.0, 1.0], [4.0, 5.0]]);
    }

    #[test]
    fn test_backward_sums_repeated_tokens() {
        let mut embedding = Embedding::new(3, 2, &mut StdRng::seed_from_u64(1)).unwrap();
        embedding.backward(&[1, 1, 0], array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]].view());

        assert_eq!(embedding.weight.grad, array![[5.0, 6.0], [4.0, 6.0], [0.0, 0.0]]);
    }
}
