use ndarray::Array2;
use rand::rngs::StdRng;
use rand::Rng;

/// Inverted dropout: kept units are scaled by `1 / (1 - ratio)` so
/// evaluation needs no rescaling.
#[derive(Debug, Clone, Copy)]
pub struct Dropout {
    ratio: f32,
}

impl Dropout {
    pub fn new(ratio: f32) -> Self {
        Self { ratio }
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    /// Draws a mask for `shape`; `None` means the identity
    pub fn sample_mask(
        &self,
        shape: (usize, usize),
        training: bool,
        rng: &mut StdRng,
    ) -> Option<Array2<f32>> {
        if !training || self.ratio <= 0.0 {
            return None;
        }
        let scale = 1.0 / (1.0 - self.ratio);
        Some(Array2::from_shape_simple_fn(shape, || {
            if rng.gen::<f32>() < self.ratio {
                0.0
            } else {
                scale
            }
        }))
    }
}

/// Applies an optional mask in place
pub fn apply_mask(x: &mut Array2<f32>, mask: Option<&Array2<f32>>) {
    if let Some(mask) = mask {
        *x *= mask;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_eval_is_identity() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(Dropout::new(0.5).sample_mask((2, 2), false, &mut rng).is_none());
        assert!(Dropout::new(0.0).sample_mask((2, 2), true, &mut rng).is_none());
    }

    #[test]
    fn test_mask_values_are_zero_or_scaled() {
        let mut rng = StdRng::seed_from_u64(0);
        let mask = Dropout::new(0.5).sample_mask((20, 20), true, &mut rng).unwrap();
        assert!(mask.iter().all(|&m| m == 0.0 || m == 2.0));
        let kept = mask.iter().filter(|&&m| m > 0.0).count();
        assert!(kept > 100 && kept < 300);
    }
}
