use ndarray::{Array2, ArrayView1, ArrayView2, Zip};

#[inline]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Log of the softmax normaliser of one row, computed with the max shift
pub fn log_sum_exp(row: ArrayView1<f32>) -> f32 {
    let max = row.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let sum_exp: f32 = row.iter().map(|&x| (x - max).exp()).sum();
    max + sum_exp.ln()
}

/// Weighted token cross-entropy and its gradient w.r.t. the logits.
///
/// Row `i` contributes `weights[i] * -log p(targets[i])`; rows with zero weight are skipped
/// and get a zero gradient. Returns `(loss, dlogits)`.
pub fn weighted_cross_entropy(
    logits: ArrayView2<f32>,
    targets: &[usize],
    weights: &[f32],
) -> (f32, Array2<f32>) {
    let mut dlogits = Array2::zeros(logits.raw_dim());
    let mut loss = 0.0;

    for (i, (&target, &weight)) in targets.iter().zip(weights).enumerate() {
        if weight == 0.0 {
            continue;
        }
        let row = logits.row(i);
        let lse = log_sum_exp(row);
        loss -= weight * (row[target] - lse);

        let mut grad = dlogits.row_mut(i);
        Zip::from(&mut grad).and(&row).for_each(|g, &x| *g = weight * (x - lse).exp());
        grad[target] -= weight;
    }

    (loss, dlogits)
}
