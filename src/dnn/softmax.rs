//! Softmax, cross-entropy and row-wise argmax over (batch, classes) matrices
use crate::TsFloat;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use ndarray_stats::QuantileExt;
use ordered_float::OrderedFloat;

/// Numerically stable softmax of every row.
pub fn softmax(logits: &ArrayView2<TsFloat>) -> Array2<TsFloat> {
    let mut probs = logits.to_owned();
    for mut row in probs.rows_mut() {
        let max = row_max(&row.view());
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    probs
}

/// Pull a gradient on the probabilities back onto the logits.
///
/// dL/dz_j = p_j * (dL/dp_j - sum_k dL/dp_k p_k)
pub fn softmax_backward(
    probs: &ArrayView2<TsFloat>,
    probs_grad: &ArrayView2<TsFloat>,
) -> Array2<TsFloat> {
    let dot = (probs * probs_grad).sum_axis(Axis(1)).insert_axis(Axis(1));
    probs * &(probs_grad - &dot)
}

/// Mean negative log likelihood of `labels` and its gradient w.r.t. the logits.
pub fn cross_entropy(
    probs: &ArrayView2<TsFloat>,
    labels: &ArrayView1<usize>,
) -> (TsFloat, Array2<TsFloat>) {
    let n = probs.nrows() as TsFloat;
    let eps = 1e-12;
    let loss = Zip::from(probs.rows())
        .and(labels)
        .fold(0., |acc, row, &label| acc - (row[label] + eps).ln());
    let mut grad = probs.to_owned();
    for (mut row, &label) in grad.rows_mut().into_iter().zip(labels) {
        row[label] -= 1.;
    }
    (loss / n, grad / n)
}

pub fn row_max(row: &ArrayView1<TsFloat>) -> TsFloat {
    row.iter()
        .copied()
        .map(OrderedFloat)
        .max()
        .map_or(TsFloat::NEG_INFINITY, |m| m.0)
}

/// Index of the largest entry of each row. NaN rows map to class 0.
pub fn argmax_rows(probs: &ArrayView2<TsFloat>) -> Array1<usize> {
    probs
        .rows()
        .into_iter()
        .map(|row| row.argmax().unwrap_or(0))
        .collect()
}
