//! The residual GATN generator and the loss terms it is trained on
use crate::dnn::softmax::row_max;
use crate::dnn::{Dense, Layer, ReLU, Reshape, DNN};
use crate::error::Result;
use crate::tensorshape::TensorShape;
use crate::TsFloat;
use ndarray::{concatenate, Array2, Array3, ArrayD, ArrayView2, ArrayView3, ArrayViewMutD, Axis, Ix3};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maps a series and the classifier's target-class gradient to a perturbed
/// series `x + delta(x, grad)` of the same shape.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Generator {
    seq_shape: TensorShape,
    dnn: DNN,
}

impl Generator {
    /// Fully connected generator with one ReLU layer per entry of `hidden`.
    ///
    /// # Errors
    /// If the layers do not chain
    pub fn build<R: Rng>(seq_len: usize, channels: usize, hidden: &[usize], rng: &mut R) -> Result<Self> {
        let seq_shape = TensorShape::new(vec![seq_len, channels]);
        let input_shape = TensorShape::new(vec![seq_len, 2 * channels]);
        let mut layers: Vec<Box<dyn Layer>> = vec![Box::new(Reshape::flatten(input_shape.clone()))];
        let mut width = input_shape.dims();
        for &units in hidden {
            layers.push(Box::new(Dense::glorot(width, units, rng)));
            layers.push(Box::new(ReLU::new(TensorShape::new(vec![units]))));
            width = units;
        }
        layers.push(Box::new(Dense::glorot(width, seq_shape.dims(), rng)));
        layers.push(Box::new(Reshape::new(
            TensorShape::new(vec![seq_shape.dims()]),
            seq_shape.clone(),
        )));
        Ok(Self {
            seq_shape,
            dnn: DNN::new(layers)?,
        })
    }

    pub const fn seq_shape(&self) -> &TensorShape {
        &self.seq_shape
    }

    pub fn num_params(&self) -> usize {
        self.dnn.num_params()
    }

    fn stacked(x: &ArrayView3<TsFloat>, grad: &ArrayView3<TsFloat>) -> ArrayD<TsFloat> {
        // (N, T, C) ++ (N, T, C) -> (N, T, 2C)
        concatenate(Axis(2), &[x.view(), grad.view()])
            .unwrap()
            .into_dyn()
    }

    /// The perturbed batch.
    pub fn forward(&self, x: &ArrayView3<TsFloat>, grad: &ArrayView3<TsFloat>) -> Array3<TsFloat> {
        let delta = self
            .dnn
            .forward(&Self::stacked(x, grad))
            .into_dimensionality::<Ix3>()
            .unwrap();
        delta + x
    }

    /// Gradients of the generator weights given the gradient w.r.t. its output.
    ///
    /// `x` and `grad` are constants, so the output gradient flows only
    /// through `delta`.
    pub fn backward(
        &self,
        x: &ArrayView3<TsFloat>,
        grad: &ArrayView3<TsFloat>,
        output_grad: &Array3<TsFloat>,
    ) -> Vec<ArrayD<TsFloat>> {
        let trace = self.dnn.forward_trace(&Self::stacked(x, grad));
        let (_, param_grads) = self.dnn.backward(&trace, output_grad.clone().into_dyn());
        param_grads
    }

    pub fn params_mut(&mut self) -> Vec<ArrayViewMutD<TsFloat>> {
        self.dnn.params_mut()
    }
}

impl fmt::Display for Generator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "GATN {}", self.dnn)
    }
}

/// Raise the target column of every row to `alpha` times the row maximum,
/// then renormalize rows to sum to one.
pub fn reranking(probs: &ArrayView2<TsFloat>, target: usize, alpha: TsFloat) -> Array2<TsFloat> {
    let mut out = probs.to_owned();
    for mut row in out.rows_mut() {
        row[target] = alpha * row_max(&row.view());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    out
}

/// Reconstruction term `mean((x_adv - x)^2)` and its gradient w.r.t. `x_adv`.
pub fn reconstruction_mse(
    x_adv: &ArrayView3<TsFloat>,
    x: &ArrayView3<TsFloat>,
) -> (TsFloat, Array3<TsFloat>) {
    let diff = x_adv - x;
    let n = diff.len().max(1) as TsFloat;
    (diff.mapv(|v| v * v).sum() / n, diff * (2. / n))
}

/// Misclassification term `mean((p(x_adv) - reranked)^2)` and its gradient
/// w.r.t. `p(x_adv)`. `reranked` is a constant.
pub fn targeted_mse(
    adv_probs: &ArrayView2<TsFloat>,
    reranked: &ArrayView2<TsFloat>,
) -> (TsFloat, Array2<TsFloat>) {
    let diff = adv_probs - reranked;
    let n = diff.len().max(1) as TsFloat;
    (diff.mapv(|v| v * v).sum() / n, diff * (2. / n))
}

/// Per-sample MSE between two batches.
pub fn per_sample_mse(x: &ArrayView3<TsFloat>, x_adv: &ArrayView3<TsFloat>) -> ndarray::Array1<TsFloat> {
    let diff = x - x_adv;
    diff.outer_iter()
        .map(|sample| sample.mapv(|v| v * v).mean().unwrap_or(0.))
        .collect()
}
