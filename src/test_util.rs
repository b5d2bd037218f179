#![cfg(test)]
use crate::affine::Affine2;
use crate::dnn::Layer;
use crate::TsFloat;
use ndarray::{Array1, Array2, Array3, ArrayD, ArrayView1, Axis};
use proptest::arbitrary::functor::ArbitraryF1;
use proptest::prelude::*;
use proptest::sample::SizeRange;

prop_compose! {
    pub fn array1(len: usize)(v in Vec::lift1_with(-10. .. 10., SizeRange::new(len..=len))) -> Array1<f64> {
        Array1::from_vec(v)
    }
}

prop_compose! {
    pub fn array2(rows: usize, cols: usize)(v in Vec::lift1_with(array1(cols), SizeRange::new(rows..=rows))) -> Array2<f64> {
        assert!(rows > 0);
        ndarray::stack(Axis(0), &v.iter().map(|x| x.view()).collect::<Vec<ArrayView1<f64>>>()).unwrap()
    }
}

prop_compose! {
    pub fn array3(d0: usize, d1: usize, d2: usize)(v in Vec::lift1_with(-2. .. 2., SizeRange::new(d0 * d1 * d2..=d0 * d1 * d2))) -> Array3<f64> {
        Array3::from_shape_vec((d0, d1, d2), v).unwrap()
    }
}

prop_compose! {
    pub fn affine2(in_dim: usize, out_dim: usize)(basis in array2(out_dim, in_dim), shift in array1(out_dim)) -> Affine2 {
        Affine2::new(basis, shift)
    }
}

/// Scalar probe used by the gradient checks: L(y) = sum(w * y) for fixed
/// weights w, so dL/dy = w.
pub fn probe_weights(shape: &[usize]) -> ArrayD<TsFloat> {
    let n: usize = shape.iter().product();
    ArrayD::from_shape_vec(
        shape.to_vec(),
        (0..n).map(|i| ((i * 7 + 3) % 11) as TsFloat / 11. - 0.45).collect(),
    )
    .unwrap()
}

fn probe<L: Layer + ?Sized>(layer: &L, input: &ArrayD<TsFloat>, w: &ArrayD<TsFloat>) -> TsFloat {
    (layer.forward(input) * w).sum()
}

/// Central finite differences of the probe loss w.r.t. the input.
pub fn numeric_input_grad<L: Layer + ?Sized>(layer: &L, input: &ArrayD<TsFloat>) -> ArrayD<TsFloat> {
    let eps = 1e-6;
    let w = probe_weights(&layer.forward(input).shape().to_vec());
    let mut grad = ArrayD::zeros(input.raw_dim());
    for (idx, g) in grad.indexed_iter_mut() {
        let mut plus = input.clone();
        plus[&idx] += eps;
        let mut minus = input.clone();
        minus[&idx] -= eps;
        *g = (probe(layer, &plus, &w) - probe(layer, &minus, &w)) / (2. * eps);
    }
    grad
}

/// Central finite differences of the probe loss w.r.t. parameter tensor `which`.
pub fn numeric_param_grad<L: Layer + Clone>(layer: &L, input: &ArrayD<TsFloat>, which: usize) -> ArrayD<TsFloat> {
    let eps = 1e-6;
    let w = probe_weights(&layer.forward(input).shape().to_vec());
    let shape = layer.params()[which].raw_dim();
    let mut grad = ArrayD::zeros(shape);
    for (idx, g) in grad.indexed_iter_mut() {
        let mut plus = layer.clone();
        plus.params_mut()[which][&idx] += eps;
        let mut minus = layer.clone();
        minus.params_mut()[which][&idx] -= eps;
        *g = (probe(&plus, input, &w) - probe(&minus, input, &w)) / (2. * eps);
    }
    grad
}

/// Compares analytic and numeric gradients of a layer for one input.
pub fn check_layer_gradients<L: Layer + Clone>(layer: &L, input: &ArrayD<TsFloat>, tol: TsFloat) {
    let output = layer.forward(input);
    let w = probe_weights(&output.shape().to_vec());
    let (input_grad, param_grads) = layer.backward(input, &w);

    let numeric = numeric_input_grad(layer, input);
    assert!(
        input_grad.abs_diff_eq(&numeric, tol),
        "input gradient mismatch\nanalytic: {:?}\nnumeric: {:?}",
        input_grad,
        numeric
    );

    assert_eq!(param_grads.len(), layer.params().len());
    for (which, analytic) in param_grads.iter().enumerate() {
        let numeric = numeric_param_grad(layer, input, which);
        assert!(
            analytic.abs_diff_eq(&numeric, tol),
            "param {} gradient mismatch\nanalytic: {:?}\nnumeric: {:?}",
            which,
            analytic,
            numeric
        );
    }
}
