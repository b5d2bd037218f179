#![allow(clippy::module_name_repetitions)]
//! Representation of affine transformations
use crate::TsFloat;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};

/// Affine map f(x) = Ax + b with `A` of shape (output, input)
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Affine2 {
    basis: Array2<TsFloat>,
    shift: Array1<TsFloat>,
}

impl Display for Affine2 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::result::Result<(), std::fmt::Error> {
        write!(
            f,
            "Basis {:?} Shift {:?}",
            self.basis.shape(),
            self.shift.shape()
        )
    }
}

impl Affine2 {
    /// # Panics
    /// If improper shapes are passed in
    pub fn new(basis: Array2<TsFloat>, shift: Array1<TsFloat>) -> Self {
        assert_eq!(basis.shape()[0], shift.len());
        Self { basis, shift }
    }

    /// Glorot-uniform basis with a zero shift.
    pub fn glorot<R: Rng>(input_dim: usize, output_dim: usize, rng: &mut R) -> Self {
        let limit = (6. / (input_dim + output_dim) as TsFloat).sqrt();
        Self {
            basis: Array2::random_using((output_dim, input_dim), Uniform::new(-limit, limit), rng),
            shift: Array1::zeros(output_dim),
        }
    }

    pub fn basis(&self) -> ArrayView2<TsFloat> {
        self.basis.view()
    }

    pub fn shift(&self) -> ArrayView1<TsFloat> {
        self.shift.view()
    }

    /// Mutable views of the basis and the shift at the same time.
    pub fn parts_mut(&mut self) -> (ArrayViewMut2<TsFloat>, ArrayViewMut1<TsFloat>) {
        (self.basis.view_mut(), self.shift.view_mut())
    }

    pub fn input_dim(&self) -> usize {
        self.basis.shape()[1]
    }

    pub fn output_dim(&self) -> usize {
        self.shift.len()
    }

    /// Apply to every row of a (batch, input) matrix.
    pub fn apply_matrix(&self, x: &ArrayView2<TsFloat>) -> Array2<TsFloat> {
        x.dot(&self.basis.t()) + &self.shift
    }

    /// Backpropagate `output_grad` (batch, output) through `apply_matrix` evaluated at `x`.
    ///
    /// Returns the gradients w.r.t. the input, the basis and the shift.
    pub fn backward_matrix(
        &self,
        x: &ArrayView2<TsFloat>,
        output_grad: &ArrayView2<TsFloat>,
    ) -> (Array2<TsFloat>, Array2<TsFloat>, Array1<TsFloat>) {
        let input_grad = output_grad.dot(&self.basis);
        let basis_grad = output_grad.t().dot(x);
        let shift_grad = output_grad.sum_axis(Axis(0));
        (input_grad, basis_grad, shift_grad)
    }
}
