use crate::affine::Affine2;
use crate::dnn::layer::Layer;
use crate::tensorshape::TensorShape;
use crate::TsFloat;
use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Ix2};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Dense {
    aff: Affine2,
}

impl Dense {
    pub const fn new(aff: Affine2) -> Self {
        Self { aff }
    }

    pub fn glorot<R: Rng>(input_dim: usize, output_dim: usize, rng: &mut R) -> Self {
        Self::new(Affine2::glorot(input_dim, output_dim, rng))
    }
}

#[typetag::serde]
impl Layer for Dense {
    fn input_shape(&self) -> TensorShape {
        TensorShape::new(vec![self.aff.input_dim()])
    }

    fn output_shape(&self) -> TensorShape {
        TensorShape::new(vec![self.aff.output_dim()])
    }

    /// # Panics
    /// If the input is not (batch, input_dim)
    fn forward(&self, input: &ArrayD<TsFloat>) -> ArrayD<TsFloat> {
        let x = input.view().into_dimensionality::<Ix2>().unwrap();
        self.aff.apply_matrix(&x).into_dyn()
    }

    fn backward(
        &self,
        input: &ArrayD<TsFloat>,
        output_grad: &ArrayD<TsFloat>,
    ) -> (ArrayD<TsFloat>, Vec<ArrayD<TsFloat>>) {
        let x = input.view().into_dimensionality::<Ix2>().unwrap();
        let g = output_grad.view().into_dimensionality::<Ix2>().unwrap();
        let (input_grad, basis_grad, shift_grad) = self.aff.backward_matrix(&x, &g);
        (
            input_grad.into_dyn(),
            vec![basis_grad.into_dyn(), shift_grad.into_dyn()],
        )
    }

    fn params(&self) -> Vec<ArrayViewD<TsFloat>> {
        vec![self.aff.basis().into_dyn(), self.aff.shift().into_dyn()]
    }

    fn params_mut(&mut self) -> Vec<ArrayViewMutD<TsFloat>> {
        let (basis, shift) = self.aff.parts_mut();
        vec![basis.into_dyn(), shift.into_dyn()]
    }
}

impl fmt::Display for Dense {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Dense {}", self.aff.output_dim())
    }
}
