use crate::dnn::layer::Layer;
use crate::tensorshape::TensorShape;
use crate::TsFloat;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reinterprets each sample with a new shape of the same size.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Reshape {
    from: TensorShape,
    to: TensorShape,
}

impl Reshape {
    /// # Panics
    /// If the two shapes hold a different number of scalars
    pub fn new(from: TensorShape, to: TensorShape) -> Self {
        assert_eq!(from.dims(), to.dims());
        Self { from, to }
    }

    pub fn flatten(from: TensorShape) -> Self {
        let to = TensorShape::new(vec![from.dims()]);
        Self { from, to }
    }

    fn reshape(input: &ArrayD<TsFloat>, shape: &TensorShape) -> ArrayD<TsFloat> {
        let batch = input.shape()[0];
        input
            .as_standard_layout()
            .into_owned()
            .into_shape(shape.with_batch(batch))
            .unwrap()
    }
}

#[typetag::serde]
impl Layer for Reshape {
    fn input_shape(&self) -> TensorShape {
        self.from.clone()
    }

    fn output_shape(&self) -> TensorShape {
        self.to.clone()
    }

    fn forward(&self, input: &ArrayD<TsFloat>) -> ArrayD<TsFloat> {
        Self::reshape(input, &self.to)
    }

    fn backward(
        &self,
        _input: &ArrayD<TsFloat>,
        output_grad: &ArrayD<TsFloat>,
    ) -> (ArrayD<TsFloat>, Vec<ArrayD<TsFloat>>) {
        (Self::reshape(output_grad, &self.from), vec![])
    }
}

impl fmt::Display for Reshape {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Reshape {}", self.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_flatten_keeps_time_major_order() {
        let x = Array3::from_shape_vec((1, 3, 2), vec![1., 2., 3., 4., 5., 6.]).unwrap().into_dyn();
        let flatten = Reshape::flatten(TensorShape::new(vec![3, 2]));
        let flat = flatten.forward(&x);
        assert_eq!(flat.shape(), &[1, 6]);
        assert_eq!(flat.iter().copied().collect::<Vec<_>>(), vec![1., 2., 3., 4., 5., 6.]);
        let (back, _) = flatten.backward(&x, &flat);
        assert_eq!(back, x);
    }
}
