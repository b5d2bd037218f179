use crate::dnn::layer::Layer;
use crate::tensorshape::TensorShape;
use crate::TsFloat;
use ndarray::{ArrayD, Axis, Ix2, Ix3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mean over the time axis: (N, T, C) -> (N, C).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct GlobalAvgPool1d {
    steps: usize,
    channels: usize,
}

impl GlobalAvgPool1d {
    pub const fn new(steps: usize, channels: usize) -> Self {
        Self { steps, channels }
    }
}

#[typetag::serde]
impl Layer for GlobalAvgPool1d {
    fn input_shape(&self) -> TensorShape {
        TensorShape::new(vec![self.steps, self.channels])
    }

    fn output_shape(&self) -> TensorShape {
        TensorShape::new(vec![self.channels])
    }

    fn forward(&self, input: &ArrayD<TsFloat>) -> ArrayD<TsFloat> {
        let x = input.view().into_dimensionality::<Ix3>().unwrap();
        x.mean_axis(Axis(1)).unwrap().into_dyn()
    }

    fn backward(
        &self,
        input: &ArrayD<TsFloat>,
        output_grad: &ArrayD<TsFloat>,
    ) -> (ArrayD<TsFloat>, Vec<ArrayD<TsFloat>>) {
        let (n, t, c) = input.view().into_dimensionality::<Ix3>().unwrap().dim();
        let g = output_grad.view().into_dimensionality::<Ix2>().unwrap();
        let spread = g.insert_axis(Axis(1)).broadcast((n, t, c)).unwrap().to_owned() / t as TsFloat;
        (spread.into_dyn(), vec![])
    }
}

impl fmt::Display for GlobalAvgPool1d {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "GlobalAvgPool1d")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_pool_gradients(x in array3(2, 5, 3)) {
            check_layer_gradients(&GlobalAvgPool1d::new(5, 3), &x.into_dyn(), 1e-6);
        }
    }
}
