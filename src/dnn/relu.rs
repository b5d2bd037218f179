use crate::dnn::layer::Layer;
use crate::tensorshape::TensorShape;
use crate::TsFloat;
use ndarray::{ArrayD, Zip};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result};

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ReLU {
    shape: TensorShape,
}

impl ReLU {
    pub fn new(shape: TensorShape) -> Self {
        Self { shape }
    }
}

impl Display for ReLU {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "ReLU")
    }
}

#[typetag::serde]
impl Layer for ReLU {
    fn input_shape(&self) -> TensorShape {
        self.shape.clone()
    }

    fn output_shape(&self) -> TensorShape {
        self.shape.clone()
    }

    fn forward(&self, input: &ArrayD<TsFloat>) -> ArrayD<TsFloat> {
        input.mapv(|x| if x.lt(&0.) { 0. } else { x })
    }

    fn backward(
        &self,
        input: &ArrayD<TsFloat>,
        output_grad: &ArrayD<TsFloat>,
    ) -> (ArrayD<TsFloat>, Vec<ArrayD<TsFloat>>) {
        let grad = Zip::from(input)
            .and(output_grad)
            .map_collect(|&x, &g| if x > 0. { g } else { 0. });
        (grad, vec![])
    }
}
