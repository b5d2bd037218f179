use crate::tensorshape::TensorShape;
use crate::TsFloat;
use dyn_clone::DynClone;
use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD};
use std::fmt::{Debug, Display};

/// A differentiable, batch-first network layer.
///
/// Layers are stateless between calls: `backward` receives the same input
/// that was given to `forward` and recomputes whatever it needs from it.
#[typetag::serde(tag = "type")]
pub trait Layer: DynClone + Display + Debug + Send + Sync {
    /// Per-sample input shape.
    fn input_shape(&self) -> TensorShape;

    /// Per-sample output shape.
    fn output_shape(&self) -> TensorShape;

    fn forward(&self, input: &ArrayD<TsFloat>) -> ArrayD<TsFloat>;

    /// Returns the gradient w.r.t. `input` and one gradient per tensor of
    /// `params`, in the same order.
    fn backward(
        &self,
        input: &ArrayD<TsFloat>,
        output_grad: &ArrayD<TsFloat>,
    ) -> (ArrayD<TsFloat>, Vec<ArrayD<TsFloat>>);

    fn params(&self) -> Vec<ArrayViewD<TsFloat>> {
        vec![]
    }

    fn params_mut(&mut self) -> Vec<ArrayViewMutD<TsFloat>> {
        vec![]
    }

    fn num_params(&self) -> usize {
        self.params().iter().map(|p| p.len()).sum()
    }

    fn input_dims(&self) -> usize {
        self.input_shape().dims()
    }

    fn output_dims(&self) -> usize {
        self.output_shape().dims()
    }
}

// This implements `Clone` for the trait
dyn_clone::clone_trait_object!(Layer);
