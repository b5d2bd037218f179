use crate::dnn::layer::Layer;
use crate::error::{GatnError, Result};
use crate::tensorshape::TensorShape;
use crate::TsFloat;
use itertools::Itertools;
use log::trace;
use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sequential network of boxed layers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DNN {
    layers: Vec<Box<dyn Layer>>,
}

impl DNN {
    /// # Errors
    /// If `layers` is empty or the output shape of a layer is not the input
    /// shape of the next one.
    pub fn new(layers: Vec<Box<dyn Layer>>) -> Result<Self> {
        if layers.is_empty() {
            return Err(GatnError::Shape("a network needs at least one layer".to_string()));
        }
        let dnn = Self { layers };
        dnn.check_shapes()?;
        Ok(dnn)
    }

    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    /// # Errors
    pub fn check_shapes(&self) -> Result<()> {
        for (idx, (a, b)) in self.layers.iter().tuple_windows().enumerate() {
            if a.output_shape() != b.input_shape() {
                return Err(GatnError::Shape(format!(
                    "layer {} ({}) outputs {} but layer {} ({}) expects {}",
                    idx,
                    a,
                    a.output_shape(),
                    idx + 1,
                    b,
                    b.input_shape()
                )));
            }
        }
        Ok(())
    }

    /// # Panics
    /// If the network has no layers
    pub fn input_shape(&self) -> TensorShape {
        self.layers.first().unwrap().input_shape()
    }

    /// # Panics
    /// If the network has no layers
    pub fn output_shape(&self) -> TensorShape {
        self.layers.last().unwrap().output_shape()
    }

    pub fn num_params(&self) -> usize {
        self.layers.iter().map(|layer| layer.num_params()).sum()
    }

    pub fn forward(&self, input: &ArrayD<TsFloat>) -> ArrayD<TsFloat> {
        self.layers
            .iter()
            .fold(input.clone(), |x, layer| layer.forward(&x))
    }

    /// # Returns
    /// The input followed by the output of every layer
    pub fn forward_trace(&self, input: &ArrayD<TsFloat>) -> Vec<ArrayD<TsFloat>> {
        let mut trace = Vec::with_capacity(self.layers.len() + 1);
        trace.push(input.clone());
        for layer in &self.layers {
            let next = layer.forward(trace.last().unwrap());
            trace.push(next);
        }
        trace
    }

    /// Backpropagate `output_grad` through the network.
    ///
    /// # Returns
    /// The gradient w.r.t. the network input, and the parameter gradients
    /// flattened in the order of `params`.
    ///
    /// # Panics
    /// If `trace` was not produced by `forward_trace` on this network
    pub fn backward(
        &self,
        trace: &[ArrayD<TsFloat>],
        output_grad: ArrayD<TsFloat>,
    ) -> (ArrayD<TsFloat>, Vec<ArrayD<TsFloat>>) {
        assert_eq!(trace.len(), self.layers.len() + 1);
        let mut grad = output_grad;
        let mut per_layer = Vec::with_capacity(self.layers.len());
        let inputs = &trace[..self.layers.len()];
        for (layer, input) in self.layers.iter().zip(inputs).rev() {
            trace!("backward through {}", layer);
            let (input_grad, param_grads) = layer.backward(input, &grad);
            per_layer.push(param_grads);
            grad = input_grad;
        }
        let param_grads = per_layer.into_iter().rev().flatten().collect();
        (grad, param_grads)
    }

    pub fn params(&self) -> Vec<ArrayViewD<TsFloat>> {
        self.layers.iter().flat_map(|layer| layer.params()).collect()
    }

    pub fn params_mut(&mut self) -> Vec<ArrayViewMutD<TsFloat>> {
        self.layers
            .iter_mut()
            .flat_map(|layer| layer.params_mut())
            .collect()
    }
}

impl fmt::Display for DNN {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let layers: Vec<String> = self.layers.iter().map(|x| format!("{}", x)).collect();
        write!(f, "Input {} => {}", self.input_shape(), layers.join(" => "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dnn::{Conv1d, Dense, GlobalAvgPool1d, ReLU};
    use crate::test_util::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    fn small_cnn(rng: &mut Pcg64) -> DNN {
        DNN::new(vec![
            Box::new(Conv1d::glorot(6, 3, 1, 2, rng)),
            Box::new(ReLU::new(TensorShape::new(vec![6, 2]))),
            Box::new(GlobalAvgPool1d::new(6, 2)),
            Box::new(Dense::glorot(2, 3, rng)),
        ])
        .unwrap()
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let mut rng = Pcg64::seed_from_u64(1);
        let res = DNN::new(vec![
            Box::new(Dense::glorot(4, 3, &mut rng)),
            Box::new(Dense::glorot(2, 3, &mut rng)),
        ]);
        assert!(matches!(res, Err(GatnError::Shape(_))));
    }

    #[test]
    fn test_backward_matches_finite_differences() {
        let mut rng = Pcg64::seed_from_u64(7);
        let dnn = small_cnn(&mut rng);
        let x = ndarray::Array3::from_shape_fn((2, 6, 1), |(n, t, _)| ((n * 6 + t) as f64 * 0.37).sin())
            .into_dyn();
        let out = dnn.forward(&x);
        assert_eq!(out.shape(), &[2, 3]);

        let w = probe_weights(out.shape());
        let trace = dnn.forward_trace(&x);
        assert_eq!(trace.last().unwrap(), &out);
        let (input_grad, param_grads) = dnn.backward(&trace, w.clone());
        assert_eq!(param_grads.len(), dnn.params().len());

        let eps = 1e-6;
        for (idx, &analytic) in input_grad.indexed_iter() {
            let mut plus = x.clone();
            plus[&idx] += eps;
            let mut minus = x.clone();
            minus[&idx] -= eps;
            let numeric = ((dnn.forward(&plus) * &w).sum() - (dnn.forward(&minus) * &w).sum()) / (2. * eps);
            assert!((analytic - numeric).abs() < 1e-6, "{} vs {}", analytic, numeric);
        }
    }

    #[test]
    fn test_serde_roundtrip_preserves_outputs() {
        let mut rng = Pcg64::seed_from_u64(3);
        let dnn = small_cnn(&mut rng);
        let json = serde_json::to_string(&dnn).unwrap();
        let restored: DNN = serde_json::from_str(&json).unwrap();
        let x = ndarray::Array3::<f64>::ones((1, 6, 1)).into_dyn();
        assert!(dnn.forward(&x).abs_diff_eq(&restored.forward(&x), 1e-12));
        assert_eq!(format!("{}", dnn), format!("{}", restored));
    }
}
