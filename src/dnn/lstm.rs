//! Long short-term memory layer returning its final hidden state
use crate::dnn::layer::Layer;
use crate::tensorshape::TensorShape;
use crate::TsFloat;
use ndarray::{s, Array1, Array2, Array3, ArrayD, ArrayView3, ArrayViewD, ArrayViewMutD, Axis, Ix2, Ix3};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

fn sigmoid(x: TsFloat) -> TsFloat {
    1. / (1. + (-x).exp())
}

/// Gate activations of one timestep, each (N, units).
struct Step {
    input: Array2<TsFloat>,
    forget: Array2<TsFloat>,
    candidate: Array2<TsFloat>,
    output: Array2<TsFloat>,
    cell: Array2<TsFloat>,
    hidden: Array2<TsFloat>,
}

/// (N, T, D) -> (N, units). Gates are packed as [input, forget, candidate, output].
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Lstm {
    kernel: Array2<TsFloat>,    // (D, 4H)
    recurrent: Array2<TsFloat>, // (H, 4H)
    bias: Array1<TsFloat>,      // (4H)
    steps: usize,
}

impl Lstm {
    /// # Panics
    /// If improper shapes are passed in
    pub fn new(
        kernel: Array2<TsFloat>,
        recurrent: Array2<TsFloat>,
        bias: Array1<TsFloat>,
        steps: usize,
    ) -> Self {
        let gates = recurrent.shape()[1];
        assert_eq!(gates % 4, 0);
        assert_eq!(recurrent.shape()[0] * 4, gates);
        assert_eq!(kernel.shape()[1], gates);
        assert_eq!(bias.len(), gates);
        Self {
            kernel,
            recurrent,
            bias,
            steps,
        }
    }

    /// Glorot-uniform weights and a forget gate bias of one.
    pub fn glorot<R: Rng>(steps: usize, features: usize, units: usize, rng: &mut R) -> Self {
        let kernel_limit = (6. / (features + 4 * units) as TsFloat).sqrt();
        let recurrent_limit = (6. / (5 * units) as TsFloat).sqrt();
        let kernel = Array2::random_using(
            (features, 4 * units),
            Uniform::new(-kernel_limit, kernel_limit),
            rng,
        );
        let recurrent = Array2::random_using(
            (units, 4 * units),
            Uniform::new(-recurrent_limit, recurrent_limit),
            rng,
        );
        let mut bias = Array1::zeros(4 * units);
        bias.slice_mut(s![units..2 * units]).fill(1.);
        Self::new(kernel, recurrent, bias, steps)
    }

    pub fn units(&self) -> usize {
        self.recurrent.shape()[0]
    }

    pub fn features(&self) -> usize {
        self.kernel.shape()[0]
    }

    fn run(&self, x: ArrayView3<TsFloat>) -> Vec<Step> {
        let (n, t, _) = x.dim();
        let h = self.units();
        let mut hidden = Array2::zeros((n, h));
        let mut cell = Array2::zeros((n, h));
        let mut steps = Vec::with_capacity(t);
        for step in 0..t {
            let z = x.index_axis(Axis(1), step).dot(&self.kernel)
                + hidden.dot(&self.recurrent)
                + &self.bias;
            let input = z.slice(s![.., 0..h]).mapv(sigmoid);
            let forget = z.slice(s![.., h..2 * h]).mapv(sigmoid);
            let candidate = z.slice(s![.., 2 * h..3 * h]).mapv(TsFloat::tanh);
            let output = z.slice(s![.., 3 * h..4 * h]).mapv(sigmoid);
            cell = &forget * &cell + &input * &candidate;
            hidden = &output * &cell.mapv(TsFloat::tanh);
            steps.push(Step {
                input,
                forget,
                candidate,
                output,
                cell: cell.clone(),
                hidden: hidden.clone(),
            });
        }
        steps
    }
}

#[typetag::serde]
impl Layer for Lstm {
    fn input_shape(&self) -> TensorShape {
        TensorShape::new(vec![self.steps, self.features()])
    }

    fn output_shape(&self) -> TensorShape {
        TensorShape::new(vec![self.units()])
    }

    fn forward(&self, input: &ArrayD<TsFloat>) -> ArrayD<TsFloat> {
        let x = input.view().into_dimensionality::<Ix3>().unwrap();
        let (n, _, _) = x.dim();
        self.run(x)
            .pop()
            .map_or_else(|| Array2::zeros((n, self.units())), |last| last.hidden)
            .into_dyn()
    }

    /// Backpropagation through time.
    fn backward(
        &self,
        input: &ArrayD<TsFloat>,
        output_grad: &ArrayD<TsFloat>,
    ) -> (ArrayD<TsFloat>, Vec<ArrayD<TsFloat>>) {
        let x = input.view().into_dimensionality::<Ix3>().unwrap();
        let (n, t, d) = x.dim();
        let h = self.units();
        let steps = self.run(x);
        let zeros = Array2::<TsFloat>::zeros((n, h));

        let mut kernel_grad = Array2::<TsFloat>::zeros(self.kernel.raw_dim());
        let mut recurrent_grad = Array2::<TsFloat>::zeros(self.recurrent.raw_dim());
        let mut bias_grad = Array1::<TsFloat>::zeros(self.bias.raw_dim());
        let mut input_grad = Array3::<TsFloat>::zeros((n, t, d));

        let mut d_hidden = output_grad
            .view()
            .into_dimensionality::<Ix2>()
            .unwrap()
            .to_owned();
        let mut d_cell = zeros.clone();
        for step in (0..t).rev() {
            let cur = &steps[step];
            let (prev_cell, prev_hidden) = if step > 0 {
                (&steps[step - 1].cell, &steps[step - 1].hidden)
            } else {
                (&zeros, &zeros)
            };

            let tanh_cell = cur.cell.mapv(TsFloat::tanh);
            let d_output = &d_hidden * &tanh_cell;
            d_cell = d_cell + &d_hidden * &cur.output * &tanh_cell.mapv(|v| 1. - v * v);

            let mut dz = Array2::<TsFloat>::zeros((n, 4 * h));
            dz.slice_mut(s![.., 0..h])
                .assign(&(&d_cell * &cur.candidate * &cur.input.mapv(|v| v * (1. - v))));
            dz.slice_mut(s![.., h..2 * h])
                .assign(&(&d_cell * prev_cell * &cur.forget.mapv(|v| v * (1. - v))));
            dz.slice_mut(s![.., 2 * h..3 * h])
                .assign(&(&d_cell * &cur.input * &cur.candidate.mapv(|v| 1. - v * v)));
            dz.slice_mut(s![.., 3 * h..4 * h])
                .assign(&(&d_output * &cur.output.mapv(|v| v * (1. - v))));

            let x_t = x.index_axis(Axis(1), step);
            kernel_grad += &x_t.t().dot(&dz);
            recurrent_grad += &prev_hidden.t().dot(&dz);
            bias_grad += &dz.sum_axis(Axis(0));
            input_grad
                .index_axis_mut(Axis(1), step)
                .assign(&dz.dot(&self.kernel.t()));

            d_hidden = dz.dot(&self.recurrent.t());
            d_cell = &d_cell * &cur.forget;
        }
        (
            input_grad.into_dyn(),
            vec![
                kernel_grad.into_dyn(),
                recurrent_grad.into_dyn(),
                bias_grad.into_dyn(),
            ],
        )
    }

    fn params(&self) -> Vec<ArrayViewD<TsFloat>> {
        vec![
            self.kernel.view().into_dyn(),
            self.recurrent.view().into_dyn(),
            self.bias.view().into_dyn(),
        ]
    }

    fn params_mut(&mut self) -> Vec<ArrayViewMutD<TsFloat>> {
        vec![
            self.kernel.view_mut().into_dyn(),
            self.recurrent.view_mut().into_dyn(),
            self.bias.view_mut().into_dyn(),
        ]
    }
}

impl fmt::Display for Lstm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "LSTM {}", self.units())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]
        #[test]
        fn test_lstm_gradients(seed in any::<u64>(), x in array3(2, 4, 2)) {
            let mut rng = Pcg64::seed_from_u64(seed);
            let lstm = Lstm::glorot(4, 2, 3, &mut rng);
            check_layer_gradients(&lstm, &x.into_dyn(), 1e-6);
        }
    }

    #[test]
    fn test_zero_weights_give_known_state() {
        // With all weights zero every gate is sigmoid(0) = 0.5 and the candidate is 0,
        // so the cell stays at zero and so does the hidden state.
        let lstm = Lstm::new(
            Array2::zeros((1, 8)),
            Array2::zeros((2, 8)),
            Array1::zeros(8),
            3,
        );
        let out = lstm.forward(&Array3::<f64>::ones((2, 3, 1)).into_dyn());
        assert_eq!(out.shape(), &[2, 2]);
        assert!(out.iter().all(|&v| v == 0.));
    }
}
