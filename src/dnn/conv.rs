#![allow(clippy::module_name_repetitions)]
//! One dimensional convolution over (time, channel) sequences
use crate::dnn::layer::Layer;
use crate::tensorshape::TensorShape;
use crate::TsFloat;
use ndarray::{s, Array1, Array2, Array3, ArrayD, ArrayView3, ArrayViewD, ArrayViewMutD, Axis, Ix3};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stride 1 convolution with "same" zero padding, so the sequence length is preserved.
/// Weights are of the shape: (`kernel_size`, `channels_in`, `channels_out`)
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Conv1d {
    kernel: Array3<TsFloat>, // (K, C_in, C_out) following tf convention
    bias: Array1<TsFloat>,   // (C_out)
    steps: usize,            // T
}

impl Conv1d {
    /// # Panics
    /// If improper shapes are passed in
    pub fn new(kernel: Array3<TsFloat>, bias: Array1<TsFloat>, steps: usize) -> Self {
        assert_eq!(kernel.shape()[2], bias.len());
        assert!(kernel.shape()[0] > 0);
        Self {
            kernel,
            bias,
            steps,
        }
    }

    pub fn glorot<R: Rng>(
        steps: usize,
        kernel_size: usize,
        channels_in: usize,
        channels_out: usize,
        rng: &mut R,
    ) -> Self {
        let fan_in = kernel_size * channels_in;
        let fan_out = kernel_size * channels_out;
        let limit = (6. / (fan_in + fan_out) as TsFloat).sqrt();
        let kernel = Array3::random_using(
            (kernel_size, channels_in, channels_out),
            Uniform::new(-limit, limit),
            rng,
        );
        Self::new(kernel, Array1::zeros(channels_out), steps)
    }

    pub fn kernel_size(&self) -> usize {
        self.kernel.shape()[0]
    }

    pub fn channels_in(&self) -> usize {
        self.kernel.shape()[1]
    }

    pub fn channels_out(&self) -> usize {
        self.kernel.shape()[2]
    }

    /// Zeros inserted before the first timestep. The remainder goes after the last.
    fn pad_before(&self) -> usize {
        (self.kernel_size() - 1) / 2
    }

    fn padded(&self, data: ArrayView3<TsFloat>) -> Array3<TsFloat> {
        let (n, t, c) = data.dim();
        let mut padded = Array3::zeros((n, t + self.kernel_size() - 1, c));
        padded
            .slice_mut(s![.., self.pad_before()..self.pad_before() + t, ..])
            .assign(&data);
        padded
    }

    /// The `(batch * T, C_in)` rows seen by kernel tap `tap`.
    fn window(padded: &Array3<TsFloat>, tap: usize, steps: usize) -> Array2<TsFloat> {
        let (n, _, c) = padded.dim();
        padded
            .slice(s![.., tap..tap + steps, ..])
            .to_owned()
            .into_shape((n * steps, c))
            .unwrap()
    }
}

#[typetag::serde]
impl Layer for Conv1d {
    fn input_shape(&self) -> TensorShape {
        TensorShape::new(vec![self.steps, self.channels_in()])
    }

    fn output_shape(&self) -> TensorShape {
        TensorShape::new(vec![self.steps, self.channels_out()])
    }

    fn forward(&self, input: &ArrayD<TsFloat>) -> ArrayD<TsFloat> {
        let data = input.view().into_dimensionality::<Ix3>().unwrap();
        let (n, t, _) = data.dim();
        let padded = self.padded(data);

        let mut output = Array2::<TsFloat>::zeros((n * t, self.channels_out())) + &self.bias;
        for tap in 0..self.kernel_size() {
            let window = Self::window(&padded, tap, t);
            output += &window.dot(&self.kernel.index_axis(Axis(0), tap));
        }
        output
            .into_shape((n, t, self.channels_out()))
            .unwrap()
            .into_dyn()
    }

    fn backward(
        &self,
        input: &ArrayD<TsFloat>,
        output_grad: &ArrayD<TsFloat>,
    ) -> (ArrayD<TsFloat>, Vec<ArrayD<TsFloat>>) {
        let data = input.view().into_dimensionality::<Ix3>().unwrap();
        let (n, t, c_in) = data.dim();
        let padded = self.padded(data);
        let grad = output_grad
            .as_standard_layout()
            .into_owned()
            .into_shape((n * t, self.channels_out()))
            .unwrap();

        let mut kernel_grad = Array3::<TsFloat>::zeros(self.kernel.raw_dim());
        let mut padded_grad = Array3::<TsFloat>::zeros(padded.raw_dim());
        for tap in 0..self.kernel_size() {
            let window = Self::window(&padded, tap, t);
            kernel_grad
                .index_axis_mut(Axis(0), tap)
                .assign(&window.t().dot(&grad));
            // a single output filter makes this product column-major
            let tap_grad = grad
                .dot(&self.kernel.index_axis(Axis(0), tap).t())
                .as_standard_layout()
                .into_owned()
                .into_shape((n, t, c_in))
                .unwrap();
            let mut region = padded_grad.slice_mut(s![.., tap..tap + t, ..]);
            region += &tap_grad;
        }
        let bias_grad = grad.sum_axis(Axis(0));
        let input_grad = padded_grad
            .slice(s![.., self.pad_before()..self.pad_before() + t, ..])
            .to_owned();
        (
            input_grad.into_dyn(),
            vec![kernel_grad.into_dyn(), bias_grad.into_dyn()],
        )
    }

    fn params(&self) -> Vec<ArrayViewD<TsFloat>> {
        vec![self.kernel.view().into_dyn(), self.bias.view().into_dyn()]
    }

    fn params_mut(&mut self) -> Vec<ArrayViewMutD<TsFloat>> {
        vec![
            self.kernel.view_mut().into_dyn(),
            self.bias.view_mut().into_dyn(),
        ]
    }
}

impl fmt::Display for Conv1d {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Conv1d {}, {}",
            self.kernel_size(),
            self.channels_out()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use ndarray::ArrayView2;
    use proptest::prelude::*;

    /// Direct convolution of a single (T, C_in) sample.
    fn convolve(conv: &Conv1d, data: ArrayView2<TsFloat>) -> Array2<TsFloat> {
        let (t, c_in) = data.dim();
        assert_eq!(c_in, conv.channels_in());
        let c_out = conv.channels_out();
        let pad = conv.pad_before();

        let mut output = Array2::<TsFloat>::ones((t, c_out)) * &conv.bias;
        for t_out in 0..t {
            for k in 0..conv.kernel_size() {
                // zero padding contributes nothing
                if t_out + k < pad || t_out + k >= t + pad {
                    continue;
                }
                let t_in = t_out + k - pad;
                for f_in in 0..c_in {
                    for f_out in 0..c_out {
                        output[[t_out, f_out]] += data[[t_in, f_in]] * conv.kernel[[k, f_in, f_out]];
                    }
                }
            }
        }
        output
    }

    #[must_use = "strategies do nothing unless used"]
    pub fn conv_test_inputs(
        max_k: usize,
        max_t: usize,
        max_c_in: usize,
        max_c_out: usize,
        batch: usize,
    ) -> impl Strategy<Value = (Conv1d, Array3<TsFloat>)> {
        let strat = (1..(max_k + 1), 1..(max_c_in + 1), 1..(max_c_out + 1));
        let strat = Strategy::prop_flat_map(strat, move |(k, c_in, c_out)| {
            (
                array3(k, c_in, c_out),
                array1(c_out),
                array3(batch, max_t, c_in),
            )
        });
        Strategy::prop_map(strat, move |(kernel, bias, data)| {
            (Conv1d::new(kernel, bias, max_t), data)
        })
    }

    proptest! {
        #[test]
        fn test_conv_equality((conv_layer, data) in conv_test_inputs(7, 12, 3, 4, 2)) {
            let batched = conv_layer.forward(&data.clone().into_dyn());
            prop_assert_eq!(batched.shape(), &[2, 12, conv_layer.channels_out()]);
            for (sample, out) in data.outer_iter().zip(batched.outer_iter()) {
                let direct = convolve(&conv_layer, sample);
                prop_assert!(
                    direct.into_dyn().abs_diff_eq(&out, 1e-10),
                    "Unequal results for kernel size {}",
                    conv_layer.kernel_size(),
                );
            }
        }

        #[test]
        fn test_conv_gradients((conv_layer, data) in conv_test_inputs(4, 6, 2, 2, 2)) {
            check_layer_gradients(&conv_layer, &data.into_dyn(), 1e-5);
        }
    }

    #[test]
    fn test_single_filter_input_gradient() {
        let kernel = Array3::from_shape_vec((3, 4, 1), (0..12).map(|v| v as TsFloat * 0.1 - 0.5).collect()).unwrap();
        let conv = Conv1d::new(kernel, Array1::zeros(1), 5);
        let data = Array3::from_shape_vec((3, 5, 4), (0..60).map(|v| (v as TsFloat * 0.37).sin()).collect()).unwrap();
        check_layer_gradients(&conv, &data.into_dyn(), 1e-5);
    }

    #[test]
    fn test_same_padding_preserves_length() {
        let kernel = Array3::ones((4, 1, 1));
        let conv = Conv1d::new(kernel, Array1::zeros(1), 5);
        let data = Array2::from_shape_vec((5, 1), vec![1., 2., 3., 4., 5.]).unwrap();
        // Even kernels put the extra zero after the sequence: taps cover [t-1, t+2].
        let expected = Array2::from_shape_vec((5, 1), vec![6., 10., 14., 12., 9.]).unwrap();
        assert_eq!(convolve(&conv, data.view()), expected);
    }
}
